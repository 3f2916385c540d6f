use reqwest::Url;
use serde::Serialize;
use snafu::ResultExt;
use tower::Service;

use super::{
    ConcurrencyOverRate, LatencyBudget, RateSearchSettings, SearchError, TrialSnafu, Verdict,
};
use crate::Error as CrateError;
use crate::throttle::http::Completion;
use crate::throttle::internal_event::{SearchFinished, SearchIterationCompleted, emit};
use crate::throttle::{Throttler, TrialStats};

/// Mutable state of one search run.
///
/// `min_rate <= max_rate` holds before and after every iteration, and
/// `best_rate` only ever moves up.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchState {
    pub min_rate: f64,
    pub max_rate: f64,
    pub best_rate: Option<f64>,
    /// Stats of the trial that set `best_rate`; all-absent until then.
    pub best_stats: TrialStats,
    pub iteration: usize,
}

impl SearchState {
    pub fn new(settings: &RateSearchSettings) -> Self {
        Self {
            min_rate: settings.min_rate,
            max_rate: settings.max_rate,
            best_rate: None,
            best_stats: TrialStats::default(),
            iteration: 0,
        }
    }

    /// Midpoint of the bracket, finite for any finite bracket.
    pub fn candidate(&self) -> f64 {
        self.min_rate + (self.max_rate - self.min_rate) / 2.0
    }

    /// Acceptance raises the floor and records the best rate; anything else
    /// lowers the ceiling and leaves the best rate alone.
    pub fn apply(&mut self, candidate: f64, verdict: &Verdict, stats: &TrialStats) {
        match verdict {
            Verdict::Accepted => {
                self.min_rate = candidate;
                self.best_rate = Some(candidate);
                self.best_stats = stats.clone();
            }
            Verdict::Rejected(_) | Verdict::NoSuccessfulRequests => {
                self.max_rate = candidate;
            }
        }
        self.iteration += 1;
    }
}

/// One trial of the search, with the bracket as it stood after the trial.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub candidate: f64,
    pub latency_threshold: f64,
    pub verdict: Verdict,
    pub stats: TrialStats,
    pub min_rate: f64,
    pub max_rate: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub best_rate: Option<f64>,
    pub best_stats: TrialStats,
    /// Bracket and counters as they stood when the search stopped.
    pub state: SearchState,
    pub history: Vec<IterationRecord>,
}

impl SearchOutcome {
    fn new(state: SearchState, history: Vec<IterationRecord>) -> Self {
        Self {
            best_rate: state.best_rate,
            best_stats: state.best_stats.clone(),
            state,
            history,
        }
    }

    pub fn best_rate(&self) -> Option<f64> {
        self.best_rate
    }

    pub fn best_stats(&self) -> &TrialStats {
        &self.best_stats
    }
}

/// Drives a bounded binary search over candidate rates, one trial per
/// iteration.
///
/// `make_client` is called once per trial, so every trial gets its own HTTP
/// client. Its failure is the only way the search itself fails.
#[derive(Debug)]
pub struct RateSearcher<F, B = ConcurrencyOverRate> {
    urls: Vec<Url>,
    settings: RateSearchSettings,
    latency_budget: B,
    make_client: F,
}

impl<F> RateSearcher<F> {
    pub fn new(
        urls: Vec<Url>,
        settings: RateSearchSettings,
        make_client: F,
    ) -> Result<Self, SearchError> {
        settings.validate()?;
        Ok(Self {
            urls,
            settings,
            latency_budget: ConcurrencyOverRate,
            make_client,
        })
    }
}

impl<F, B> RateSearcher<F, B> {
    /// Replaces the default `concurrency / rate` latency budget.
    pub fn with_latency_budget<L: LatencyBudget>(self, latency_budget: L) -> RateSearcher<F, L> {
        RateSearcher {
            urls: self.urls,
            settings: self.settings,
            latency_budget,
            make_client: self.make_client,
        }
    }

    pub fn settings(&self) -> &RateSearchSettings {
        &self.settings
    }
}

impl<F, B, S, E> RateSearcher<F, B>
where
    F: FnMut() -> Result<S, E>,
    E: Into<CrateError>,
    B: LatencyBudget,
    S: Service<Url, Response = Completion> + Clone + Send + 'static,
    S::Error: Into<CrateError>,
    S::Future: Send,
{
    pub async fn find_rate(&mut self) -> Result<SearchOutcome, SearchError> {
        let concurrency = self.settings.concurrency;
        let mut state = SearchState::new(&self.settings);
        let mut history = Vec::with_capacity(self.settings.max_iterations);

        while state.iteration < self.settings.max_iterations {
            if let Some(precision) = self.settings.precision
                && state.max_rate - state.min_rate < precision
            {
                debug!(
                    message = "Search range below precision; stopping early.",
                    min_rate = state.min_rate,
                    max_rate = state.max_rate,
                    precision
                );
                break;
            }

            let candidate = state.candidate();
            let latency_threshold = self.latency_budget.latency_threshold(candidate, concurrency);
            info!(
                message = "Testing rate.",
                iteration = state.iteration + 1,
                rate = candidate,
                latency_threshold
            );

            let client = (self.make_client)()
                .map_err(|source| SearchError::ClientInit {
                    source: source.into(),
                })?;
            let stats = Throttler::new(client)
                .run(&self.urls, candidate, concurrency)
                .await
                .context(TrialSnafu)?;

            let verdict = self.settings.evaluate(&stats, latency_threshold);
            state.apply(candidate, &verdict, &stats);

            emit(SearchIterationCompleted {
                iteration: state.iteration,
                candidate,
                latency_threshold,
                min_rate: state.min_rate,
                max_rate: state.max_rate,
                verdict: &verdict,
            });
            history.push(IterationRecord {
                iteration: state.iteration,
                candidate,
                latency_threshold,
                verdict,
                stats,
                min_rate: state.min_rate,
                max_rate: state.max_rate,
            });
        }

        emit(SearchFinished {
            iterations: state.iteration,
            best_rate: state.best_rate,
        });
        Ok(SearchOutcome::new(state, history))
    }
}
