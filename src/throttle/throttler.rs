use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::Serialize;
use snafu::{Snafu, ensure};
use tower::Service;

use super::http::Completion;
use super::instant_now;
use super::internal_event::{TrialCompleted, emit};
use super::scheduler::TokenScheduler;
use super::stats::{StatsAggregator, TrialStats};
use super::worker::{Timeline, WorkQueue, WorkerAssignments, WorkerPool, WorkerTimelines};
use crate::Error as CrateError;

/// Argument errors. Request failures never surface as a `TrialError`.
#[derive(Debug, Snafu, PartialEq)]
#[snafu(visibility(pub(crate)))]
pub enum TrialError {
    #[snafu(display("Request rate must be positive and finite, got {}", rate))]
    InvalidRate { rate: f64 },

    #[snafu(display("Concurrency must be at least 1"))]
    ZeroConcurrency,
}

/// Everything one trial observed.
#[derive(Clone, Debug, Serialize)]
pub struct TrialReport {
    pub stats: TrialStats,
    pub timeline: WorkerTimelines,
    /// URLs each worker took, including the ones whose request failed.
    pub handled: WorkerAssignments,
    pub elapsed: Duration,
}

/// Runs one trial: every URL requested once, at a fixed pace and concurrency.
///
/// The service is cloned into each worker. Build a new `Throttler` (and a new
/// client) per trial so that no connection state leaks between trials.
///
/// # Example
///
/// ```no_run
/// use throttle_optimizer::throttle::Throttler;
/// use throttle_optimizer::throttle::reqwest_integration::ReqwestService;
/// use reqwest::Url;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
/// let urls = vec![Url::parse("http://localhost:8080/")?; 20];
/// let stats = Throttler::new(ReqwestService::new()?)
///     .run(&urls, 10.0, 4)
///     .await?;
/// println!("mean latency: {:?}", stats.mean());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Throttler<S> {
    service: S,
    token_capacity: Option<usize>,
}

impl<S> Throttler<S>
where
    S: Service<Url, Response = Completion> + Clone + Send + 'static,
    S::Error: Into<CrateError>,
    S::Future: Send,
{
    pub fn new(service: S) -> Self {
        Self {
            service,
            token_capacity: None,
        }
    }

    /// Caps how many unused pacing tokens may be banked. Defaults to the
    /// trial's concurrency.
    pub fn token_capacity(mut self, capacity: usize) -> Self {
        self.token_capacity = Some(capacity);
        self
    }

    pub async fn run(
        &self,
        urls: &[Url],
        rate: f64,
        concurrency: usize,
    ) -> Result<TrialStats, TrialError> {
        Ok(self.run_detailed(urls, rate, concurrency).await?.stats)
    }

    /// Like [`Throttler::run`], also returning the per-worker timeline and
    /// assignments.
    pub async fn run_detailed(
        &self,
        urls: &[Url],
        rate: f64,
        concurrency: usize,
    ) -> Result<TrialReport, TrialError> {
        ensure!(rate.is_finite() && rate > 0.0, InvalidRateSnafu { rate });
        ensure!(concurrency > 0, ZeroConcurrencySnafu);

        debug!(message = "Starting trial.", rate, concurrency, urls = urls.len());
        let started = instant_now();

        let queue = Arc::new(WorkQueue::from_urls(urls.iter().cloned()));
        let stats = Arc::new(StatsAggregator::new());
        let timeline = Arc::new(Timeline::new());
        let scheduler = TokenScheduler::start(rate, self.token_capacity.unwrap_or(concurrency));

        let pool = WorkerPool::spawn(
            concurrency,
            self.service.clone(),
            Arc::clone(&queue),
            scheduler.tokens(),
            Arc::clone(&stats),
            Arc::clone(&timeline),
        );

        queue.join().await;
        scheduler.stop();
        pool.shutdown().await;

        let stats = stats.finalize();
        let elapsed = instant_now().saturating_duration_since(started);
        emit(TrialCompleted {
            rate,
            concurrency,
            elapsed,
            stats: &stats,
        });

        Ok(TrialReport {
            stats,
            timeline: timeline.snapshot(),
            handled: timeline.handled(),
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;

    use super::*;
    use crate::test_utils::{ScriptedService, urls};
    use crate::throttle::http::HttpError;

    fn ok_service(latency: Duration) -> ScriptedService {
        ScriptedService::always(StatusCode::OK, latency)
    }

    #[tokio::test(start_paused = true)]
    async fn every_url_is_attempted_once() {
        let service = ok_service(Duration::from_millis(30));
        let stats = Throttler::new(service.clone())
            .run(&urls(25), 50.0, 5)
            .await
            .unwrap();

        assert_eq!(service.calls(), 25);
        assert_eq!(stats.total_requests, 25);
        assert_eq!(stats.success_count + stats.error_count, 25);
        assert_eq!(stats.status_count(200), 25);
        assert!((stats.mean().unwrap() - 0.03).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_url_list_yields_empty_stats() {
        let stats = Throttler::new(ok_service(Duration::from_millis(1)))
            .run(&[], 10.0, 3)
            .await
            .unwrap();

        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.latency, None);
        assert_eq!(stats.error_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_are_absorbed() {
        let service = ScriptedService::new(|_| Err(HttpError::Timeout));
        let stats = Throttler::new(service).run(&urls(8), 20.0, 2).await.unwrap();

        assert_eq!(stats.total_requests, 8);
        assert_eq!(stats.error_count, 8);
        assert_eq!(stats.error_rate, 1.0);
        assert_eq!(stats.latency, None);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_bounds_trial_duration() {
        // 20 requests at 10 rps need at least 2 seconds regardless of concurrency.
        let report = Throttler::new(ok_service(Duration::from_millis(1)))
            .run_detailed(&urls(20), 10.0, 20)
            .await
            .unwrap();

        assert!(report.elapsed >= Duration::from_secs(2), "elapsed {:?}", report.elapsed);
        assert!(report.elapsed < Duration::from_millis(2100), "elapsed {:?}", report.elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn timeline_covers_successful_requests() {
        let report = Throttler::new(ok_service(Duration::from_millis(100)))
            .run_detailed(&urls(6), 30.0, 3)
            .await
            .unwrap();

        let entries: Vec<_> = report.timeline.values().flatten().collect();
        assert_eq!(entries.len(), 6);
        assert!(entries.iter().any(|entry| entry.start == 0.0));
        assert!(entries.iter().all(|entry| entry.end > entry.start));
    }

    #[tokio::test]
    async fn rejects_invalid_arguments() {
        let throttler = Throttler::new(ok_service(Duration::from_millis(1)));

        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let error = throttler.run(&urls(1), rate, 1).await.unwrap_err();
            assert!(matches!(error, TrialError::InvalidRate { .. }));
        }
        assert_eq!(
            throttler.run(&urls(1), 1.0, 0).await.unwrap_err(),
            TrialError::ZeroConcurrency
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_requests_show_in_assignments_only() {
        let service = ScriptedService::new(|url| {
            if url.path() == "/2" {
                Err(HttpError::Timeout)
            } else {
                Ok(Completion::new(StatusCode::OK, Duration::from_millis(10)))
            }
        });
        let report = Throttler::new(service)
            .run_detailed(&urls(5), 20.0, 2)
            .await
            .unwrap();

        let failed = "http://probe.test/2";
        let (worker, _) = report
            .handled
            .iter()
            .find(|(_, handled)| handled.iter().any(|url| url == failed))
            .unwrap();
        assert_eq!(report.handled.values().map(Vec::len).sum::<usize>(), 5);
        assert!(
            report
                .timeline
                .get(worker)
                .into_iter()
                .flatten()
                .all(|entry| entry.url != failed)
        );
        assert_eq!(report.timeline.values().map(Vec::len).sum::<usize>(), 4);
    }

    /// Three slow requests end together while the bank fills up; the next
    /// three start as a burst no larger than the bank.
    fn burst_after_stall() -> ScriptedService {
        ScriptedService::new(|url| {
            let latency = match url.path() {
                "/0" => 1050,
                "/1" => 950,
                "/2" => 850,
                _ => 10,
            };
            Ok(Completion::new(StatusCode::OK, Duration::from_millis(latency)))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn banked_tokens_default_to_concurrency() {
        let report = Throttler::new(burst_after_stall())
            .run_detailed(&urls(6), 10.0, 3)
            .await
            .unwrap();

        assert_eq!(report.stats.total_requests, 6);
        assert!(report.elapsed < Duration::from_millis(1200), "elapsed {:?}", report.elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn token_capacity_limits_bursts() {
        let report = Throttler::new(burst_after_stall())
            .token_capacity(1)
            .run_detailed(&urls(6), 10.0, 3)
            .await
            .unwrap();

        assert_eq!(report.stats.total_requests, 6);
        assert!(report.elapsed >= Duration::from_millis(1300), "elapsed {:?}", report.elapsed);
    }
}
