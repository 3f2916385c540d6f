use metrics::{counter, gauge};

use super::InternalEvent;
use crate::search::Verdict;

#[derive(Debug)]
pub struct SearchIterationCompleted<'a> {
    pub iteration: usize,
    pub candidate: f64,
    pub latency_threshold: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub verdict: &'a Verdict,
}

impl InternalEvent for SearchIterationCompleted<'_> {
    fn emit(self) {
        gauge!("rate_search_candidate_rate").set(self.candidate);
        gauge!("rate_search_min_rate").set(self.min_rate);
        gauge!("rate_search_max_rate").set(self.max_rate);
        counter!("rate_search_iterations_total", "verdict" => self.verdict.label()).increment(1);

        match self.verdict {
            Verdict::Accepted => info!(
                iteration = self.iteration,
                rate = self.candidate,
                "Conditions are acceptable, updating best rate"
            ),
            Verdict::Rejected(reasons) => info!(
                iteration = self.iteration,
                rate = self.candidate,
                latency_threshold = self.latency_threshold,
                reasons = ?reasons,
                "Conditions are bad, rate is too high"
            ),
            Verdict::NoSuccessfulRequests => warn!(
                iteration = self.iteration,
                rate = self.candidate,
                "No request succeeded, lowering the ceiling"
            ),
        }
    }
}

#[derive(Debug)]
pub struct SearchFinished {
    pub iterations: usize,
    pub best_rate: Option<f64>,
}

impl InternalEvent for SearchFinished {
    fn emit(self) {
        match self.best_rate {
            Some(rate) => {
                gauge!("rate_search_best_rate").set(rate);
                info!(iterations = self.iterations, best_rate = rate, "Rate search finished");
            }
            None => warn!(
                iterations = self.iterations,
                "Rate search finished without an acceptable rate"
            ),
        }
    }
}
