use std::time::Duration;

use metrics::{Counter, Histogram, counter, gauge, histogram};

use super::InternalEvent;
use crate::registered_event;
use crate::throttle::http::Completion;
use crate::throttle::stats::TrialStats;

registered_event! {
    RequestCompleted => {
        latency: Histogram = histogram!("throttle_request_latency_seconds"),
        completed: Counter = counter!("throttle_requests_completed_total"),
    }

    fn emit(&self, completion: Completion) {
        self.latency.record(completion.elapsed);
        self.completed.increment(1);
        // Status is a label, so it cannot be resolved up front.
        counter!("throttle_responses_total", "status" => completion.status.as_u16().to_string())
            .increment(1);
        trace!(
            target: "throttle_optimizer::stats",
            status = completion.status.as_u16(),
            latency_ms = completion.elapsed.as_millis(),
            "Response observed"
        );
    }
}

registered_event! {
    RequestFailed => {
        failures: Counter = counter!("throttle_transport_errors_total"),
    }

    fn emit(&self, worker_id: usize) {
        self.failures.increment(1);
        trace!(target: "throttle_optimizer::stats", worker_id, "Transport failure counted");
    }
}

/// Summary of one finished trial.
#[derive(Debug)]
pub struct TrialCompleted<'a> {
    pub rate: f64,
    pub concurrency: usize,
    pub elapsed: Duration,
    pub stats: &'a TrialStats,
}

impl InternalEvent for TrialCompleted<'_> {
    fn emit(self) {
        counter!("throttle_trials_total").increment(1);
        histogram!("throttle_trial_duration_seconds").record(self.elapsed);
        gauge!("throttle_trial_error_rate").set(self.stats.error_rate);
        if let Some(mean) = self.stats.mean() {
            gauge!("throttle_trial_mean_latency_seconds").set(mean);
        }

        info!(
            target: "throttle_optimizer::stats",
            rate = self.rate,
            concurrency = self.concurrency,
            total_requests = self.stats.total_requests,
            errors = self.stats.error_count,
            mean_latency = ?self.stats.mean(),
            std_latency = ?self.stats.std(),
            min_latency = ?self.stats.min(),
            max_latency = ?self.stats.max(),
            elapsed_ms = self.elapsed.as_millis(),
            "Trial finished"
        );
    }
}
