//! Per-trial outcome accumulation and summary statistics.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use http::StatusCode;
use serde::Serialize;

/// HTTP status code to occurrence count within one trial.
pub type StatusDistribution = BTreeMap<u16, usize>;

/// Latency summary over the successful requests of a trial, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LatencySummary {
    pub mean: f64,
    /// Population standard deviation; never negative.
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Final statistics of one trial.
///
/// `latency` is `None` when no request succeeded. That means "no latency
/// data", which is not the same thing as a latency of zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrialStats {
    pub total_requests: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub latency: Option<LatencySummary>,
    /// `error_count / total_requests`, or `0.0` for an empty trial.
    pub error_rate: f64,
    pub status_distribution: StatusDistribution,
}

impl TrialStats {
    pub fn mean(&self) -> Option<f64> {
        self.latency.map(|l| l.mean)
    }

    pub fn std(&self) -> Option<f64> {
        self.latency.map(|l| l.std)
    }

    pub fn min(&self) -> Option<f64> {
        self.latency.map(|l| l.min)
    }

    pub fn max(&self) -> Option<f64> {
        self.latency.map(|l| l.max)
    }

    pub fn status_count(&self, status: u16) -> usize {
        self.status_distribution.get(&status).copied().unwrap_or(0)
    }

    /// Share of all attempted requests that came back with one of `codes`.
    ///
    /// `0.0` when nothing was attempted.
    pub fn status_rate(&self, codes: &[u16]) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        let matching: usize = codes.iter().map(|code| self.status_count(*code)).sum();
        matching as f64 / self.total_requests as f64
    }
}

#[derive(Debug, Default)]
struct Samples {
    latencies: Vec<f64>,
    error_count: usize,
    status_counts: StatusDistribution,
}

/// Collects request outcomes for one trial.
///
/// Workers share it across tokio worker threads, so outcomes are recorded
/// under a lock at the moment they happen; cancelling a worker afterwards
/// cannot lose or duplicate them.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    samples: Mutex<Samples>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request completed with a full response.
    pub fn record_success(&self, status: StatusCode, latency: Duration) {
        let mut samples = self.samples();
        samples.latencies.push(latency.as_secs_f64());
        *samples.status_counts.entry(status.as_u16()).or_insert(0) += 1;
    }

    /// A request failed at the transport level: no status, no latency.
    pub fn record_failure(&self) {
        self.samples().error_count += 1;
    }

    pub fn finalize(&self) -> TrialStats {
        let samples = self.samples();
        let success_count = samples.latencies.len();
        let error_count = samples.error_count;
        let total_requests = success_count + error_count;

        let error_rate = if total_requests == 0 {
            0.0
        } else {
            error_count as f64 / total_requests as f64
        };

        TrialStats {
            total_requests,
            success_count,
            error_count,
            latency: summarize(&samples.latencies),
            error_rate,
            status_distribution: samples.status_counts.clone(),
        }
    }

    fn samples(&self) -> MutexGuard<'_, Samples> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn summarize(latencies: &[f64]) -> Option<LatencySummary> {
    if latencies.is_empty() {
        return None;
    }

    // Summed in sorted order so the result does not depend on completion order.
    let mut sorted = latencies.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len() as f64;
    let sum: f64 = sorted.iter().sum();
    let sum_sq: f64 = sorted.iter().map(|x| x * x).sum();
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);

    Some(LatencySummary {
        mean,
        std: variance.sqrt(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
    })
}
