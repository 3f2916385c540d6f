//! Bounded binary search for the highest acceptable request rate.

mod searcher;

pub use searcher::{IterationRecord, RateSearcher, SearchOutcome, SearchState};

use std::fmt;
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use snafu::{Snafu, ensure};

use crate::Error as CrateError;
use crate::throttle::{TrialError, TrialStats};

/// Configuration of a rate search.
///
/// | Parameter | Default | Description |
/// |-----------|---------|-------------|
/// | `min_rate` | 1.0 | Lower end of the search range, requests/second |
/// | `max_rate` | 100.0 | Upper end of the search range, requests/second |
/// | `concurrency` | 5 | Workers per trial |
/// | `error_threshold` | 0.1 | Highest acceptable transport error rate |
/// | `bad_status_threshold` | 0.1 | Highest acceptable share of bad statuses |
/// | `max_iterations` | 10 | Trials to run |
/// | `bad_status_codes` | `[429, 500]` | Statuses counted as overload |
/// | `request_timeout` | none | Per-request client timeout |
/// | `precision` | none | Stop early once `max_rate - min_rate` drops below this |
///
/// # Example
///
/// ```rust
/// use throttle_optimizer::search::RateSearchSettings;
///
/// let settings = RateSearchSettings::builder()
///     .min_rate(5.0)
///     .max_rate(500.0)
///     .concurrency(16)
///     .max_iterations(12)
///     .build();
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Builder, Deserialize, Serialize)]
pub struct RateSearchSettings {
    #[builder(default = default_min_rate())]
    #[serde(default = "default_min_rate")]
    pub(crate) min_rate: f64,

    #[builder(default = default_max_rate())]
    #[serde(default = "default_max_rate")]
    pub(crate) max_rate: f64,

    #[builder(default = default_concurrency())]
    #[serde(default = "default_concurrency")]
    pub(crate) concurrency: usize,

    #[builder(default = default_threshold())]
    #[serde(default = "default_threshold")]
    pub(crate) error_threshold: f64,

    #[builder(default = default_threshold())]
    #[serde(default = "default_threshold")]
    pub(crate) bad_status_threshold: f64,

    #[builder(default = default_max_iterations())]
    #[serde(default = "default_max_iterations")]
    pub(crate) max_iterations: usize,

    /// Statuses treated as evidence of overload.
    #[builder(default = default_bad_status_codes())]
    #[serde(default = "default_bad_status_codes")]
    pub(crate) bad_status_codes: Vec<u16>,

    /// Given in seconds in serialized form.
    #[serde(default, with = "optional_secs")]
    pub(crate) request_timeout: Option<Duration>,

    /// Optional convergence floor. Without it every iteration runs.
    #[serde(default)]
    pub(crate) precision: Option<f64>,
}

const fn default_min_rate() -> f64 {
    1.0
}

const fn default_max_rate() -> f64 {
    100.0
}

const fn default_concurrency() -> usize {
    5
}

const fn default_threshold() -> f64 {
    0.1
}

const fn default_max_iterations() -> usize {
    10
}

fn default_bad_status_codes() -> Vec<u16> {
    vec![429, 500]
}

impl Default for RateSearchSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RateSearchSettings {
    pub fn min_rate(&self) -> f64 {
        self.min_rate
    }

    pub fn max_rate(&self) -> f64 {
        self.max_rate
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn bad_status_codes(&self) -> &[u16] {
        &self.bad_status_codes
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        for (name, rate) in [("min_rate", self.min_rate), ("max_rate", self.max_rate)] {
            ensure!(
                rate.is_finite() && rate > 0.0,
                InvalidSettingsSnafu {
                    reason: format!("{name} must be positive and finite, got {rate}"),
                }
            );
        }
        ensure!(
            self.min_rate <= self.max_rate,
            InvalidSettingsSnafu {
                reason: format!(
                    "min_rate ({}) must not exceed max_rate ({})",
                    self.min_rate, self.max_rate
                ),
            }
        );
        ensure!(
            self.concurrency > 0,
            InvalidSettingsSnafu {
                reason: "concurrency must be at least 1",
            }
        );
        for (name, threshold) in [
            ("error_threshold", self.error_threshold),
            ("bad_status_threshold", self.bad_status_threshold),
        ] {
            ensure!(
                (0.0..=1.0).contains(&threshold),
                InvalidSettingsSnafu {
                    reason: format!("{name} must lie in [0, 1], got {threshold}"),
                }
            );
        }
        ensure!(
            self.max_iterations > 0,
            InvalidSettingsSnafu {
                reason: "max_iterations must be at least 1",
            }
        );
        if let Some(precision) = self.precision {
            ensure!(
                precision.is_finite() && precision > 0.0,
                InvalidSettingsSnafu {
                    reason: format!("precision must be positive and finite, got {precision}"),
                }
            );
        }
        Ok(())
    }

    /// Judges one trial against the acceptance conditions.
    ///
    /// A trial without any successful request is not evaluated at all; it is
    /// reported as [`Verdict::NoSuccessfulRequests`].
    pub fn evaluate(&self, stats: &TrialStats, latency_threshold: f64) -> Verdict {
        let Some(latency) = stats.latency else {
            return Verdict::NoSuccessfulRequests;
        };

        let mut reasons = Vec::new();
        if latency.mean > latency_threshold {
            reasons.push(Rejection::Latency {
                mean: latency.mean,
                threshold: latency_threshold,
            });
        }
        if stats.error_rate > self.error_threshold {
            reasons.push(Rejection::ErrorRate {
                error_rate: stats.error_rate,
                threshold: self.error_threshold,
            });
        }
        let bad_status_rate = stats.status_rate(&self.bad_status_codes);
        if bad_status_rate > self.bad_status_threshold {
            reasons.push(Rejection::BadStatus {
                bad_status_rate,
                threshold: self.bad_status_threshold,
            });
        }

        if reasons.is_empty() {
            Verdict::Accepted
        } else {
            Verdict::Rejected(reasons)
        }
    }
}

mod optional_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub(super) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
            .transpose()
    }
}

/// How long a request may take, on average, at a given rate and concurrency
/// before the rate counts as unsustainable.
pub trait LatencyBudget: fmt::Debug {
    /// Threshold in seconds.
    fn latency_threshold(&self, rate: f64, concurrency: usize) -> f64;
}

/// `concurrency / rate`: the time each in-flight slot has per request if the
/// pacing holds at that rate.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConcurrencyOverRate;

impl LatencyBudget for ConcurrencyOverRate {
    fn latency_threshold(&self, rate: f64, concurrency: usize) -> f64 {
        concurrency as f64 / rate
    }
}

/// The same latency budget for every candidate rate.
#[derive(Clone, Copy, Debug)]
pub struct FixedLatencyBudget(pub Duration);

impl LatencyBudget for FixedLatencyBudget {
    fn latency_threshold(&self, _rate: f64, _concurrency: usize) -> f64 {
        self.0.as_secs_f64()
    }
}

/// Why a trial was rejected. One entry per violated condition.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum Rejection {
    Latency { mean: f64, threshold: f64 },
    ErrorRate { error_rate: f64, threshold: f64 },
    BadStatus { bad_status_rate: f64, threshold: f64 },
}

/// Outcome of judging one trial.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "verdict", content = "reasons", rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected(Vec<Rejection>),
    /// Every request failed; there is no latency to judge.
    NoSuccessfulRequests,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Accepted => "accepted",
            Verdict::Rejected(_) => "rejected",
            Verdict::NoSuccessfulRequests => "no_successful_requests",
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SearchError {
    #[snafu(display("Invalid rate search settings: {}", reason))]
    InvalidSettings { reason: String },

    /// The HTTP client for a trial could not be created.
    #[snafu(display("Failed to create HTTP client: {}", source))]
    ClientInit { source: CrateError },

    #[snafu(display("Trial could not start: {}", source))]
    Trial { source: TrialError },
}
