//! Adaptive request-rate discovery for HTTP services.
//!
//! This crate finds the highest request rate a set of HTTP endpoints sustains
//! without breaking latency, error-rate and "bad status" thresholds.
//!
//! # Overview
//!
//! Two pieces work together:
//! 1. **Throttler**: runs one measured *trial*. A token scheduler paces request
//!    admissions at a fixed rate while a pool of workers drains a queue of URLs,
//!    and every outcome lands in a statistics aggregator.
//! 2. **RateSearcher**: a bounded binary search over candidate rates. Each
//!    iteration runs one trial, judges it against the configured thresholds and
//!    narrows the `[min_rate, max_rate]` bracket.
//!
//! Requests go through any `tower::Service<Url>` that yields a
//! [`throttle::http::Completion`]; [`throttle::reqwest_integration::ReqwestService`]
//! is the stock implementation.
//!
//! # Basic Usage
//! ```no_run
//! use throttle_optimizer::search::{RateSearchSettings, RateSearcher};
//! use throttle_optimizer::throttle::reqwest_integration::ReqwestService;
//! use reqwest::Url;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let urls = vec![Url::parse("http://localhost:8080/health")?; 50];
//! let settings = RateSearchSettings::builder()
//!     .min_rate(1.0)
//!     .max_rate(200.0)
//!     .concurrency(8)
//!     .build();
//!
//! let mut searcher = RateSearcher::new(urls, settings, ReqwestService::new)?;
//! let outcome = searcher.find_rate().await?;
//! println!("best rate: {:?}", outcome.best_rate());
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//! Workers run as tokio tasks on whatever runtime drives the search, so every
//! shared aggregate (counters, histograms, timelines) sits behind a lock and
//! the trial's reference start time is a single-assignment cell.
//!
//! # Metrics
//! Emits metrics through the `metrics` facade via the internal event handles
//! in [`throttle::internal_event`].
pub mod search;
pub mod throttle;
#[cfg(test)]
pub(crate) mod test_utils;

#[macro_use]
extern crate tracing;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
