//! Run one paced, concurrent trial against a fixed list of URLs.

mod scheduler;
mod stats;
mod throttler;
mod worker;

pub mod http;
pub mod internal_event;
pub mod reqwest_integration;

pub use scheduler::{TokenScheduler, Tokens};
pub use stats::{LatencySummary, StatsAggregator, StatusDistribution, TrialStats};
pub use throttler::{Throttler, TrialError, TrialReport};
pub use worker::{
    Timeline, TimelineEntry, WorkItem, WorkQueue, WorkerAssignments, WorkerPool, WorkerTimelines,
};

fn instant_now() -> std::time::Instant {
    tokio::time::Instant::now().into()
}
