//! Work queue, per-trial timeline and the pool of request workers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use reqwest::Url;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinSet;
use tower::{Service, ServiceExt};

use super::http::Completion;
use super::instant_now;
use super::internal_event::{
    InternalEventHandle, RegisterInternalEvent, RequestCompleted, RequestCompletedHandle,
    RequestFailed, RequestFailedHandle,
};
use super::scheduler::Tokens;
use super::stats::StatsAggregator;
use crate::Error as CrateError;

/// One request target, consumed exactly once per trial.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub url: Url,
}

impl From<Url> for WorkItem {
    fn from(url: Url) -> Self {
        Self { url }
    }
}

/// FIFO of work items with `task_done`/`join` acknowledgement tracking.
///
/// The queue stays open for its whole lifetime, so [`WorkQueue::next`] waits
/// while it is empty instead of returning `None`. Receiving is cancel safe: an
/// item is either handed to the caller or stays queued.
#[derive(Debug)]
pub struct WorkQueue {
    sender: mpsc::UnboundedSender<WorkItem>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<WorkItem>>,
    unfinished: watch::Sender<usize>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (unfinished, _) = watch::channel(0);
        Self {
            sender,
            receiver: AsyncMutex::new(receiver),
            unfinished,
        }
    }

    pub fn from_urls(urls: impl IntoIterator<Item = Url>) -> Self {
        let queue = Self::new();
        for url in urls {
            queue.push(WorkItem::from(url));
        }
        queue
    }

    pub fn push(&self, item: WorkItem) {
        self.unfinished.send_modify(|n| *n += 1);
        // The receiver lives as long as the queue, so this cannot fail.
        let _ = self.sender.send(item);
    }

    /// Waits for the next item.
    pub async fn next(&self) -> Option<WorkItem> {
        self.receiver.lock().await.recv().await
    }

    /// Acknowledges one item handed out by [`WorkQueue::next`].
    pub fn task_done(&self) {
        self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Items pushed but not yet acknowledged.
    pub fn unfinished(&self) -> usize {
        *self.unfinished.borrow()
    }

    /// Resolves once every pushed item has been acknowledged.
    pub async fn join(&self) {
        let mut unfinished = self.unfinished.subscribe();
        // The sender is owned by `self`, so the channel cannot close under us.
        let _ = unfinished.wait_for(|n| *n == 0).await;
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A successful request on a worker's timeline, in seconds relative to the
/// start of the first request of the trial that completed successfully.
///
/// Offsets may be negative for requests that started before that reference.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub url: String,
    pub start: f64,
    pub end: f64,
}

/// Worker id to the requests that worker completed, in completion order.
pub type WorkerTimelines = BTreeMap<usize, Vec<TimelineEntry>>;

/// Worker id to every URL that worker took off the queue, failed or not.
pub type WorkerAssignments = BTreeMap<usize, Vec<String>>;

/// Diagnostic record of when each worker's requests ran.
///
/// The reference instant is assigned exactly once per trial, by whichever
/// worker completes a request successfully first. Assignments are tracked
/// separately and include requests that failed.
#[derive(Debug, Default)]
pub struct Timeline {
    reference: OnceLock<Instant>,
    entries: Mutex<WorkerTimelines>,
    handled: Mutex<WorkerAssignments>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, worker_id: usize, url: &Url, started: Instant, finished: Instant) {
        let reference = *self.reference.get_or_init(|| started);
        let entry = TimelineEntry {
            url: url.to_string(),
            start: offset_secs(reference, started),
            end: offset_secs(reference, finished),
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(worker_id)
            .or_default()
            .push(entry);
    }

    pub fn record_handled(&self, worker_id: usize, url: &Url) {
        self.handled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(worker_id)
            .or_default()
            .push(url.to_string());
    }

    pub fn reference(&self) -> Option<Instant> {
        self.reference.get().copied()
    }

    pub fn snapshot(&self) -> WorkerTimelines {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn handled(&self) -> WorkerAssignments {
        self.handled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn offset_secs(reference: Instant, at: Instant) -> f64 {
    if at >= reference {
        (at - reference).as_secs_f64()
    } else {
        -(reference - at).as_secs_f64()
    }
}

/// `concurrency` tokio tasks draining a shared [`WorkQueue`].
///
/// Each worker loops: take an item, take a pacing token, call the service,
/// record the outcome, acknowledge the item.
#[derive(Debug)]
pub struct WorkerPool {
    workers: JoinSet<()>,
}

impl WorkerPool {
    pub fn spawn<S>(
        concurrency: usize,
        service: S,
        queue: Arc<WorkQueue>,
        tokens: Tokens,
        stats: Arc<StatsAggregator>,
        timeline: Arc<Timeline>,
    ) -> Self
    where
        S: Service<Url, Response = Completion> + Clone + Send + 'static,
        S::Error: Into<CrateError>,
        S::Future: Send,
    {
        let mut workers = JoinSet::new();
        for id in 0..concurrency {
            let worker = Worker {
                id,
                service: service.clone(),
                queue: Arc::clone(&queue),
                tokens: tokens.clone(),
                stats: Arc::clone(&stats),
                timeline: Arc::clone(&timeline),
                completed: RequestCompleted.register(),
                failed: RequestFailed.register(),
            };
            workers.spawn(worker.run());
        }
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Cancels every worker and waits for them to unwind.
    ///
    /// Outcomes already recorded are unaffected, and an item a worker was
    /// holding is dropped rather than handed out again.
    pub async fn shutdown(mut self) {
        self.workers.shutdown().await;
    }
}

struct Worker<S> {
    id: usize,
    service: S,
    queue: Arc<WorkQueue>,
    tokens: Tokens,
    stats: Arc<StatsAggregator>,
    timeline: Arc<Timeline>,
    completed: RequestCompletedHandle,
    failed: RequestFailedHandle,
}

impl<S> Worker<S>
where
    S: Service<Url, Response = Completion> + Send,
    S::Error: Into<CrateError>,
    S::Future: Send,
{
    async fn run(mut self) {
        trace!(worker_id = self.id, "Worker started");

        while let Some(item) = self.queue.next().await {
            self.timeline.record_handled(self.id, &item.url);
            if self.tokens.acquire().await.is_err() {
                debug!(worker_id = self.id, "Token scheduler stopped; worker exiting");
                return;
            }
            self.execute(&item).await;
            self.queue.task_done();
        }
    }

    async fn execute(&mut self, item: &WorkItem) {
        let started = instant_now();
        let ready: Result<&mut S, CrateError> = self.service.ready().await.map_err(Into::into);
        let result: Result<Completion, CrateError> = match ready {
            Ok(service) => service.call(item.url.clone()).await.map_err(Into::into),
            Err(error) => Err(error),
        };
        let finished = instant_now();

        match result {
            Ok(completion) => {
                self.stats.record_success(completion.status, completion.elapsed);
                self.timeline.record(self.id, &item.url, started, finished);
                self.completed.emit(completion);
                debug!(
                    worker_id = self.id,
                    url = %item.url,
                    status = completion.status.as_u16(),
                    latency_ms = completion.elapsed.as_secs_f64() * 1000.0,
                    "Request completed"
                );
            }
            Err(error) => {
                self.stats.record_failure();
                self.failed.emit(self.id);
                warn!(worker_id = self.id, url = %item.url, %error, "Request failed");
            }
        }
    }
}
