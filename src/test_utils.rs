use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use http::StatusCode;
use reqwest::Url;
use tower::Service;

use crate::throttle::http::{Completion, HttpError};

type Script = dyn Fn(&Url) -> Result<Completion, HttpError> + Send + Sync;

/// `n` distinct targets: `http://probe.test/0` .. `http://probe.test/{n-1}`.
pub(crate) fn urls(n: usize) -> Vec<Url> {
    (0..n)
        .map(|i| Url::parse(&format!("http://probe.test/{i}")).unwrap())
        .collect()
}

/// A deterministic HTTP collaborator. Each call runs the script for the URL
/// and, on success, sleeps for the scripted latency before answering.
#[derive(Clone)]
pub(crate) struct ScriptedService {
    script: Arc<Script>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedService {
    pub(crate) fn new(
        script: impl Fn(&Url) -> Result<Completion, HttpError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Arc::new(script),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn always(status: StatusCode, latency: Duration) -> Self {
        Self::new(move |_| Ok(Completion::new(status, latency)))
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Service<Url> for ScriptedService {
    type Response = Completion;
    type Error = HttpError;
    type Future = BoxFuture<'static, Result<Completion, HttpError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, url: Url) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = (self.script)(&url);
        Box::pin(async move {
            let completion = outcome?;
            tokio::time::sleep(completion.elapsed).await;
            Ok(completion)
        })
    }
}
