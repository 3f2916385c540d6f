// src/throttle/reqwest_integration.rs
use super::http::{Completion, HttpError};
use futures::future::BoxFuture;
use reqwest::Url;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A `tower::Service` wrapper for `reqwest::Client` that issues a GET per URL
/// and reads the whole body before reporting the elapsed time.
#[derive(Clone, Debug)]
pub struct ReqwestService {
    client: reqwest::Client,
}

impl ReqwestService {
    /// Builds a client with reqwest's defaults (no request timeout).
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(None)
    }

    /// Builds a client whose requests, body read included, give up after `timeout`.
    pub fn with_timeout(timeout: Option<Duration>) -> Result<Self, HttpError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| HttpError::BuildClient {
            source: Box::new(e),
        })?;
        Ok(Self { client })
    }

    /// Wraps a preconfigured client, e.g. one with default headers or a proxy.
    pub fn new_with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Service<Url> for ReqwestService {
    type Response = Completion;
    type Error = HttpError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, url: Url) -> Self::Future {
        let request = self.client.get(url);

        Box::pin(async move {
            let started = super::instant_now();
            let response = request.send().await.map_err(classify_send_error)?;
            let status = response.status();

            // Latency covers the full response, not just the headers.
            response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    warn!(error = %e, "Timed out reading response body");
                    HttpError::Timeout
                } else {
                    warn!(error = %e, "Failed to read response body");
                    HttpError::Body {
                        source: Box::new(e),
                    }
                }
            })?;

            let elapsed = super::instant_now().saturating_duration_since(started);
            Ok(Completion::new(status, elapsed))
        })
    }
}

fn classify_send_error(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        warn!(error = %e, "Request timed out");
        HttpError::Timeout
    } else if e.is_builder() {
        error!(error = %e, "Could not build request");
        HttpError::InvalidRequest {
            details: e.to_string(),
        }
    } else if e.is_connect() {
        warn!(error = %e, "Connection error");
        HttpError::Transport {
            source: Box::new(e),
        }
    } else {
        warn!(error = %e, "Other reqwest error");
        HttpError::Transport {
            source: Box::new(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;
    use tower::ServiceExt;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn error_status_is_a_completion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let completion = ReqwestService::new().unwrap().oneshot(url).await.unwrap();

        assert_eq!(completion.status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn elapsed_covers_server_delay() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(50)))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let completion = ReqwestService::new().unwrap().oneshot(url).await.unwrap();

        assert_eq!(completion.status, StatusCode::OK);
        assert!(completion.elapsed >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn client_timeout_maps_to_timeout_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let service = ReqwestService::with_timeout(Some(Duration::from_millis(50))).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let error = service.oneshot(url).await.unwrap_err();

        assert!(error.is_timeout(), "unexpected error: {error}");
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        let error = ReqwestService::new().unwrap().oneshot(url).await.unwrap_err();

        assert!(matches!(error, HttpError::Transport { .. }), "unexpected error: {error}");
    }

    #[tokio::test]
    async fn preconfigured_client_is_used() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "find-rate-test"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = reqwest::Client::builder()
            .user_agent("find-rate-test")
            .build()
            .unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let completion = ReqwestService::new_with_client(client)
            .oneshot(url)
            .await
            .unwrap();

        assert_eq!(completion.status, StatusCode::NO_CONTENT);
    }
}
