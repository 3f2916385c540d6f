// src/throttle/http.rs
use std::time::Duration;

use crate::Error as CrateError;
use http::StatusCode;
use snafu::Snafu;

/// What the HTTP collaborator reports for a request whose full response was read.
///
/// Any `tower::Service<Url, Response = Completion>` can drive a trial. A
/// service error (from `poll_ready` or the call itself) is counted as a
/// transport failure; an HTTP error status is *not* an error and must be
/// returned here as a normal completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    pub status: StatusCode,
    /// Time spent on the network call, body read included.
    pub elapsed: Duration,
}

impl Completion {
    pub const fn new(status: StatusCode, elapsed: Duration) -> Self {
        Self { status, elapsed }
    }
}

/// Transport-level failures raised by the bundled HTTP collaborator.
///
/// These never escape a trial: workers fold them into the error count.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HttpError {
    /// Connection refused, DNS failure, reset, protocol error.
    #[snafu(display("HTTP transport error: {}", source))]
    Transport { source: CrateError },

    /// The request or the body read exceeded the client timeout.
    #[snafu(display("HTTP request timed out"))]
    Timeout,

    /// The request could not be built from the target.
    #[snafu(display("Invalid HTTP request: {}", details))]
    InvalidRequest { details: String },

    /// The status line arrived but the body could not be read to completion.
    #[snafu(display("Failed to read response body: {}", source))]
    Body { source: CrateError },

    /// The client itself could not be constructed. Fatal for a search.
    #[snafu(display("Failed to build HTTP client: {}", source))]
    BuildClient { source: CrateError },
}

impl HttpError {
    pub const fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Timeout)
    }
}
