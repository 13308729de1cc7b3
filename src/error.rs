//! Failure taxonomy for the dispatch pipeline.
//!
//! # Layers
//! - [`Failure`]: what a single attempt produced (transport, status, timeout, decode).
//! - [`Error`]: what the caller of a logical call receives once retries,
//!   circuit breaking and fallbacks have had their say.
//!
//! Retry and circuit-breaker decisions only ever look at [`Failure`], never at
//! raw transport errors.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of transport-level errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Connection could not be established (refused, DNS, unreachable).
    Connect,
    /// Connection broke while sending or receiving.
    Io,
    /// Malformed exchange.
    Protocol,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Connect => "connect",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Other => "other",
        };
        f.write_str(text)
    }
}

/// Whether a failure counts against circuit-breaker health.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    Counted,
    /// The remote answered but rejected the request (client errors).
    Ignored,
}

/// Snapshot of a response that was classified as a failure.
#[derive(Debug)]
pub struct StatusFailure {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    retry_after: Option<Duration>,
    ignored: bool,
}

impl StatusFailure {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            retry_after: None,
            ignored: false,
        }
    }

    /// Attach a server-provided retry hint.
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Mark the failure as not counting against breaker health.
    pub fn ignored(mut self, ignored: bool) -> Self {
        self.ignored = ignored;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored
    }
}

/// Outcome of one failed attempt.
#[derive(Debug, Error)]
pub enum Failure {
    #[error("transport failure ({kind}): {source}")]
    Transport {
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },
    #[error("unexpected http status {}", .0.status())]
    Status(StatusFailure),
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to decode response body: {0}")]
    Decoded(#[source] BoxError),
}

impl Failure {
    pub fn transport(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            kind,
            source: source.into(),
        }
    }

    pub fn decoded(source: impl Into<BoxError>) -> Self {
        Self::Decoded(source.into())
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status(failure) => Some(failure.status()),
            _ => None,
        }
    }

    /// Server-provided delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status(failure) => failure.retry_after(),
            _ => None,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::Status(failure) if failure.is_ignored() => FailureClass::Ignored,
            _ => FailureClass::Counted,
        }
    }

    /// Whether this failure says something about the endpoint itself
    /// (as opposed to the request).
    pub fn affects_endpoint_health(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout(_) => true,
            Self::Status(failure) => matches!(
                failure.status(),
                StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
            Self::Decoded(_) => false,
        }
    }
}

/// A fallback that raised, carrying the failure that triggered it.
///
/// Source chain: fallback error → primary error.
#[derive(Debug, Error)]
#[error("fallback raised: {error}")]
pub struct FallbackFailure {
    error: BoxError,
    #[source]
    primary: Box<Error>,
}

impl FallbackFailure {
    pub fn new(error: BoxError, primary: Error) -> Self {
        Self {
            error,
            primary: Box::new(primary),
        }
    }

    /// The error raised by the fallback itself.
    pub fn fallback_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.error.as_ref()
    }

    /// The failure of the real call that triggered the fallback.
    pub fn primary(&self) -> &Error {
        &self.primary
    }
}

/// Terminal error of a logical call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Single attempt failure surfaced without retry wrapping (retries disabled).
    #[error(transparent)]
    Failure(#[from] Failure),
    #[error("out of retries after {attempts} attempts")]
    OutOfRetries {
        attempts: u32,
        #[source]
        last: Failure,
    },
    #[error("out of retries on endpoint {endpoint} after {attempts} attempts")]
    OutOfRetriesSame {
        endpoint: String,
        attempts: u32,
        #[source]
        last: Failure,
    },
    #[error("out of retries after {attempts} attempts across {endpoints} endpoints")]
    OutOfRetriesSameThenNext {
        endpoints: usize,
        attempts: u32,
        #[source]
        last: Failure,
    },
    #[error("command {command_key} short-circuited: circuit is open")]
    ShortCircuited { command_key: String },
    #[error("fallback for command {command_key} failed")]
    FallbackFailed {
        command_key: String,
        #[source]
        source: FallbackFailure,
    },
    #[error("no endpoints available for service {service}")]
    NoEndpoints { service: String },
    #[error("no handler registered for method {0}")]
    UnknownMethod(String),
    #[error("fallback registered for method {method_key} does not produce the requested type")]
    FallbackType { method_key: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid client configuration: {0}")]
    Config(String),
    #[error("call cancelled")]
    Cancelled,
}

impl Error {
    /// The innermost attempt failure, when the call got as far as an attempt.
    pub fn last_failure(&self) -> Option<&Failure> {
        match self {
            Self::Failure(failure)
            | Self::OutOfRetries { last: failure, .. }
            | Self::OutOfRetriesSame { last: failure, .. }
            | Self::OutOfRetriesSameThenNext { last: failure, .. } => Some(failure),
            Self::FallbackFailed { source, .. } => source.primary().last_failure(),
            _ => None,
        }
    }

    /// Classification reported to the circuit breaker.
    ///
    /// Errors raised before anything was sent (bad arguments, unknown
    /// methods) say nothing about the remote and are ignored.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::InvalidRequest(_)
            | Self::UnknownMethod(_)
            | Self::FallbackType { .. }
            | Self::Config(_)
            | Self::Cancelled => FailureClass::Ignored,
            _ => self
                .last_failure()
                .map(Failure::class)
                .unwrap_or(FailureClass::Counted),
        }
    }

    pub fn is_short_circuited(&self) -> bool {
        matches!(self, Self::ShortCircuited { .. })
    }

    pub fn is_out_of_retries(&self) -> bool {
        matches!(
            self,
            Self::OutOfRetries { .. }
                | Self::OutOfRetriesSame { .. }
                | Self::OutOfRetriesSameThenNext { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn status_failure(status: u16, ignored: bool) -> Failure {
        Failure::Status(
            StatusFailure::new(
                StatusCode::from_u16(status).unwrap(),
                HeaderMap::new(),
                Bytes::new(),
            )
            .ignored(ignored),
        )
    }

    #[test]
    fn ignored_status_is_not_counted() {
        assert_eq!(status_failure(404, true).class(), FailureClass::Ignored);
        assert_eq!(status_failure(503, false).class(), FailureClass::Counted);
    }

    #[test]
    fn only_gateway_statuses_affect_endpoint_health() {
        assert!(status_failure(503, false).affects_endpoint_health());
        assert!(!status_failure(500, false).affects_endpoint_health());
        assert!(Failure::Timeout(Duration::from_secs(1)).affects_endpoint_health());
    }

    #[test]
    fn fallback_failure_keeps_both_causes() {
        let primary = Error::OutOfRetries {
            attempts: 2,
            last: status_failure(503, false),
        };
        let err = Error::FallbackFailed {
            command_key: "Users#get()".into(),
            source: FallbackFailure::new("cache offline".into(), primary),
        };

        let cause = err.source().expect("fallback failure");
        assert!(cause.to_string().contains("cache offline"));
        let cause_of_cause = cause.source().expect("primary failure");
        assert!(cause_of_cause.to_string().contains("out of retries"));
        assert_eq!(
            err.last_failure().and_then(Failure::status),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
    }
}
