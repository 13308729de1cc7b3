//! Exchange logging.
//!
//! # Responsibilities
//! - Observe every attempt without altering it
//! - Hand request/response records to pluggable listeners
//! - Respect single-consumption bodies: at `Full` level a bounded prefix is
//!   copied as the consumer reads, so no chunk is held back
//!
//! # Levels
//! - `none`: nothing
//! - `basic`: method, uri, status, elapsed
//! - `headers`: basic + headers
//! - `full`: headers + body prefix (at most `max_body_bytes`)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::future::FutureExt;
use http::{HeaderMap, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};

use crate::error::Failure;
use crate::filter::{Invocation, Stage};
use crate::http::{ConcreteRequest, MethodKey, Response};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    None,
    Basic,
    Headers,
    Full,
}

/// Outbound half of an exchange.
#[derive(Debug, Clone)]
pub struct RequestLog {
    pub exchange: u64,
    pub method_key: MethodKey,
    pub method: Method,
    pub uri: Uri,
    pub attempt: u32,
    pub headers: Option<HeaderMap>,
    pub body: Option<Bytes>,
}

/// Inbound half of an exchange.
#[derive(Debug, Clone)]
pub struct ResponseLog {
    pub exchange: u64,
    pub method_key: MethodKey,
    pub status: StatusCode,
    pub elapsed: Duration,
    pub headers: Option<HeaderMap>,
    pub body: Option<Bytes>,
}

/// Receives exchange records. All methods default to no-ops.
pub trait LogListener: Send + Sync + 'static {
    fn on_request(&self, _record: &RequestLog) {}

    fn on_response(&self, _record: &ResponseLog) {}

    fn on_failure(&self, _exchange: u64, _method_key: &MethodKey, _failure: &Failure, _elapsed: Duration) {}
}

/// Emits `tracing` events at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl LogListener for TracingListener {
    fn on_request(&self, record: &RequestLog) {
        tracing::debug!(
            exchange = record.exchange,
            method_key = %record.method_key,
            method = %record.method,
            uri = %record.uri,
            attempt = record.attempt,
            headers = ?record.headers,
            body = ?record.body.as_ref().map(|b| String::from_utf8_lossy(b).into_owned()),
            "Sending request"
        );
    }

    fn on_response(&self, record: &ResponseLog) {
        tracing::debug!(
            exchange = record.exchange,
            method_key = %record.method_key,
            status = %record.status,
            elapsed = ?record.elapsed,
            headers = ?record.headers,
            body = ?record.body.as_ref().map(|b| String::from_utf8_lossy(b).into_owned()),
            "Received response"
        );
    }

    fn on_failure(&self, exchange: u64, method_key: &MethodKey, failure: &Failure, elapsed: Duration) {
        tracing::debug!(
            exchange,
            method_key = %method_key,
            elapsed = ?elapsed,
            error = %failure,
            "Exchange failed"
        );
    }
}

struct LoggingInner {
    level: LogLevel,
    max_body_bytes: usize,
    listeners: Vec<Arc<dyn LogListener>>,
    exchanges: AtomicU64,
}

/// Logging stage. Never blocks on listeners and never changes the outcome.
#[derive(Clone)]
pub struct LoggingStage {
    inner: Arc<LoggingInner>,
}

impl LoggingStage {
    pub fn new(level: LogLevel, max_body_bytes: usize, listeners: Vec<Arc<dyn LogListener>>) -> Self {
        Self {
            inner: Arc::new(LoggingInner {
                level,
                max_body_bytes,
                listeners,
                exchanges: AtomicU64::new(0),
            }),
        }
    }

    /// Number of exchanges logged so far.
    pub fn exchanges(&self) -> u64 {
        self.inner.exchanges.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for LoggingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingStage")
            .field("level", &self.inner.level)
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

impl LoggingInner {
    fn request_record(&self, exchange: u64, request: &ConcreteRequest) -> RequestLog {
        let body = (self.level >= LogLevel::Full && !request.body().is_empty()).then(|| {
            let len = request.body().len().min(self.max_body_bytes);
            request.body().slice(..len)
        });
        RequestLog {
            exchange,
            method_key: request.method_key().clone(),
            method: request.method().clone(),
            uri: request.uri().clone(),
            attempt: request.attempt(),
            headers: (self.level >= LogLevel::Headers).then(|| request.headers().clone()),
            body,
        }
    }

    fn emit(&self, record: &ResponseLog) {
        for listener in &self.listeners {
            listener.on_response(record);
        }
    }

    /// Hand the response straight back. At `Full` level the record is
    /// emitted once the body prefix is complete, as the consumer reads it.
    fn observe(this: &Arc<Self>, exchange: u64, method_key: MethodKey, response: Response, elapsed: Duration) -> Response {
        let (status, headers, body) = response.into_parts();
        let mut record = ResponseLog {
            exchange,
            method_key,
            status,
            elapsed,
            headers: (this.level >= LogLevel::Headers).then(|| headers.clone()),
            body: None,
        };

        let body = if this.level >= LogLevel::Full {
            let inner = this.clone();
            body.inspect_prefix(this.max_body_bytes, move |prefix| {
                record.body = Some(prefix);
                inner.emit(&record);
            })
        } else {
            this.emit(&record);
            body
        };

        Response::new(status, headers, body)
    }
}

impl Stage for LoggingStage {
    fn name(&self) -> &str {
        "logging"
    }

    fn wrap(&self, next: Invocation) -> Invocation {
        if self.inner.level == LogLevel::None || self.inner.listeners.is_empty() {
            return next;
        }

        let inner = self.inner.clone();
        Arc::new(move |request: ConcreteRequest| {
            let inner = inner.clone();
            let next = next.clone();
            async move {
                let exchange = inner.exchanges.fetch_add(1, Ordering::Relaxed) + 1;
                let method_key = request.method_key().clone();
                let record = inner.request_record(exchange, &request);
                for listener in &inner.listeners {
                    listener.on_request(&record);
                }

                let start = Instant::now();
                match next(request).await {
                    Ok(response) => Ok(LoggingInner::observe(&inner, exchange, method_key, response, start.elapsed())),
                    Err(failure) => {
                        for listener in &inner.listeners {
                            listener.on_failure(exchange, &method_key, &failure, start.elapsed());
                        }
                        Err(failure)
                    }
                }
            }
            .boxed()
        })
    }
}
