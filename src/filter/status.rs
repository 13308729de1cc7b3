//! Status handling: turns HTTP statuses into the failure taxonomy.
//!
//! # Order
//! 1. `decode_404`: a 404 passes through with an empty body
//! 2. Registered classifiers, first matching predicate wins
//! 3. Default: 4xx/5xx become `Failure::Status`, everything else passes
//!
//! Client errors other than 429 are marked ignored so they do not count
//! against circuit-breaker health.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::future::{BoxFuture, FutureExt};
use http::{HeaderMap, StatusCode};

use crate::error::{Failure, StatusFailure};
use crate::filter::{Invocation, Stage};
use crate::http::{ConcreteRequest, Response, ResponseBody};

type StatusPredicate = Arc<dyn Fn(StatusCode) -> bool + Send + Sync>;
type StatusMapper = Arc<dyn Fn(Response) -> BoxFuture<'static, Result<Response, Failure>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct StatusHandling {
    decode_404: bool,
    classifiers: Vec<(StatusPredicate, StatusMapper)>,
}

impl StatusHandling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode_404(mut self, enabled: bool) -> Self {
        self.decode_404 = enabled;
        self
    }

    /// Register a classifier for statuses matching `predicate`.
    pub fn on<P, F, Fut>(mut self, predicate: P, mapper: F) -> Self
    where
        P: Fn(StatusCode) -> bool + Send + Sync + 'static,
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, Failure>> + Send + 'static,
    {
        let mapper: StatusMapper = Arc::new(move |response: Response| mapper(response).boxed());
        self.classifiers.push((Arc::new(predicate), mapper));
        self
    }

    async fn handle(&self, response: Response) -> Result<Response, Failure> {
        let status = response.status();
        if self.decode_404 && status == StatusCode::NOT_FOUND {
            let (status, headers, _) = response.into_parts();
            return Ok(Response::new(status, headers, ResponseBody::empty()));
        }

        if let Some((_, mapper)) = self
            .classifiers
            .iter()
            .find(|(predicate, _)| predicate(status))
        {
            return mapper(response).await;
        }

        default_classify(response).await
    }
}

impl std::fmt::Debug for StatusHandling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusHandling")
            .field("decode_404", &self.decode_404)
            .field("classifiers", &self.classifiers.len())
            .finish()
    }
}

impl Stage for StatusHandling {
    fn name(&self) -> &str {
        "status"
    }

    fn wrap(&self, next: Invocation) -> Invocation {
        let handling = Arc::new(self.clone());
        Arc::new(move |request: ConcreteRequest| {
            let handling = handling.clone();
            let next = next.clone();
            async move {
                let response = next(request).await?;
                handling.handle(response).await
            }
            .boxed()
        })
    }
}

/// 4xx/5xx → `Failure::Status` with a body snapshot and retry hint.
pub async fn default_classify(response: Response) -> Result<Response, Failure> {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return Ok(response);
    }

    let (status, headers, body) = response.into_parts();
    let body = body.bytes().await?;
    let retry_after = parse_retry_after(&headers, SystemTime::now());
    let ignored = status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS;

    Err(Failure::Status(
        StatusFailure::new(status, headers, body)
            .with_retry_after(retry_after)
            .ignored(ignored),
    ))
}

/// `Retry-After` as delta-seconds or an HTTP date relative to `now`.
pub fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}
