//! Request interceptors.
//!
//! Interceptors run once per attempt on a freshly built request, so a header
//! added here appears exactly once on every outbound attempt. A failing
//! interceptor ends the attempt before anything further down the chain runs.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};

use crate::error::{Error, Failure, Result};
use crate::filter::{Invocation, Stage};
use crate::http::ConcreteRequest;

/// Asynchronous request rewrite.
pub trait RequestInterceptor: Send + Sync + 'static {
    fn intercept<'a>(&'a self, request: ConcreteRequest) -> BoxFuture<'a, Result<ConcreteRequest, Failure>>;
}

/// Stage running one interceptor.
pub struct InterceptorStage {
    name: String,
    interceptor: Arc<dyn RequestInterceptor>,
}

impl InterceptorStage {
    pub fn new(name: impl Into<String>, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        Self {
            name: name.into(),
            interceptor,
        }
    }
}

impl Stage for InterceptorStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn wrap(&self, next: Invocation) -> Invocation {
        let interceptor = self.interceptor.clone();
        Arc::new(move |request: ConcreteRequest| {
            let interceptor = interceptor.clone();
            let next = next.clone();
            async move {
                let request = interceptor.intercept(request).await?;
                next(request).await
            }
            .boxed()
        })
    }
}

/// Sets a fixed header, replacing any value already present.
#[derive(Clone, Debug)]
pub struct HeaderInterceptor {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderInterceptor {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }
}

impl RequestInterceptor for HeaderInterceptor {
    fn intercept<'a>(&'a self, request: ConcreteRequest) -> BoxFuture<'a, Result<ConcreteRequest, Failure>> {
        Box::pin(async move { Ok(request.with_header(self.name.clone(), self.value.clone())) })
    }
}

/// Static bearer token.
#[derive(Clone)]
pub struct BearerAuth {
    value: HeaderValue,
}

impl BearerAuth {
    pub fn new(token: &str) -> Result<Self> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::InvalidRequest(format!("invalid bearer token: {e}")))?;
        value.set_sensitive(true);
        Ok(Self { value })
    }
}

impl std::fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerAuth(..)")
    }
}

impl RequestInterceptor for BearerAuth {
    fn intercept<'a>(&'a self, request: ConcreteRequest) -> BoxFuture<'a, Result<ConcreteRequest, Failure>> {
        Box::pin(async move { Ok(request.with_header(AUTHORIZATION, self.value.clone())) })
    }
}

/// Stamps a fresh UUID v4 on every attempt.
#[derive(Clone, Debug)]
pub struct RequestIdInterceptor {
    header: HeaderName,
}

impl RequestIdInterceptor {
    pub fn new() -> Self {
        Self::with_header(HeaderName::from_static("x-request-id"))
    }

    pub fn with_header(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Default for RequestIdInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestInterceptor for RequestIdInterceptor {
    fn intercept<'a>(&'a self, request: ConcreteRequest) -> BoxFuture<'a, Result<ConcreteRequest, Failure>> {
        Box::pin(async move {
            let id = uuid::Uuid::new_v4().to_string();
            Ok(match HeaderValue::from_str(&id) {
                Ok(value) => request.with_header(self.header.clone(), value),
                Err(_) => request,
            })
        })
    }
}

/// Interceptor backed by an async closure.
pub struct InterceptorFn<F> {
    f: F,
}

pub fn interceptor_fn<F, Fut>(f: F) -> InterceptorFn<F>
where
    F: Fn(ConcreteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ConcreteRequest, Failure>> + Send + 'static,
{
    InterceptorFn { f }
}

impl<F, Fut> RequestInterceptor for InterceptorFn<F>
where
    F: Fn(ConcreteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ConcreteRequest, Failure>> + Send + 'static,
{
    fn intercept<'a>(&'a self, request: ConcreteRequest) -> BoxFuture<'a, Result<ConcreteRequest, Failure>> {
        Box::pin((self.f)(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterChain;
    use crate::error::TransportErrorKind;
    use crate::http::{MethodKey, Response};
    use crate::transport::transport_fn;
    use http::{Method, StatusCode};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request() -> ConcreteRequest {
        ConcreteRequest::new(
            MethodKey::new("Users", "get()"),
            Method::GET,
            "http://localhost/users".parse().unwrap(),
        )
    }

    fn echo_header(name: &'static str) -> Arc<dyn crate::transport::Transport> {
        Arc::new(transport_fn(move |req: ConcreteRequest| async move {
            let values = req.headers().get_all(name).iter().count();
            let first = req
                .headers()
                .get(name)
                .map(|v| v.to_str().unwrap().to_string())
                .unwrap_or_default();
            Ok(Response::with_status(StatusCode::OK, format!("{values}:{first}")))
        }))
    }

    async fn body_of(invocation: Invocation) -> String {
        let body = invocation(request()).await.unwrap().into_body().bytes().await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn header_interceptor_replaces_existing_value() {
        let interceptor = HeaderInterceptor::new(
            HeaderName::from_static("x-tenant"),
            HeaderValue::from_static("acme"),
        );
        let chain = FilterChain::new()
            .stage(InterceptorStage::new("tenant", Arc::new(interceptor.clone())))
            .stage(InterceptorStage::new("tenant-again", Arc::new(interceptor)));

        assert_eq!(body_of(chain.build(echo_header("x-tenant"))).await, "1:acme");
    }

    #[tokio::test]
    async fn bearer_auth_sets_authorization() {
        let chain = FilterChain::new().stage(InterceptorStage::new(
            "auth",
            Arc::new(BearerAuth::new("s3cr3t").unwrap()),
        ));
        assert_eq!(body_of(chain.build(echo_header("authorization"))).await, "1:Bearer s3cr3t");
    }

    #[tokio::test]
    async fn request_ids_differ_between_attempts() {
        let chain = FilterChain::new().stage(InterceptorStage::new(
            "request-id",
            Arc::new(RequestIdInterceptor::new()),
        ));
        let invocation = chain.build(echo_header("x-request-id"));

        let first = body_of(invocation.clone()).await;
        let second = body_of(invocation).await;
        assert!(first.starts_with("1:"));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn closure_interceptor_runs() {
        let chain = FilterChain::new().stage(InterceptorStage::new(
            "closure",
            Arc::new(interceptor_fn(|req: ConcreteRequest| async move {
                Ok(req.with_header(HeaderName::from_static("x-from"), HeaderValue::from_static("fn")))
            })),
        ));
        assert_eq!(body_of(chain.build(echo_header("x-from"))).await, "1:fn");
    }

    #[tokio::test]
    async fn failing_interceptor_stops_the_chain() {
        let reached = Arc::new(AtomicU32::new(0));
        let seen = reached.clone();
        let transport: Arc<dyn crate::transport::Transport> = Arc::new(transport_fn(move |_req: ConcreteRequest| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(Response::with_status(StatusCode::OK, "")) }
        }));
        let chain = FilterChain::new()
            .stage(InterceptorStage::new(
                "token",
                Arc::new(interceptor_fn(|_req: ConcreteRequest| async move {
                    Err(Failure::transport(TransportErrorKind::Connect, "token endpoint unreachable"))
                })),
            ))
            .stage(InterceptorStage::new("request-id", Arc::new(RequestIdInterceptor::new())));

        let invocation = chain.build(transport);
        let err = invocation(request()).await.unwrap_err();
        assert!(matches!(
            err,
            Failure::Transport {
                kind: TransportErrorKind::Connect,
                ..
            }
        ));
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }
}
