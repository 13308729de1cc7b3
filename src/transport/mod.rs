//! Transport boundary.
//!
//! # Responsibilities
//! - Execute exactly one attempt: `ConcreteRequest` in, `Response` or `Failure` out
//! - Never retry, never classify statuses (the filter chain does that)
//!
//! # Adapters
//! - `hyper_client.rs`: default transport over hyper-util's pooled client
//! - `ServiceTransport`: any tower `Service`
//! - `transport_fn`: closures, mostly for tests and in-process fakes

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tower::{Service, ServiceExt};

use crate::error::Failure;
use crate::http::{ConcreteRequest, Response};

pub mod hyper_client;

pub use hyper_client::HyperTransport;

/// Single-attempt HTTP exchange.
pub trait Transport: Send + Sync + 'static {
    fn invoke(&self, request: ConcreteRequest) -> BoxFuture<'static, Result<Response, Failure>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn invoke(&self, request: ConcreteRequest) -> BoxFuture<'static, Result<Response, Failure>> {
        (**self).invoke(request)
    }
}

/// Transport backed by a closure.
pub struct TransportFn<F> {
    f: F,
}

pub fn transport_fn<F, Fut>(f: F) -> TransportFn<F>
where
    F: Fn(ConcreteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Failure>> + Send + 'static,
{
    TransportFn { f }
}

impl<F, Fut> Transport for TransportFn<F>
where
    F: Fn(ConcreteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Failure>> + Send + 'static,
{
    fn invoke(&self, request: ConcreteRequest) -> BoxFuture<'static, Result<Response, Failure>> {
        Box::pin((self.f)(request))
    }
}

/// Adapts a tower `Service` into a transport.
///
/// The service is cloned per attempt and driven with `oneshot`, so readiness
/// is awaited before each call.
#[derive(Clone)]
pub struct ServiceTransport<S> {
    inner: S,
}

impl<S> ServiceTransport<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S> Transport for ServiceTransport<S>
where
    S: Service<ConcreteRequest, Response = Response, Error = Failure>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    fn invoke(&self, request: ConcreteRequest) -> BoxFuture<'static, Result<Response, Failure>> {
        Box::pin(self.inner.clone().oneshot(request))
    }
}
