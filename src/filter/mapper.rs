//! Response and error mapping stages.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::error::Failure;
use crate::filter::{Invocation, Stage};
use crate::http::{ConcreteRequest, Response};

/// Rewrites a successful response, or turns it into a failure.
pub trait ResponseMapper: Send + Sync + 'static {
    fn map<'a>(&'a self, response: Response) -> BoxFuture<'a, Result<Response, Failure>>;
}

pub struct ResponseMapperFn<F> {
    f: F,
}

pub fn response_mapper_fn<F, Fut>(f: F) -> ResponseMapperFn<F>
where
    F: Fn(Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Failure>> + Send + 'static,
{
    ResponseMapperFn { f }
}

impl<F, Fut> ResponseMapper for ResponseMapperFn<F>
where
    F: Fn(Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Failure>> + Send + 'static,
{
    fn map<'a>(&'a self, response: Response) -> BoxFuture<'a, Result<Response, Failure>> {
        Box::pin((self.f)(response))
    }
}

pub struct ResponseMapStage {
    name: String,
    mapper: Arc<dyn ResponseMapper>,
}

impl ResponseMapStage {
    pub fn new(name: impl Into<String>, mapper: Arc<dyn ResponseMapper>) -> Self {
        Self {
            name: name.into(),
            mapper,
        }
    }
}

impl Stage for ResponseMapStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn wrap(&self, next: Invocation) -> Invocation {
        let mapper = self.mapper.clone();
        Arc::new(move |request: ConcreteRequest| {
            let mapper = mapper.clone();
            let next = next.clone();
            async move {
                let response = next(request).await?;
                mapper.map(response).await
            }
            .boxed()
        })
    }
}

/// Rewrites a failure on its way out. Mapping is synchronous and total.
pub trait ErrorMapper: Send + Sync + 'static {
    fn map_failure(&self, failure: Failure) -> Failure;
}

impl<F> ErrorMapper for F
where
    F: Fn(Failure) -> Failure + Send + Sync + 'static,
{
    fn map_failure(&self, failure: Failure) -> Failure {
        self(failure)
    }
}

pub struct ErrorMapStage {
    name: String,
    mapper: Arc<dyn ErrorMapper>,
}

impl ErrorMapStage {
    pub fn new(name: impl Into<String>, mapper: Arc<dyn ErrorMapper>) -> Self {
        Self {
            name: name.into(),
            mapper,
        }
    }
}

impl Stage for ErrorMapStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn wrap(&self, next: Invocation) -> Invocation {
        let mapper = self.mapper.clone();
        Arc::new(move |request: ConcreteRequest| {
            let mapper = mapper.clone();
            next(request)
                .map(move |result| result.map_err(|failure| mapper.map_failure(failure)))
                .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use crate::filter::FilterChain;
    use crate::http::MethodKey;
    use crate::transport::transport_fn;
    use http::{Method, StatusCode};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn request() -> ConcreteRequest {
        ConcreteRequest::new(
            MethodKey::new("Orders", "list()"),
            Method::GET,
            "http://localhost/orders".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn response_mapper_rewrites_status() {
        let chain = FilterChain::new().stage(ResponseMapStage::new(
            "accepted-is-ok",
            Arc::new(response_mapper_fn(|response: Response| async move {
                let (status, headers, body) = response.into_parts();
                let status = if status == StatusCode::ACCEPTED { StatusCode::OK } else { status };
                Ok(Response::new(status, headers, body))
            })),
        ));
        let transport = Arc::new(transport_fn(|_req: ConcreteRequest| async {
            Ok(Response::with_status(StatusCode::ACCEPTED, ""))
        }));

        let response = chain.build(transport)(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn response_mapper_is_skipped_on_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let chain = FilterChain::new().stage(ResponseMapStage::new(
            "count",
            Arc::new(response_mapper_fn(move |response: Response| {
                seen.fetch_add(1, Ordering::SeqCst);
                async move { Ok(response) }
            })),
        ));
        let transport = Arc::new(transport_fn(|_req: ConcreteRequest| async {
            Err(Failure::Timeout(Duration::from_millis(5)))
        }));

        assert!(chain.build(transport)(request()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn error_mapper_rewrites_failure() {
        let chain = FilterChain::new().stage(ErrorMapStage::new(
            "timeouts-are-io",
            Arc::new(|failure: Failure| match failure {
                Failure::Timeout(_) => Failure::transport(TransportErrorKind::Io, "deadline"),
                other => other,
            }),
        ));
        let transport = Arc::new(transport_fn(|_req: ConcreteRequest| async {
            Err(Failure::Timeout(Duration::from_millis(5)))
        }));

        let failure = chain.build(transport)(request()).await.unwrap_err();
        assert!(matches!(
            failure,
            Failure::Transport { kind: TransportErrorKind::Io, .. }
        ));
    }
}
