//! Client facade.
//!
//! # Data Flow
//! ```text
//! client.call("UserApi#get(u64)", args)
//!     → registry.rs (template + fallback for the method key)
//!     → RequestDescriptor
//!     → Command (breaker eligibility, one report, fallback)
//!         → Router
//!             - Direct: retry engine around one fixed base URL
//!             - Balanced: LoadBalancedDispatcher (same / next)
//!         → filter chain + transport
//!     → JsonCodec (single value, or NDJSON lines for sequences)
//! ```
//!
//! # Design Decisions
//! - Methods are looked up by key in an immutable registry; nothing is
//!   generated at runtime
//! - Single values are read in full inside each attempt, so a body that
//!   breaks off is retried like a failed exchange
//! - Sequences restart from scratch on body failures; failures while
//!   establishing the response were already retried by the router
//! - `spawn` runs a call on its own task so it can be cancelled

pub mod builder;
pub mod call;
pub mod registry;

use std::future::Future;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use url::Url;

use crate::codec::JsonCodec;
use crate::error::{Error, Failure, Result};
use crate::filter::Invocation;
use crate::http::{CallArgs, RequestDescriptor, Response};
use crate::load_balancer::{EndpointPool, LoadBalancedDispatcher};
use crate::resilience::{
    retry, retry_stream, AttemptError, CircuitBreaker, Command, CommandKey, RetryPolicy, SequenceRetry,
};

pub use builder::ClientBuilder;
pub use call::CallHandle;
pub use registry::{MethodRegistry, MethodSpec};

pub(crate) enum Router {
    Direct {
        base: Url,
        invocation: Invocation,
        policy: Arc<dyn RetryPolicy>,
    },
    Balanced(LoadBalancedDispatcher),
}

impl Router {
    /// Send and hand back the response once its head arrives.
    async fn send(&self, descriptor: &RequestDescriptor) -> Result<Response> {
        self.send_with(descriptor, |response: Response| async move { Ok(response) })
            .await
    }

    /// Send and run `finish` on the response inside every attempt, so a
    /// failure while finishing is retried like any other attempt failure.
    async fn send_with<R, F, Fut>(&self, descriptor: &RequestDescriptor, finish: F) -> Result<R>
    where
        F: Fn(Response) -> Fut,
        Fut: Future<Output = std::result::Result<R, Failure>>,
    {
        match self {
            Self::Direct {
                base,
                invocation,
                policy,
            } => {
                let finish = &finish;
                retry(policy.as_ref(), descriptor.method_key().as_str(), |attempt| {
                    let request = descriptor.resolve(base, attempt);
                    let invocation = invocation.clone();
                    async move {
                        let request = request.map_err(AttemptError::Terminal)?;
                        let response = invocation(request).await.map_err(AttemptError::Retryable)?;
                        finish(response).await.map_err(AttemptError::Retryable)
                    }
                })
                .await
            }
            Self::Balanced(dispatcher) => dispatcher.dispatch_with(descriptor, finish).await,
        }
    }
}

pub(crate) struct ClientInner {
    name: String,
    router: Router,
    registry: MethodRegistry,
    breaker: Arc<dyn CircuitBreaker>,
    stage_names: Vec<String>,
    key_suffix: Option<String>,
    sequence_policy: Arc<dyn RetryPolicy>,
    sequence_mode: SequenceRetry,
}

/// A built client. Cheap to clone; clones share breaker and endpoint state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.inner.name)
            .field("stages", &self.inner.stage_names)
            .field("methods", &self.inner.registry.len())
            .finish()
    }
}

impl Client {
    pub fn builder(config: crate::config::ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.inner.registry
    }

    pub fn circuit_breaker(&self) -> &Arc<dyn CircuitBreaker> {
        &self.inner.breaker
    }

    /// Stage names, outermost first.
    pub fn stage_names(&self) -> Vec<&str> {
        self.inner.stage_names.iter().map(String::as_str).collect()
    }

    /// Endpoint pool of a load-balanced client.
    pub fn pool(&self) -> Option<&EndpointPool> {
        match &self.inner.router {
            Router::Balanced(dispatcher) => Some(dispatcher.pool()),
            Router::Direct { .. } => None,
        }
    }

    /// Breaker key for a method, including the configured suffix.
    pub fn command_key(&self, method_key: &str) -> Result<CommandKey> {
        let spec = self.inner.registry.get(method_key)?;
        Ok(self.key_for(spec))
    }

    fn key_for(&self, spec: &MethodSpec) -> CommandKey {
        let key = CommandKey::from_method_key(spec.key());
        match &self.inner.key_suffix {
            Some(suffix) => key.with_suffix(suffix),
            None => key,
        }
    }

    fn prepare<T>(&self, method_key: &str, args: CallArgs) -> Result<(RequestDescriptor, Command<T>)>
    where
        T: Clone + Send + Sync + 'static,
    {
        let spec = self.inner.registry.get(method_key)?;
        let command = Command::new(self.key_for(spec), self.inner.breaker.clone())
            .with_fallback(spec.fallback_for::<T>()?);
        let descriptor = RequestDescriptor::new(self.inner.name.as_str(), spec.key().clone(), spec.template(), args);
        Ok((descriptor, command))
    }

    /// Invoke a single-valued method and decode its JSON body.
    pub async fn call<T>(&self, method_key: &str, args: CallArgs) -> Result<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let (descriptor, command) = self.prepare::<T>(method_key, args)?;
        let router = &self.inner.router;
        command
            .execute(async {
                let body = router
                    .send_with(&descriptor, |response: Response| response.into_body().bytes())
                    .await?;
                Ok::<T, Error>(JsonCodec.decode::<T>(&body)?)
            })
            .await
    }

    /// Like `call`, for methods whose empty or 404 response (with
    /// `status.decode_404`) means "absent".
    pub async fn call_optional<T>(&self, method_key: &str, args: CallArgs) -> Result<Option<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.call::<Option<T>>(method_key, args).await
    }

    /// Run `call` on its own task.
    pub fn spawn<T>(&self, method_key: &str, args: CallArgs) -> CallHandle<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let client = self.clone();
        let method_key = method_key.to_string();
        CallHandle::spawn(async move { client.call::<T>(&method_key, args).await })
    }

    /// Invoke a sequence-valued method whose body is newline-delimited JSON.
    ///
    /// Dropping the stream cancels the call.
    pub fn stream<T>(&self, method_key: &str, args: CallArgs) -> BoxStream<'static, Result<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let (descriptor, command) = match self.prepare::<Vec<T>>(method_key, args) {
            Ok(prepared) => prepared,
            Err(error) => return stream::once(async move { Err(error) }).boxed(),
        };

        let inner = self.inner.clone();
        let descriptor = Arc::new(descriptor);
        let label = descriptor.method_key().to_string();
        let attempts = retry_stream(
            inner.sequence_policy.clone(),
            inner.sequence_mode,
            label,
            move |_attempt: u32| {
                let inner = inner.clone();
                let descriptor = descriptor.clone();
                stream::once(async move { inner.router.send(&descriptor).await })
                    .map(|sent| -> BoxStream<'static, std::result::Result<T, AttemptError>> {
                        match sent {
                            Ok(response) => JsonCodec
                                .decode_lines::<T>(response.into_body())
                                .map(|item| item.map_err(AttemptError::Retryable))
                                .boxed(),
                            Err(error) => stream::once(async move { Err(AttemptError::Terminal(error)) }).boxed(),
                        }
                    })
                    .flatten()
            },
        );
        command.execute_stream(attempts)
    }
}
