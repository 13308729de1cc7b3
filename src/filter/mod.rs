//! Filter chain around the transport.
//!
//! # Data Flow
//! ```text
//! ConcreteRequest
//!     → interceptor.rs (headers, auth, request id)
//!     → mapper.rs (error mapping on the way back)
//!     → status.rs (404-as-empty, classifiers, default 4xx/5xx → Failure)
//!     → mapper.rs (response mapping)
//!     → logging.rs (observe only)
//!     → timeout.rs (opt-in)
//!     → Transport
//! ```
//!
//! # Design Decisions
//! - A chain is a plain ordered list of stages, folded once at build time
//! - The first registered stage is outermost: requests traverse stages in
//!   registration order and responses in reverse
//! - A stage that fails returns immediately; inner stages never run

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::Failure;
use crate::http::{ConcreteRequest, Response};
use crate::transport::Transport;

pub mod interceptor;
pub mod logging;
pub mod mapper;
pub mod status;
pub mod timeout;

pub use interceptor::{interceptor_fn, BearerAuth, HeaderInterceptor, InterceptorStage, RequestIdInterceptor, RequestInterceptor};
pub use logging::{LogLevel, LogListener, LoggingStage, TracingListener};
pub use mapper::{response_mapper_fn, ErrorMapStage, ErrorMapper, ResponseMapStage, ResponseMapper};
pub use status::StatusHandling;
pub use timeout::TimeoutStage;

/// A fully composed attempt: request in, response or failure out.
pub type Invocation =
    Arc<dyn Fn(ConcreteRequest) -> BoxFuture<'static, Result<Response, Failure>> + Send + Sync>;

/// One layer of the chain.
pub trait Stage: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Wrap the inner invocation.
    fn wrap(&self, next: Invocation) -> Invocation;
}

/// Ordered list of stages.
#[derive(Clone, Default)]
pub struct FilterChain {
    stages: Vec<Arc<dyn Stage>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage inside the ones already registered.
    pub fn stage<S: Stage>(self, stage: S) -> Self {
        self.stage_arc(Arc::new(stage))
    }

    pub fn stage_arc(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Concatenate two chains; `other` ends up inside `self`.
    pub fn append(mut self, other: FilterChain) -> Self {
        self.stages.extend(other.stages);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Fold the stages around `transport` into one invocation.
    pub fn build(&self, transport: Arc<dyn Transport>) -> Invocation {
        let innermost: Invocation = Arc::new(move |request: ConcreteRequest| transport.invoke(request));
        self.stages
            .iter()
            .rev()
            .fold(innermost, |next, stage| stage.wrap(next))
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
