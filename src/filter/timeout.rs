//! Opt-in per-attempt deadline.
//!
//! Transports normally own the deadline (`HyperTransport` maps its own
//! request timeout). This stage is for transports that have none.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::FutureExt;

use crate::error::Failure;
use crate::filter::{Invocation, Stage};
use crate::http::ConcreteRequest;

#[derive(Debug, Clone, Copy)]
pub struct TimeoutStage {
    limit: Duration,
}

impl TimeoutStage {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }
}

impl Stage for TimeoutStage {
    fn name(&self) -> &str {
        "timeout"
    }

    fn wrap(&self, next: Invocation) -> Invocation {
        let limit = self.limit;
        Arc::new(move |request: ConcreteRequest| {
            tokio::time::timeout(limit, next(request))
                .map(move |outcome| outcome.unwrap_or(Err(Failure::Timeout(limit))))
                .boxed()
        })
    }
}
