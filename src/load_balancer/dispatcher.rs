//! Load-balanced dispatch with retry-on-same and retry-on-next.
//!
//! # Data Flow
//! ```text
//! RequestDescriptor
//!     → pool.snapshot() (empty → NoEndpoints, no attempt)
//!     → select endpoint (healthy first, strategy decides)
//!     → resolve fresh ConcreteRequest → invocation (filter chain + transport)
//!     → finish(response) (e.g. read the body) while the attempt is in flight
//!     → Ok → mark healthy → value
//!     → Err(failure)
//!         → retry_same permits? sleep, same endpoint
//!         → other endpoint exists and retry_next permits? sleep, switch,
//!           reset the same-endpoint count
//!         → terminal error
//! ```
//!
//! # Design Decisions
//! - Untried endpoints are preferred when switching; tried ones are only
//!   reused once every endpoint has been tried
//! - With a single endpoint, retry-on-next is never consulted
//! - Both policies disabled: the raw failure surfaces unwrapped
//! - A failure while finishing the response counts as a failure of the
//!   attempt, for retries and for endpoint health

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use url::Url;

use crate::config::schema::HealthConfig;
use crate::error::{Error, Failure, Result};
use crate::filter::Invocation;
use crate::http::{RequestDescriptor, Response};
use crate::load_balancer::endpoint::Endpoint;
use crate::load_balancer::pool::EndpointPool;
use crate::load_balancer::LoadBalancer;
use crate::observability::metrics;
use crate::resilience::retries::{RetryDecision, RetryPolicy};

pub struct LoadBalancedDispatcher {
    pool: EndpointPool,
    balancer: Arc<dyn LoadBalancer>,
    invocation: Invocation,
    retry_same: Arc<dyn RetryPolicy>,
    retry_next: Arc<dyn RetryPolicy>,
    health: HealthConfig,
}

impl std::fmt::Debug for LoadBalancedDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancedDispatcher")
            .field("service", &self.pool.service())
            .field("retry_same", &self.retry_same)
            .field("retry_next", &self.retry_next)
            .finish()
    }
}

/// Progress of one logical call across endpoints.
struct DispatchState {
    attempts: u32,
    same_failures: u32,
    next_failures: u32,
    tried: Vec<Url>,
}

impl DispatchState {
    fn remember(&mut self, url: &Url) {
        if !self.tried.contains(url) {
            self.tried.push(url.clone());
        }
    }
}

impl LoadBalancedDispatcher {
    pub fn new(
        pool: EndpointPool,
        balancer: Arc<dyn LoadBalancer>,
        invocation: Invocation,
        retry_same: Arc<dyn RetryPolicy>,
        retry_next: Arc<dyn RetryPolicy>,
        health: HealthConfig,
    ) -> Self {
        Self {
            pool,
            balancer,
            invocation,
            retry_same,
            retry_next,
            health,
        }
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    /// Healthy candidates when any exist, otherwise all of them.
    fn select(&self, candidates: Vec<Arc<Endpoint>>) -> Option<Arc<Endpoint>> {
        let healthy: Vec<Arc<Endpoint>> = candidates.iter().filter(|e| e.is_healthy()).cloned().collect();
        if healthy.is_empty() {
            self.balancer.next_endpoint(&candidates)
        } else {
            self.balancer.next_endpoint(&healthy)
        }
    }

    /// Pick an endpoint other than `current`, preferring untried ones.
    fn alternative(&self, current: &Url, tried: &[Url]) -> Option<Arc<Endpoint>> {
        let others: Vec<Arc<Endpoint>> = self
            .pool
            .snapshot()
            .into_iter()
            .filter(|e| e.url() != current)
            .collect();
        let untried: Vec<Arc<Endpoint>> = others
            .iter()
            .filter(|e| !tried.contains(e.url()))
            .cloned()
            .collect();

        if untried.is_empty() {
            self.select(others)
        } else {
            self.select(untried)
        }
    }

    fn record_outcome(&self, endpoint: &Endpoint, failure: Option<&Failure>) {
        match failure {
            Some(failure) if failure.affects_endpoint_health() => {
                endpoint.mark_failure(self.health.unhealthy_threshold as usize)
            }
            _ => endpoint.mark_success(self.health.healthy_threshold as usize),
        }
    }

    fn give_up(&self, state: &DispatchState, endpoint: &Endpoint, last: Failure) -> Error {
        if !self.retry_same.is_enabled() && !self.retry_next.is_enabled() {
            return Error::Failure(last);
        }
        if state.tried.len() > 1 {
            Error::OutOfRetriesSameThenNext {
                endpoints: state.tried.len(),
                attempts: state.attempts,
                last,
            }
        } else {
            Error::OutOfRetriesSame {
                endpoint: endpoint.url().to_string(),
                attempts: state.attempts,
                last,
            }
        }
    }

    /// Execute one logical call, handing back the response as soon as its
    /// head arrives.
    pub async fn dispatch(&self, descriptor: &RequestDescriptor) -> Result<Response> {
        self.dispatch_with(descriptor, |response: Response| async move { Ok(response) })
            .await
    }

    /// Execute one logical call, running `finish` on the response inside
    /// each attempt.
    pub async fn dispatch_with<R, F, Fut>(&self, descriptor: &RequestDescriptor, finish: F) -> Result<R>
    where
        F: Fn(Response) -> Fut,
        Fut: Future<Output = std::result::Result<R, Failure>>,
    {
        let start = Instant::now();
        let method_key = descriptor.method_key().as_str();

        let mut endpoint = self.select(self.pool.snapshot()).ok_or_else(|| {
            tracing::warn!(service = %self.pool.service(), method_key, "No endpoints available");
            Error::NoEndpoints {
                service: self.pool.service().to_string(),
            }
        })?;

        let mut state = DispatchState {
            attempts: 0,
            same_failures: 0,
            next_failures: 0,
            tried: vec![endpoint.url().clone()],
        };

        loop {
            state.attempts += 1;
            let request = descriptor.resolve(endpoint.url(), state.attempts)?;
            metrics::record_attempt(method_key, endpoint.url().as_str());

            let outcome = {
                let _in_flight = endpoint.track();
                match (self.invocation)(request).await {
                    Ok(response) => finish(response).await,
                    Err(failure) => Err(failure),
                }
            };

            let failure = match outcome {
                Ok(value) => {
                    self.record_outcome(&endpoint, None);
                    metrics::record_call_duration(method_key, "success", start);
                    return Ok(value);
                }
                Err(failure) => failure,
            };
            self.record_outcome(&endpoint, Some(&failure));

            state.same_failures += 1;
            if let RetryDecision::RetryAfter(delay) = self.retry_same.decide(&failure, state.same_failures) {
                tracing::info!(
                    method_key,
                    endpoint = %endpoint.url(),
                    attempt = state.attempts,
                    delay = ?delay,
                    error = %failure,
                    "Retrying on same endpoint"
                );
                metrics::record_retry(method_key, "same");
                tokio::time::sleep(delay).await;
                continue;
            }

            if let Some(next) = self.alternative(endpoint.url(), &state.tried) {
                state.next_failures += 1;
                if let RetryDecision::RetryAfter(delay) = self.retry_next.decide(&failure, state.next_failures) {
                    tracing::info!(
                        method_key,
                        from = %endpoint.url(),
                        to = %next.url(),
                        attempt = state.attempts,
                        delay = ?delay,
                        error = %failure,
                        "Retrying on next endpoint"
                    );
                    metrics::record_retry(method_key, "next");
                    tokio::time::sleep(delay).await;
                    state.remember(next.url());
                    state.same_failures = 0;
                    endpoint = next;
                    continue;
                }
            }

            let error = self.give_up(&state, &endpoint, failure);
            tracing::warn!(method_key, attempts = state.attempts, error = %error, "Dispatch failed");
            metrics::record_call_duration(method_key, "failure", start);
            return Err(error);
        }
    }
}
