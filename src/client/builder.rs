//! Client assembly.
//!
//! # Responsibilities
//! - Validate the configuration
//! - Fold the filter chain around the transport
//! - Pick the routing mode (fixed `base_url` or load-balanced endpoints)
//! - Build retry policies, the circuit breaker and the method registry
//!
//! # Design Decisions
//! - Everything is resolved here; a built `Client` holds no builder state
//! - Stage order is fixed: interceptors, error mappers, status handling,
//!   response mappers, custom stages, logging, attempt timeout

use std::sync::Arc;
use std::time::Duration;

use crate::client::registry::{MethodRegistry, MethodSpec};
use crate::client::{Client, ClientInner, Router};
use crate::config::{validate_config, ClientConfig};
use crate::error::{Error, Result};
use crate::filter::{
    ErrorMapStage, ErrorMapper, FilterChain, InterceptorStage, LogListener, LoggingStage, RequestInterceptor,
    ResponseMapStage, ResponseMapper, Stage, StatusHandling, TimeoutStage, TracingListener,
};
use crate::filter::LogLevel;
use crate::load_balancer::{Discovery, EndpointPool, LoadBalancedDispatcher, LoadBalancer, StaticDiscovery};
use crate::resilience::{CircuitBreaker, ConsecutiveFailureBreaker, NoopCircuitBreaker};
use crate::transport::{HyperTransport, Transport};

pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    discovery: Option<Arc<dyn Discovery>>,
    balancer: Option<Arc<dyn LoadBalancer>>,
    breaker: Option<Arc<dyn CircuitBreaker>>,
    interceptors: Vec<Arc<dyn Stage>>,
    error_mappers: Vec<Arc<dyn Stage>>,
    response_mappers: Vec<Arc<dyn Stage>>,
    stages: Vec<Arc<dyn Stage>>,
    status: StatusHandling,
    listeners: Vec<Arc<dyn LogListener>>,
    methods: Vec<MethodSpec>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            discovery: None,
            balancer: None,
            breaker: None,
            interceptors: Vec::new(),
            error_mappers: Vec::new(),
            response_mappers: Vec::new(),
            stages: Vec::new(),
            status: StatusHandling::new(),
            listeners: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Replace the default `HyperTransport`.
    pub fn transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Source endpoints from `discovery` instead of the configured list.
    pub fn discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Replace the strategy named by `load_balancer` in the configuration.
    pub fn load_balancer(mut self, balancer: Arc<dyn LoadBalancer>) -> Self {
        self.balancer = Some(balancer);
        self
    }

    /// Share breaker state with other clients. Ignored when the breaker is
    /// disabled in configuration.
    pub fn circuit_breaker(mut self, breaker: Arc<dyn CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn interceptor<I: RequestInterceptor>(mut self, name: &str, interceptor: I) -> Self {
        self.interceptors
            .push(Arc::new(InterceptorStage::new(name, Arc::new(interceptor))));
        self
    }

    pub fn error_mapper<M: ErrorMapper>(mut self, name: &str, mapper: M) -> Self {
        self.error_mappers
            .push(Arc::new(ErrorMapStage::new(name, Arc::new(mapper))));
        self
    }

    pub fn response_mapper<M: ResponseMapper>(mut self, name: &str, mapper: M) -> Self {
        self.response_mappers
            .push(Arc::new(ResponseMapStage::new(name, Arc::new(mapper))));
        self
    }

    /// Custom stage, placed inside the response mappers and outside logging.
    pub fn stage<S: Stage>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Status classifiers. `status.decode_404` from configuration is applied
    /// on top.
    pub fn status_handling(mut self, status: StatusHandling) -> Self {
        self.status = status;
        self
    }

    /// Add a log listener. Without any, a `TracingListener` is used.
    pub fn log_listener(mut self, listener: Arc<dyn LogListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn method(mut self, method: MethodSpec) -> Self {
        self.methods.push(method);
        self
    }

    fn chain(&mut self) -> FilterChain {
        let mut status = std::mem::take(&mut self.status);
        if self.config.status.decode_404 {
            status = status.decode_404(true);
        }

        let mut chain = FilterChain::new();
        for stage in self
            .interceptors
            .drain(..)
            .chain(self.error_mappers.drain(..))
            .chain(std::iter::once(Arc::new(status) as Arc<dyn Stage>))
            .chain(self.response_mappers.drain(..))
            .chain(self.stages.drain(..))
        {
            chain = chain.stage_arc(stage);
        }

        let logging = &self.config.logging;
        if logging.level != LogLevel::None {
            let mut listeners = std::mem::take(&mut self.listeners);
            if listeners.is_empty() {
                listeners.push(Arc::new(TracingListener));
            }
            chain = chain.stage(LoggingStage::new(logging.level, logging.max_body_bytes, listeners));
        }

        if let Some(ms) = self.config.timeouts.attempt_ms {
            chain = chain.stage(TimeoutStage::new(Duration::from_millis(ms)));
        }
        chain
    }

    pub fn build(mut self) -> Result<Client> {
        validate_config(&self.config).map_err(|errors| {
            Error::Config(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        })?;

        let transport: Arc<dyn Transport> = match self.transport.take() {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new(&self.config.timeouts)),
        };
        let chain = self.chain();
        let invocation = chain.build(transport);
        let stage_names: Vec<String> = chain.names().into_iter().map(String::from).collect();

        let config = &self.config;
        let router = if let Some(base) = &config.base_url {
            Router::Direct {
                base: base.clone(),
                invocation,
                policy: config.retry.direct_policy(),
            }
        } else {
            let discovery: Arc<dyn Discovery> = match self.discovery.take() {
                Some(discovery) => discovery,
                None if !config.endpoints.is_empty() => Arc::new(StaticDiscovery::from_config(config)),
                None => {
                    return Err(Error::Config(format!(
                        "client {} has no base_url, endpoints or discovery",
                        config.name
                    )))
                }
            };
            let balancer = self
                .balancer
                .take()
                .unwrap_or_else(|| config.load_balancer.build());
            Router::Balanced(LoadBalancedDispatcher::new(
                EndpointPool::new(config.name.clone(), discovery),
                balancer,
                invocation,
                config.retry.same_policy(),
                config.retry.next_policy(),
                config.health,
            ))
        };

        let breaker: Arc<dyn CircuitBreaker> = if !config.circuit_breaker.enabled {
            Arc::new(NoopCircuitBreaker)
        } else {
            match self.breaker.take() {
                Some(breaker) => breaker,
                None => Arc::new(ConsecutiveFailureBreaker::new(config.circuit_breaker.policy())),
            }
        };

        tracing::info!(
            client = %config.name,
            stages = ?stage_names,
            methods = self.methods.len(),
            balanced = matches!(router, Router::Balanced(_)),
            "Client built"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                name: config.name.clone(),
                router,
                registry: MethodRegistry::new(std::mem::take(&mut self.methods)),
                breaker,
                stage_names,
                key_suffix: config.circuit_breaker.key_suffix.clone(),
                sequence_policy: config.retry.direct_policy(),
                sequence_mode: config.retry.sequence,
            }),
        })
    }
}
