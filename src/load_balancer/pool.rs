//! Endpoint pool management.
//!
//! # Responsibilities
//! - Read the current endpoint list of one service from discovery
//! - Keep per-endpoint counters alive across refreshes (keyed by URL)
//! - Forget endpoints discovery no longer publishes

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use url::Url;

use crate::config::ClientConfig;
use crate::load_balancer::endpoint::{Endpoint, EndpointSpec};

/// Source of endpoints per logical service name.
pub trait Discovery: Send + Sync + Debug {
    fn current_endpoints(&self, service: &str) -> Vec<EndpointSpec>;
}

/// Configuration-backed discovery. Lists can be swapped at runtime.
#[derive(Debug)]
pub struct StaticDiscovery {
    services: ArcSwap<HashMap<String, Vec<EndpointSpec>>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self {
            services: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let discovery = Self::new();
        discovery.apply(config);
        discovery
    }

    pub fn with_service(self, service: impl Into<String>, endpoints: Vec<EndpointSpec>) -> Self {
        self.set(service, endpoints);
        self
    }

    /// Replace the endpoint list of `service`.
    pub fn set(&self, service: impl Into<String>, endpoints: Vec<EndpointSpec>) {
        let service = service.into();
        self.services.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(service.clone(), endpoints.clone());
            next
        });
    }

    /// Publish the endpoints of a (re)loaded configuration.
    pub fn apply(&self, config: &ClientConfig) {
        tracing::info!(
            service = %config.name,
            endpoints = config.endpoints.len(),
            "Applying endpoint list"
        );
        self.set(config.name.clone(), config.endpoints.clone());
    }
}

impl Default for StaticDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery for StaticDiscovery {
    fn current_endpoints(&self, service: &str) -> Vec<EndpointSpec> {
        self.services.load().get(service).cloned().unwrap_or_default()
    }
}

/// Endpoints of one logical service.
#[derive(Debug)]
pub struct EndpointPool {
    service: String,
    discovery: Arc<dyn Discovery>,
    known: DashMap<Url, Arc<Endpoint>>,
}

impl EndpointPool {
    pub fn new(service: impl Into<String>, discovery: Arc<dyn Discovery>) -> Self {
        Self {
            service: service.into(),
            discovery,
            known: DashMap::new(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current endpoints, re-read from discovery on every call.
    pub fn snapshot(&self) -> Vec<Arc<Endpoint>> {
        let specs = self.discovery.current_endpoints(&self.service);

        let endpoints: Vec<Arc<Endpoint>> = specs
            .iter()
            .map(|spec| {
                let endpoint = self
                    .known
                    .entry(spec.url.clone())
                    .or_insert_with(|| Arc::new(Endpoint::new(spec)))
                    .clone();
                endpoint.set_weight(spec.weight);
                endpoint
            })
            .collect();

        if self.known.len() > endpoints.len() {
            self.known.retain(|url, _| specs.iter().any(|spec| &spec.url == url));
        }

        endpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(url: &str) -> EndpointSpec {
        EndpointSpec::new(url.parse().unwrap())
    }

    #[test]
    fn counters_survive_refresh() {
        let discovery = Arc::new(
            StaticDiscovery::new().with_service("users", vec![spec("http://a:80"), spec("http://b:80")]),
        );
        let pool = EndpointPool::new("users", discovery.clone());

        let first = pool.snapshot();
        first[0].mark_failure(1);

        discovery.set("users", vec![spec("http://a:80"), spec("http://c:80").weight(5)]);
        let second = pool.snapshot();

        assert_eq!(second.len(), 2);
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert!(!second[0].is_healthy());
        assert_eq!(second[1].weight(), 5);
        assert_eq!(pool.known.len(), 2);
    }

    #[test]
    fn unknown_service_is_empty() {
        let pool = EndpointPool::new("missing", Arc::new(StaticDiscovery::new()));
        assert!(pool.snapshot().is_empty());
    }
}
