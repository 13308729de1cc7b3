//! Round-robin selection strategy.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::load_balancer::{LoadBalancer, endpoint::Endpoint};

/// Round-robin selector.
/// Stores an internal counter to rotate through endpoints.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_endpoint(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        if endpoints.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        Some(endpoints[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::endpoint::EndpointSpec;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let e1 = Arc::new(Endpoint::new(&EndpointSpec::new("http://127.0.0.1:8080".parse().unwrap())));
        let e2 = Arc::new(Endpoint::new(&EndpointSpec::new("http://127.0.0.1:8081".parse().unwrap())));
        let endpoints = vec![e1.clone(), e2.clone()];

        let s1 = lb.next_endpoint(&endpoints).unwrap();
        assert_eq!(s1.url(), e1.url());

        let s2 = lb.next_endpoint(&endpoints).unwrap();
        assert_eq!(s2.url(), e2.url());

        let s3 = lb.next_endpoint(&endpoints).unwrap();
        assert_eq!(s3.url(), e1.url());
    }

    #[test]
    fn test_empty_pool() {
        assert!(RoundRobin::new().next_endpoint(&[]).is_none());
    }
}
