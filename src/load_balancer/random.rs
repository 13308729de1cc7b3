//! Weighted random selection strategy.

use std::sync::Arc;
use crate::load_balancer::{LoadBalancer, endpoint::Endpoint};

/// Picks an endpoint with probability proportional to its weight.
/// Falls back to a uniform pick when every weight is zero.
#[derive(Debug, Default)]
pub struct WeightedRandom;

impl WeightedRandom {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for WeightedRandom {
    fn next_endpoint(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        if endpoints.is_empty() {
            return None;
        }

        let total: u64 = endpoints.iter().map(|e| u64::from(e.weight())).sum();
        if total == 0 {
            return Some(endpoints[fastrand::usize(..endpoints.len())].clone());
        }

        let mut pick = fastrand::u64(..total);
        for endpoint in endpoints {
            let weight = u64::from(endpoint.weight());
            if pick < weight {
                return Some(endpoint.clone());
            }
            pick -= weight;
        }
        endpoints.last().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::endpoint::EndpointSpec;

    #[test]
    fn zero_weight_is_never_picked() {
        let lb = WeightedRandom::new();
        let heavy = Arc::new(Endpoint::new(&EndpointSpec::new("http://a:80".parse().unwrap()).weight(3)));
        let idle = Arc::new(Endpoint::new(&EndpointSpec::new("http://b:80".parse().unwrap()).weight(0)));
        let endpoints = vec![idle, heavy.clone()];

        for _ in 0..50 {
            assert_eq!(lb.next_endpoint(&endpoints).unwrap().url(), heavy.url());
        }
    }

    #[test]
    fn all_zero_weights_still_select() {
        let lb = WeightedRandom::new();
        let endpoints = vec![Arc::new(Endpoint::new(
            &EndpointSpec::new("http://a:80".parse().unwrap()).weight(0),
        ))];
        assert!(lb.next_endpoint(&endpoints).is_some());
    }
}
