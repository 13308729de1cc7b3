//! Least-requests selection strategy.

use std::sync::Arc;
use crate::load_balancer::{LoadBalancer, endpoint::Endpoint};

/// Least requests selector.
/// Selects the endpoint with the fewest requests in flight.
#[derive(Debug, Default)]
pub struct LeastRequests;

impl LeastRequests {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastRequests {
    fn next_endpoint(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        // In case of tie, the first one is selected (stability)
        endpoints
            .iter()
            .min_by_key(|e| e.in_flight())
            .cloned()
    }
}
