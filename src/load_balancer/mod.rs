//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Logical call for service S
//!     → pool.rs (re-read endpoints of S from discovery)
//!     → Apply selection strategy:
//!         - round_robin.rs (rotate through endpoints)
//!         - least_conn.rs (pick endpoint with fewest requests in flight)
//!         - random.rs (weighted random)
//!     → dispatcher.rs (attempt, retry on same, retry on next)
//!     → endpoint.rs (in-flight guard, passive health)
//! ```
//!
//! # Design Decisions
//! - Strategies are stateless apart from their own counters; the pool owns
//!   endpoint state
//! - Strategy selection per client
//! - Unhealthy endpoints are skipped while a healthy one exists

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod dispatcher;
pub mod endpoint;
pub mod least_conn;
pub mod pool;
pub mod random;
pub mod round_robin;

pub use dispatcher::LoadBalancedDispatcher;
pub use endpoint::{Endpoint, EndpointGuard, EndpointSpec, HealthState};
pub use least_conn::LeastRequests;
pub use pool::{Discovery, EndpointPool, StaticDiscovery};
pub use random::WeightedRandom;
pub use round_robin::RoundRobin;

/// Selection strategy.
pub trait LoadBalancer: Send + Sync + Debug {
    fn next_endpoint(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>>;
}

/// Strategy named in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerKind {
    #[default]
    RoundRobin,
    LeastRequests,
    WeightedRandom,
}

impl LoadBalancerKind {
    pub fn build(self) -> Arc<dyn LoadBalancer> {
        match self {
            Self::RoundRobin => Arc::new(RoundRobin::new()),
            Self::LeastRequests => Arc::new(LeastRequests::new()),
            Self::WeightedRandom => Arc::new(WeightedRandom::new()),
        }
    }
}
