//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for one client.
//! All types derive Serde traits for deserialization from config files.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::filter::LogLevel;
use crate::load_balancer::{EndpointSpec, LoadBalancerKind};
use crate::resilience::{Backoff, BreakerPolicy, ExponentialBackoff, FixedCount, NeverRetry, RetryPolicy, SequenceRetry};

/// Root configuration for a client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Logical service name; names the endpoint pool and log fields.
    pub name: String,

    /// Fixed target. Mutually exclusive with `endpoints`.
    pub base_url: Option<Url>,

    /// Load-balanced targets.
    pub endpoints: Vec<EndpointSpec>,

    /// Selection strategy for `endpoints`.
    pub load_balancer: LoadBalancerKind,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retry: RetryConfig,

    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Status handling.
    pub status: StatusConfig,

    /// Exchange logging.
    pub logging: LoggingConfig,

    /// Passive health thresholds.
    pub health: HealthConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_url: None,
            endpoints: Vec::new(),
            load_balancer: LoadBalancerKind::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            status: StatusConfig::default(),
            logging: LoggingConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Deadline for the response head of one attempt, enforced by the transport.
    pub request_ms: Option<u64>,

    /// Deadline for one attempt through the whole chain. Off unless set.
    pub attempt_ms: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            request_ms: Some(30_000),
            attempt_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Immediate re-attempts.
    Fixed,
    /// Fixed period, `Retry-After` aware.
    #[default]
    Backoff,
    /// Doubling delay with jitter.
    Exponential,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries. When disabled failures surface unwrapped.
    pub enabled: bool,

    pub strategy: RetryStrategy,

    /// Retries of a call against a fixed `base_url`, and sequence restarts.
    pub max_retries: u32,

    /// Retries on the same endpoint before switching.
    pub max_same: u32,

    /// Switches to another endpoint.
    pub max_next: u32,

    /// Base delay in milliseconds.
    pub period_ms: u64,

    /// Delay cap in milliseconds (also caps `Retry-After`).
    pub max_period_ms: u64,

    /// Fraction of each exponential delay randomized away.
    pub jitter: f64,

    /// Restart policy for sequences.
    pub sequence: SequenceRetry,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RetryStrategy::default(),
            max_retries: 4,
            max_same: 0,
            max_next: 1,
            period_ms: 100,
            max_period_ms: 1_000,
            jitter: 0.0,
            sequence: SequenceRetry::default(),
        }
    }
}

impl RetryConfig {
    /// Policy allowing `max_retries` retries with the configured strategy.
    pub fn policy(&self, max_retries: u32) -> Arc<dyn RetryPolicy> {
        if !self.enabled {
            return Arc::new(NeverRetry);
        }
        let period = Duration::from_millis(self.period_ms);
        let cap = Duration::from_millis(self.max_period_ms);
        match self.strategy {
            RetryStrategy::Fixed => Arc::new(FixedCount::new(max_retries)),
            RetryStrategy::Backoff => Arc::new(Backoff::new(max_retries, period, cap)),
            RetryStrategy::Exponential => {
                Arc::new(ExponentialBackoff::new(max_retries, period, cap).jitter(self.jitter))
            }
        }
    }

    pub fn direct_policy(&self) -> Arc<dyn RetryPolicy> {
        self.policy(self.max_retries)
    }

    pub fn same_policy(&self) -> Arc<dyn RetryPolicy> {
        self.policy(self.max_same)
    }

    pub fn next_policy(&self) -> Arc<dyn RetryPolicy> {
        self.policy(self.max_next)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,

    /// Consecutive counted failures that open a circuit.
    pub volume_threshold: u32,

    /// Time a circuit stays open before admitting a trial, in milliseconds.
    pub sleep_window_ms: u64,

    /// Namespace appended to every command key.
    pub key_suffix: Option<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            volume_threshold: 20,
            sleep_window_ms: 5_000,
            key_suffix: None,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn policy(&self) -> BreakerPolicy {
        BreakerPolicy {
            volume_threshold: self.volume_threshold,
            sleep_window: Duration::from_millis(self.sleep_window_ms),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Treat 404 as an empty successful response.
    pub decode_404: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,

    /// Body bytes logged at `full` level.
    pub max_body_bytes: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::None,
            max_body_bytes: 4 * 1024,
        }
    }
}

/// Passive health thresholds.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}
