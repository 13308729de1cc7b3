//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, thresholds > 0, jitter in 0..=1)
//! - Detect conflicting targets
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - A config without any target is valid here: endpoints may come from an
//!   injected discovery

use thiserror::Error;

use crate::config::schema::ClientConfig;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("client name must not be empty")]
    EmptyName,
    #[error("base_url and endpoints are mutually exclusive")]
    ConflictingTargets,
    #[error("invalid target {url}: {reason}")]
    InvalidTarget { url: String, reason: &'static str },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("retry.period_ms ({period_ms}) exceeds retry.max_period_ms ({max_period_ms})")]
    PeriodExceedsCap { period_ms: u64, max_period_ms: u64 },
    #[error("retry.jitter must be within 0.0..=1.0, got {0}")]
    InvalidJitter(f64),
}

fn check_target(url: &url::Url, errors: &mut Vec<ValidationError>) {
    if !matches!(url.scheme(), "http" | "https") {
        errors.push(ValidationError::InvalidTarget {
            url: url.to_string(),
            reason: "scheme must be http or https",
        });
    } else if url.cannot_be_a_base() || url.host().is_none() {
        errors.push(ValidationError::InvalidTarget {
            url: url.to_string(),
            reason: "url must have a host",
        });
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }

    if config.base_url.is_some() && !config.endpoints.is_empty() {
        errors.push(ValidationError::ConflictingTargets);
    }
    if let Some(url) = &config.base_url {
        check_target(url, &mut errors);
    }
    for endpoint in &config.endpoints {
        check_target(&endpoint.url, &mut errors);
    }

    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::Zero { field: "timeouts.connect_ms" });
    }
    if config.timeouts.request_ms == Some(0) {
        errors.push(ValidationError::Zero { field: "timeouts.request_ms" });
    }
    if config.timeouts.attempt_ms == Some(0) {
        errors.push(ValidationError::Zero { field: "timeouts.attempt_ms" });
    }

    let retry = &config.retry;
    if retry.period_ms > retry.max_period_ms {
        errors.push(ValidationError::PeriodExceedsCap {
            period_ms: retry.period_ms,
            max_period_ms: retry.max_period_ms,
        });
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        errors.push(ValidationError::InvalidJitter(retry.jitter));
    }

    if config.circuit_breaker.enabled && config.circuit_breaker.volume_threshold == 0 {
        errors.push(ValidationError::Zero { field: "circuit_breaker.volume_threshold" });
    }
    if config.health.unhealthy_threshold == 0 {
        errors.push(ValidationError::Zero { field: "health.unhealthy_threshold" });
    }
    if config.health.healthy_threshold == 0 {
        errors.push(ValidationError::Zero { field: "health.healthy_threshold" });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
