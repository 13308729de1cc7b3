//! Metrics collection.
//!
//! # Metrics
//! - `dispatch_attempts_total` (counter): attempts by method key, endpoint
//! - `dispatch_retries_total` (counter): retries by method key, kind (same, next, sequence)
//! - `command_short_circuited_total` (counter): calls rejected by an open circuit
//! - `command_fallbacks_total` (counter): fallback resolutions by outcome
//! - `dispatch_call_duration_seconds` (histogram): logical call latency by outcome
//!
//! # Design Decisions
//! - Emitted through the `metrics` facade; exposition is the application's concern
//! - Labels are method keys and endpoint URLs, never request data

use std::time::Instant;

pub fn record_attempt(method_key: &str, endpoint: &str) {
    ::metrics::counter!(
        "dispatch_attempts_total",
        "method" => method_key.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

pub fn record_retry(method_key: &str, kind: &'static str) {
    ::metrics::counter!(
        "dispatch_retries_total",
        "method" => method_key.to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_short_circuit(command_key: &str) {
    ::metrics::counter!("command_short_circuited_total", "command" => command_key.to_string()).increment(1);
}

pub fn record_fallback(command_key: &str, outcome: &'static str) {
    ::metrics::counter!(
        "command_fallbacks_total",
        "command" => command_key.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_call_duration(method_key: &str, outcome: &'static str, start: Instant) {
    ::metrics::histogram!(
        "dispatch_call_duration_seconds",
        "method" => method_key.to_string(),
        "outcome" => outcome
    )
    .record(start.elapsed().as_secs_f64());
}
