//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Logical call:
//!     → command.rs (breaker eligibility, report once, fallback)
//!         → retries.rs (re-attempt with delay, OutOfRetries on give-up)
//!             → backoff.rs (delay computation)
//!     → circuit_breaker.rs (per command key state)
//!     → fallback.rs (fixed value or factory from the classified error)
//! ```
//!
//! # Design Decisions
//! - Retry and breaker decisions only look at the `Failure` taxonomy
//! - Breaker state is injected, never global
//! - All resilience logic composes around futures and streams; nothing blocks

pub mod backoff;
pub mod circuit_breaker;
pub mod command;
pub mod fallback;
pub mod retries;

pub use circuit_breaker::{
    BreakerPolicy, CircuitBreaker, CircuitState, CommandKey, ConsecutiveFailureBreaker, NoopCircuitBreaker,
};
pub use command::Command;
pub use fallback::Fallback;
pub use retries::{
    retry, retry_stream, AttemptError, Backoff, ExponentialBackoff, FixedCount, NeverRetry, RetryDecision,
    RetryPolicy, RetryState, RetryStep, SequenceRetry,
};
