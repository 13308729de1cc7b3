//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (structured log fields, see logging.rs)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → whichever tracing subscriber the application installs
//!     → whichever `metrics` recorder the application installs
//! ```
//!
//! # Design Decisions
//! - The library never installs a global recorder; without one, metric calls are no-ops
//! - `init_logging` is a convenience for binaries and tests

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
