//! Structured logging.
//!
//! # Responsibilities
//! - Initialize a `tracing` subscriber for applications that do not bring one
//! - Honour `RUST_LOG`, falling back to the given filter
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Initialization is idempotent: a second call is a no-op

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global fmt subscriber. `default_filter` applies when `RUST_LOG`
/// is unset, e.g. `"resilient_dispatch=debug"`.
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_logging("resilient_dispatch=debug");
        init_logging("resilient_dispatch=trace");
    }
}
