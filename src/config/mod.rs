//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → ClientBuilder (policies, chain, pool)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → StaticDiscovery swaps the endpoint list
//!     → next dispatch sees the new endpoints
//! ```
//!
//! # Design Decisions
//! - Only endpoint lists are hot-reloaded; policies are fixed at build time
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CircuitBreakerConfig, ClientConfig, HealthConfig, LoggingConfig, RetryConfig, RetryStrategy, StatusConfig,
    TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::{apply_updates, ConfigWatcher};
