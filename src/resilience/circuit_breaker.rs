//! Circuit breaking per command key.
//!
//! # State machine
//! ```text
//! Closed ── volume_threshold consecutive counted failures ──▶ Open
//! Open ── sleep_window elapsed, next permit check ──▶ HalfOpen (one trial)
//! HalfOpen ── trial succeeds ──▶ Closed
//! HalfOpen ── trial fails ──▶ Open
//! HalfOpen ── trial cancelled / ignored ──▶ HalfOpen (slot released)
//! ```
//!
//! # Design Decisions
//! - One cell per command key, created lazily and never removed
//! - Ignored failures (client errors) neither count nor reset the streak
//! - The registry is injected into the client, never global

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::FailureClass;
use crate::http::MethodKey;

/// Name of a command: the method key, optionally suffixed with a namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandKey(Arc<str>);

impl CommandKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn from_method_key(method_key: &MethodKey) -> Self {
        Self::new(method_key.as_str())
    }

    /// Isolate breaker state under `suffix`. Empty suffixes are ignored.
    pub fn with_suffix(self, suffix: &str) -> Self {
        if suffix.is_empty() {
            self
        } else {
            Self::new(format!("{}-{}", self.0, suffix))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommandKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Call contract between the command wrapper and a breaker implementation.
///
/// For every permitted call exactly one of `on_success`, `on_failure` or
/// `on_cancelled` is reported.
pub trait CircuitBreaker: Send + Sync + Debug {
    fn is_call_permitted(&self, key: &CommandKey) -> bool;

    fn on_success(&self, key: &CommandKey);

    fn on_failure(&self, key: &CommandKey, class: FailureClass);

    /// The call was dropped before it produced an outcome.
    fn on_cancelled(&self, _key: &CommandKey) {}

    fn state(&self, key: &CommandKey) -> CircuitState;
}

/// Breaker that always permits.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCircuitBreaker;

impl CircuitBreaker for NoopCircuitBreaker {
    fn is_call_permitted(&self, _key: &CommandKey) -> bool {
        true
    }

    fn on_success(&self, _key: &CommandKey) {}

    fn on_failure(&self, _key: &CommandKey, _class: FailureClass) {}

    fn state(&self, _key: &CommandKey) -> CircuitState {
        CircuitState::Closed
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerPolicy {
    /// Consecutive counted failures that open the circuit.
    pub volume_threshold: u32,
    /// Time spent open before a trial is admitted.
    pub sleep_window: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            volume_threshold: 20,
            sleep_window: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
enum Cell {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { trial_in_flight: bool },
}

impl Cell {
    fn closed() -> Self {
        Cell::Closed {
            consecutive_failures: 0,
        }
    }
}

/// Reference breaker counting consecutive failures per command key.
#[derive(Debug, Default)]
pub struct ConsecutiveFailureBreaker {
    policy: BreakerPolicy,
    cells: DashMap<CommandKey, Cell>,
}

impl ConsecutiveFailureBreaker {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            cells: DashMap::new(),
        }
    }

    fn open(&self, key: &CommandKey, cell: &mut Cell) {
        *cell = Cell::Open {
            opened_at: Instant::now(),
        };
        tracing::warn!(command_key = %key, sleep_window = ?self.policy.sleep_window, "Circuit opened");
    }
}

impl CircuitBreaker for ConsecutiveFailureBreaker {
    fn is_call_permitted(&self, key: &CommandKey) -> bool {
        let mut cell = self.cells.entry(key.clone()).or_insert_with(Cell::closed);
        match &mut *cell {
            Cell::Closed { .. } => true,
            Cell::Open { opened_at } => {
                if opened_at.elapsed() >= self.policy.sleep_window {
                    *cell = Cell::HalfOpen {
                        trial_in_flight: true,
                    };
                    tracing::info!(command_key = %key, "Circuit half-open, admitting trial call");
                    true
                } else {
                    false
                }
            }
            Cell::HalfOpen { trial_in_flight } => {
                if *trial_in_flight {
                    false
                } else {
                    *trial_in_flight = true;
                    true
                }
            }
        }
    }

    fn on_success(&self, key: &CommandKey) {
        let mut cell = self.cells.entry(key.clone()).or_insert_with(Cell::closed);
        match &mut *cell {
            Cell::Closed {
                consecutive_failures,
            } => *consecutive_failures = 0,
            Cell::HalfOpen { .. } => {
                *cell = Cell::closed();
                tracing::info!(command_key = %key, "Circuit closed");
            }
            Cell::Open { .. } => {}
        }
    }

    fn on_failure(&self, key: &CommandKey, class: FailureClass) {
        let mut cell = self.cells.entry(key.clone()).or_insert_with(Cell::closed);
        match (&mut *cell, class) {
            (Cell::HalfOpen { trial_in_flight }, FailureClass::Ignored) => *trial_in_flight = false,
            (_, FailureClass::Ignored) => {}
            (Cell::Closed { consecutive_failures }, FailureClass::Counted) => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.policy.volume_threshold {
                    self.open(key, &mut cell);
                }
            }
            (Cell::HalfOpen { .. }, FailureClass::Counted) => self.open(key, &mut cell),
            (Cell::Open { .. }, FailureClass::Counted) => {}
        }
    }

    fn on_cancelled(&self, key: &CommandKey) {
        if let Some(mut cell) = self.cells.get_mut(key) {
            if let Cell::HalfOpen { trial_in_flight } = &mut *cell {
                *trial_in_flight = false;
            }
        }
    }

    fn state(&self, key: &CommandKey) -> CircuitState {
        match self.cells.get(key).as_deref() {
            Some(Cell::Open { .. }) => CircuitState::Open,
            Some(Cell::HalfOpen { .. }) => CircuitState::HalfOpen,
            Some(Cell::Closed { .. }) | None => CircuitState::Closed,
        }
    }
}
