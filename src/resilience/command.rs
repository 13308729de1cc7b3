//! Command wrapper: circuit breaker eligibility, outcome reporting and
//! fallback substitution around one logical call.
//!
//! # Data Flow
//! ```text
//! execute(call)
//!     → is_call_permitted(key)? ── no ──▶ ShortCircuited ─┐
//!     → call.await                                         │
//!     → report exactly once (success / failure / cancel)   │
//!     → Err(error) ───────────────────────────────────────┴─▶ fallback
//! ```

use std::future::Future;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};

use crate::error::{Error, FailureClass, Result};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{CircuitBreaker, CommandKey};
use crate::resilience::fallback::Fallback;

/// Reports the outcome of a permitted call once; reports a cancellation if
/// dropped before that.
struct ReportGuard {
    breaker: Arc<dyn CircuitBreaker>,
    key: CommandKey,
    reported: bool,
}

impl ReportGuard {
    fn success(&mut self) {
        if !self.reported {
            self.reported = true;
            self.breaker.on_success(&self.key);
        }
    }

    fn failure(&mut self, class: FailureClass) {
        if !self.reported {
            self.reported = true;
            self.breaker.on_failure(&self.key, class);
        }
    }
}

impl Drop for ReportGuard {
    fn drop(&mut self) {
        if !self.reported {
            self.breaker.on_cancelled(&self.key);
        }
    }
}

/// A named, circuit-broken call producing `T`.
pub struct Command<T> {
    key: CommandKey,
    breaker: Arc<dyn CircuitBreaker>,
    fallback: Option<Fallback<T>>,
}

impl<T: Clone> Clone for Command<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            breaker: self.breaker.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Command<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("key", &self.key)
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl<T> Command<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(key: CommandKey, breaker: Arc<dyn CircuitBreaker>) -> Self {
        Self {
            key,
            breaker,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Option<Fallback<T>>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn key(&self) -> &CommandKey {
        &self.key
    }

    fn report(&self) -> ReportGuard {
        ReportGuard {
            breaker: self.breaker.clone(),
            key: self.key.clone(),
            reported: false,
        }
    }

    fn short_circuited(&self) -> Error {
        tracing::debug!(command_key = %self.key, "Circuit open, short-circuiting call");
        metrics::record_short_circuit(self.key.as_str());
        Error::ShortCircuited {
            command_key: self.key.to_string(),
        }
    }

    /// Run `call` under the breaker; substitute the fallback on any error.
    pub async fn execute<Fut>(&self, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        if !self.breaker.is_call_permitted(&self.key) {
            return self.recover(self.short_circuited()).await;
        }

        let mut report = self.report();
        let outcome = call.await;
        match outcome {
            Ok(value) => {
                report.success();
                Ok(value)
            }
            Err(error) => {
                report.failure(error.class());
                self.recover(error).await
            }
        }
    }

    async fn recover(&self, error: Error) -> Result<T> {
        let Some(fallback) = &self.fallback else {
            return Err(error);
        };

        tracing::debug!(command_key = %self.key, error = %error, "Resolving fallback");
        let resolved = fallback.resolve(error, &self.key).await;
        match &resolved {
            Ok(_) => metrics::record_fallback(self.key.as_str(), "success"),
            Err(error) => {
                tracing::warn!(command_key = %self.key, error = %error, "Fallback failed");
                metrics::record_fallback(self.key.as_str(), "failure");
            }
        }
        resolved
    }
}

enum SequencePhase<I> {
    Start(BoxStream<'static, Result<I>>),
    Running {
        inner: BoxStream<'static, Result<I>>,
        report: ReportGuard,
        delivered: bool,
    },
    Recover(Error),
    Replay(std::vec::IntoIter<I>),
    Done,
}

impl<I> Command<Vec<I>>
where
    I: Clone + Send + Sync + 'static,
{
    /// Run a sequence under the breaker.
    ///
    /// Eligibility is checked before the first element and the outcome is
    /// reported when the sequence ends. The fallback only substitutes when no
    /// element was delivered yet; a later error is surfaced as is.
    pub fn execute_stream(&self, inner: BoxStream<'static, Result<I>>) -> BoxStream<'static, Result<I>> {
        let initial = (self.clone(), SequencePhase::Start(inner));

        stream::unfold(initial, |(command, mut phase)| async move {
            loop {
                phase = match phase {
                    SequencePhase::Start(inner) => {
                        if command.breaker.is_call_permitted(&command.key) {
                            SequencePhase::Running {
                                inner,
                                report: command.report(),
                                delivered: false,
                            }
                        } else {
                            SequencePhase::Recover(command.short_circuited())
                        }
                    }
                    SequencePhase::Running {
                        mut inner,
                        mut report,
                        delivered,
                    } => match inner.next().await {
                        Some(Ok(item)) => {
                            let next = SequencePhase::Running {
                                inner,
                                report,
                                delivered: true,
                            };
                            return Some((Ok(item), (command, next)));
                        }
                        Some(Err(error)) => {
                            report.failure(error.class());
                            if delivered {
                                return Some((Err(error), (command, SequencePhase::Done)));
                            }
                            SequencePhase::Recover(error)
                        }
                        None => {
                            report.success();
                            return None;
                        }
                    },
                    SequencePhase::Recover(error) => match command.recover(error).await {
                        Ok(items) => SequencePhase::Replay(items.into_iter()),
                        Err(error) => return Some((Err(error), (command, SequencePhase::Done))),
                    },
                    SequencePhase::Replay(mut items) => match items.next() {
                        Some(item) => return Some((Ok(item), (command, SequencePhase::Replay(items)))),
                        None => return None,
                    },
                    SequencePhase::Done => return None,
                };
            }
        })
        .boxed()
    }
}
