//! Retry engine.
//!
//! # Responsibilities
//! - Decide, per failure, whether to retry and after which delay
//! - Re-invoke single-valued calls and sequences from scratch
//! - Give up with `OutOfRetries` wrapping the last failure
//!
//! # Data Flow
//! ```text
//! attempt(n) ── Ok ──────────────────────────────▶ value
//!     │
//!     └─ Err(Retryable(failure))
//!           → RetryState::on_failure(policy)
//!               → Retry(state, delay) → sleep → attempt(n + 1)
//!               → Stop(error)                    ▶ terminal error
//! ```
//!
//! # Design Decisions
//! - Policies are pure: `decide(&Failure, attempt)` never sleeps
//! - Delays use `tokio::time::sleep`; no thread is held while waiting
//! - A disabled policy surfaces the raw failure instead of `OutOfRetries`
//! - At most one attempt is alive at a time: a sequence attempt is dropped
//!   before the next one is created

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Failure, Result};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Decides whether a failed attempt is retried.
///
/// `attempt` is the 1-based number of failures seen so far in the call.
pub trait RetryPolicy: Send + Sync + Debug {
    fn decide(&self, failure: &Failure, attempt: u32) -> RetryDecision;

    /// A disabled policy never retries and never wraps the failure.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Retries are switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl RetryPolicy for NeverRetry {
    fn decide(&self, _failure: &Failure, _attempt: u32) -> RetryDecision {
        RetryDecision::GiveUp
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Immediate re-attempts, `max_retries` times.
#[derive(Debug, Clone, Copy)]
pub struct FixedCount {
    max_retries: u32,
}

impl FixedCount {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

impl RetryPolicy for FixedCount {
    fn decide(&self, _failure: &Failure, attempt: u32) -> RetryDecision {
        if attempt <= self.max_retries {
            RetryDecision::RetryAfter(Duration::ZERO)
        } else {
            RetryDecision::GiveUp
        }
    }
}

/// Fixed period, overridden by a server `Retry-After` hint capped at `cap`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    max_retries: u32,
    period: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(max_retries: u32, period: Duration, cap: Duration) -> Self {
        Self {
            max_retries,
            period,
            cap,
        }
    }
}

impl RetryPolicy for Backoff {
    fn decide(&self, failure: &Failure, attempt: u32) -> RetryDecision {
        if attempt > self.max_retries {
            return RetryDecision::GiveUp;
        }
        let delay = match failure.retry_after() {
            Some(hint) => hint.min(self.cap),
            None => self.period,
        };
        RetryDecision::RetryAfter(delay)
    }
}

/// Doubling delay from `base` up to `cap`, with optional jitter.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    max_retries: u32,
    base: Duration,
    cap: Duration,
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(max_retries: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_retries,
            base,
            cap,
            jitter: 0.0,
        }
    }

    /// Fraction of each delay randomized away (0.0..=1.0).
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn decide(&self, failure: &Failure, attempt: u32) -> RetryDecision {
        if attempt > self.max_retries {
            return RetryDecision::GiveUp;
        }
        let delay = match failure.retry_after() {
            Some(hint) => hint.min(self.cap),
            None => calculate_backoff(attempt, self.base, self.cap, self.jitter),
        };
        RetryDecision::RetryAfter(delay)
    }
}

/// Result of one attempt as seen by the retry engine.
#[derive(Debug)]
pub enum AttemptError {
    /// Fed to the policy.
    Retryable(Failure),
    /// Ends the call immediately.
    Terminal(Error),
}

impl From<Failure> for AttemptError {
    fn from(failure: Failure) -> Self {
        Self::Retryable(failure)
    }
}

/// Counters of one logical call, threaded through its attempts.
#[derive(Debug, Default)]
pub struct RetryState {
    attempt: u32,
    last_failure: Option<Failure>,
}

/// What to do after a failure.
#[derive(Debug)]
pub enum RetryStep {
    Retry(RetryState, Duration),
    Stop(Error),
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures seen so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_failure(&self) -> Option<&Failure> {
        self.last_failure.as_ref()
    }

    /// Feed a failure to `policy`.
    pub fn on_failure(self, failure: Failure, policy: &dyn RetryPolicy) -> RetryStep {
        let attempt = self.attempt + 1;
        match policy.decide(&failure, attempt) {
            RetryDecision::RetryAfter(delay) => RetryStep::Retry(
                RetryState {
                    attempt,
                    last_failure: Some(failure),
                },
                delay,
            ),
            RetryDecision::GiveUp => RetryStep::Stop(give_up(policy, attempt, failure)),
        }
    }
}

fn give_up(policy: &dyn RetryPolicy, attempts: u32, last: Failure) -> Error {
    if policy.is_enabled() {
        Error::OutOfRetries { attempts, last }
    } else {
        Error::Failure(last)
    }
}

/// Run `attempt` until it succeeds or `policy` gives up.
///
/// `attempt` receives the 1-based attempt number and must build a fresh
/// request every time.
pub async fn retry<T, F, Fut>(policy: &dyn RetryPolicy, label: &str, mut attempt: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptError>>,
{
    let mut state = RetryState::new();
    loop {
        let failure = match attempt(state.attempt() + 1).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Terminal(error)) => return Err(error),
            Err(AttemptError::Retryable(failure)) => failure,
        };

        match state.on_failure(failure, policy) {
            RetryStep::Retry(next, delay) => {
                if let Some(failure) = next.last_failure() {
                    tracing::info!(
                        method_key = %label,
                        attempt = next.attempt(),
                        delay = ?delay,
                        error = %failure,
                        "Retrying request"
                    );
                }
                metrics::record_retry(label, "direct");
                state = next;
                tokio::time::sleep(delay).await;
            }
            RetryStep::Stop(error) => {
                tracing::warn!(method_key = %label, error = %error, "Giving up on request");
                return Err(error);
            }
        }
    }
}

/// When a failed sequence may be restarted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceRetry {
    /// Restart the whole sequence; delivered elements are delivered again.
    #[default]
    Restart,
    /// Only retry while nothing has been delivered yet.
    BeforeFirstItem,
}

struct SequenceState<T, F, S> {
    factory: F,
    policy: Arc<dyn RetryPolicy>,
    mode: SequenceRetry,
    label: String,
    retry: Option<RetryState>,
    current: Option<Pin<Box<S>>>,
    delivered: bool,
    _item: std::marker::PhantomData<fn() -> T>,
}

/// Retry a sequence by re-creating it from scratch.
///
/// `factory(n)` creates attempt `n`. A `Retryable` item ends that attempt and
/// is fed to the policy; the attempt's stream is dropped before the next one
/// is created.
pub fn retry_stream<T, F, S>(
    policy: Arc<dyn RetryPolicy>,
    mode: SequenceRetry,
    label: impl Into<String>,
    factory: F,
) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
    F: FnMut(u32) -> S + Send + 'static,
    S: Stream<Item = std::result::Result<T, AttemptError>> + Send + 'static,
{
    let initial: SequenceState<T, F, S> = SequenceState {
        factory,
        policy,
        mode,
        label: label.into(),
        retry: Some(RetryState::new()),
        current: None,
        delivered: false,
        _item: std::marker::PhantomData,
    };

    stream::unfold(initial, |mut st| async move {
        loop {
            let retry = st.retry.take()?;
            let attempt_no = retry.attempt() + 1;
            let current = st
                .current
                .get_or_insert_with(|| Box::pin((st.factory)(attempt_no)));

            let failure = match current.next().await {
                Some(Ok(item)) => {
                    st.delivered = true;
                    st.retry = Some(retry);
                    return Some((Ok(item), st));
                }
                None => {
                    st.current = None;
                    return None;
                }
                Some(Err(AttemptError::Terminal(error))) => {
                    st.current = None;
                    return Some((Err(error), st));
                }
                Some(Err(AttemptError::Retryable(failure))) => failure,
            };
            st.current = None;

            if st.delivered && st.mode == SequenceRetry::BeforeFirstItem {
                let error = give_up(st.policy.as_ref(), attempt_no, failure);
                return Some((Err(error), st));
            }

            match retry.on_failure(failure, st.policy.as_ref()) {
                RetryStep::Retry(next, delay) => {
                    tracing::info!(
                        method_key = %st.label,
                        attempt = next.attempt(),
                        delay = ?delay,
                        delivered = st.delivered,
                        "Restarting sequence"
                    );
                    metrics::record_retry(&st.label, "sequence");
                    st.retry = Some(next);
                    tokio::time::sleep(delay).await;
                }
                RetryStep::Stop(error) => return Some((Err(error), st)),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StatusFailure, TransportErrorKind};
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn io_failure() -> Failure {
        Failure::transport(TransportErrorKind::Io, "connection reset")
    }

    fn throttled(hint: Option<Duration>) -> Failure {
        Failure::Status(
            StatusFailure::new(StatusCode::TOO_MANY_REQUESTS, HeaderMap::new(), Bytes::new())
                .with_retry_after(hint),
        )
    }

    #[test]
    fn fixed_count_allows_max_retries() {
        let policy = FixedCount::new(2);
        assert_eq!(policy.decide(&io_failure(), 1), RetryDecision::RetryAfter(Duration::ZERO));
        assert_eq!(policy.decide(&io_failure(), 2), RetryDecision::RetryAfter(Duration::ZERO));
        assert_eq!(policy.decide(&io_failure(), 3), RetryDecision::GiveUp);
    }

    #[test]
    fn backoff_honours_capped_hint() {
        let policy = Backoff::new(5, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(
            policy.decide(&throttled(Some(Duration::from_millis(300))), 1),
            RetryDecision::RetryAfter(Duration::from_millis(300))
        );
        assert_eq!(
            policy.decide(&throttled(Some(Duration::from_secs(30))), 1),
            RetryDecision::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(
            policy.decide(&throttled(None), 1),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_n_plus_one_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(&FixedCount::new(3), "Users#get()", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Retryable(io_failure())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(result, Err(Error::OutOfRetries { attempts: 4, .. })));
    }

    #[tokio::test]
    async fn disabled_policy_surfaces_raw_failure() {
        let result: Result<()> = retry(&NeverRetry, "Users#get()", |_| async {
            Err(AttemptError::Retryable(io_failure()))
        })
        .await;
        assert!(matches!(result, Err(Error::Failure(Failure::Transport { .. }))));
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(&FixedCount::new(3), "Users#get()", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Terminal(Error::InvalidRequest("bad".into()))) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_numbers_increase() {
        let value = retry(&FixedCount::new(5), "Users#get()", |attempt| async move {
            if attempt < 3 {
                Err(AttemptError::Retryable(io_failure()))
            } else {
                Ok(attempt)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    fn flaky_sequence(fail_until: u32) -> impl FnMut(u32) -> BoxStream<'static, std::result::Result<u32, AttemptError>> {
        move |attempt| {
            let head = stream::iter(vec![Ok(1), Ok(2)]);
            if attempt < fail_until {
                head.chain(stream::once(async { Err(AttemptError::Retryable(io_failure())) }))
                    .boxed()
            } else {
                head.chain(stream::iter(vec![Ok(3)])).boxed()
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_restarts_from_scratch() {
        let items: Vec<u32> = retry_stream(
            Arc::new(FixedCount::new(2)),
            SequenceRetry::Restart,
            "Feed#items()",
            flaky_sequence(2),
        )
        .map(|item| item.unwrap())
        .collect()
        .await;

        assert_eq!(items, vec![1, 2, 1, 2, 3]);
    }

    #[tokio::test]
    async fn sequence_does_not_restart_after_delivery_when_forbidden() {
        let items: Vec<Result<u32>> = retry_stream(
            Arc::new(FixedCount::new(2)),
            SequenceRetry::BeforeFirstItem,
            "Feed#items()",
            flaky_sequence(2),
        )
        .collect()
        .await;

        assert_eq!(items.len(), 3);
        assert!(matches!(items[2], Err(Error::OutOfRetries { attempts: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_out_of_retries_is_terminal() {
        let items: Vec<Result<u32>> = retry_stream(
            Arc::new(FixedCount::new(1)),
            SequenceRetry::Restart,
            "Feed#items()",
            |_| stream::once(async { Err(AttemptError::Retryable(io_failure())) }).boxed(),
        )
        .collect()
        .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::OutOfRetries { attempts: 2, .. })));
    }

    /// Records the `kind` label of every retry counter registered.
    #[derive(Default)]
    struct RetryKinds(std::sync::Mutex<Vec<String>>);

    impl ::metrics::Recorder for RetryKinds {
        fn describe_counter(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}
        fn describe_gauge(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}
        fn describe_histogram(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}

        fn register_counter(&self, key: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Counter {
            if key.name() == "dispatch_retries_total" {
                if let Some(kind) = key.labels().find(|l| l.key() == "kind") {
                    self.0.lock().unwrap().push(kind.value().to_string());
                }
            }
            ::metrics::Counter::noop()
        }

        fn register_gauge(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Gauge {
            ::metrics::Gauge::noop()
        }

        fn register_histogram(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Histogram {
            ::metrics::Histogram::noop()
        }
    }

    #[test]
    fn fixed_base_retries_have_their_own_metric_kind() {
        let recorder = RetryKinds::default();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        ::metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let result: Result<()> = retry(&FixedCount::new(2), "Users#get()", |_| async {
                    Err(AttemptError::Retryable(io_failure()))
                })
                .await;
                assert!(result.is_err());
            })
        });

        assert_eq!(*recorder.0.lock().unwrap(), vec!["direct", "direct"]);
    }
}
