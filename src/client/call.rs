//! Spawned, cancellable calls.

use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Handle to a call running on its own task.
///
/// Awaiting the handle yields the call's result. `cancel` aborts the task:
/// the in-flight attempt and any pending retry delay are dropped and no
/// further attempt starts. The awaited result is then `Error::Cancelled`.
#[derive(Debug)]
pub struct CallHandle<T> {
    task: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> CallHandle<T> {
    pub(crate) fn spawn<F>(call: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            task: tokio::spawn(call),
        }
    }
}

impl<T> CallHandle<T> {
    /// Cancel the call. Idempotent; a no-op once the call has completed.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Future for CallHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let joined = ready!(Pin::new(&mut self.get_mut().task).poll(cx));
        Poll::Ready(match joined {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(Error::Cancelled),
            Err(err) => std::panic::resume_unwind(err.into_panic()),
        })
    }
}
