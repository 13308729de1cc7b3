//! Fallback resolution.
//!
//! A fallback is either a fixed value or a factory computed from the
//! classified error of the failed call. Factories never see raw transport
//! errors.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::error::{BoxError, Error, FallbackFailure, Result};
use crate::resilience::circuit_breaker::CommandKey;

type FallbackFactory<T> = Arc<dyn Fn(&Error) -> BoxFuture<'static, std::result::Result<T, BoxError>> + Send + Sync>;

pub enum Fallback<T> {
    Value(T),
    Factory(FallbackFactory<T>),
}

impl<T> Fallback<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn value(value: T) -> Self {
        Self::Value(value)
    }

    /// Synchronous factory.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Error) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(move |error: &Error| {
            let outcome = f(error);
            async move { outcome }.boxed()
        }))
    }

    /// Asynchronous factory. The future must not borrow the error.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(&Error) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
    {
        Self::Factory(Arc::new(move |error: &Error| f(error).boxed()))
    }

    /// Substitute a value for `cause`, or fail with both errors chained.
    pub async fn resolve(&self, cause: Error, command_key: &CommandKey) -> Result<T> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Factory(factory) => {
                let pending = factory(&cause);
                pending.await.map_err(|error| Error::FallbackFailed {
                    command_key: command_key.to_string(),
                    source: FallbackFailure::new(error, cause),
                })
            }
        }
    }
}

impl<T: Clone> Clone for Fallback<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(value) => Self::Value(value.clone()),
            Self::Factory(factory) => Self::Factory(factory.clone()),
        }
    }
}

impl<T> std::fmt::Debug for Fallback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Fallback::Value(..)"),
            Self::Factory(_) => f.write_str("Fallback::Factory(..)"),
        }
    }
}
