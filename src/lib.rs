//! Resilient client-side HTTP request dispatch.
//!
//! A method invocation becomes a `RequestDescriptor`, runs under a circuit
//! breaker command, is dispatched to a fixed or load-balanced endpoint
//! through a filter chain and the transport, is retried on failure, and may
//! be substituted by a fallback.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod http;
pub mod load_balancer;
pub mod observability;
pub mod resilience;
pub mod transport;

pub use client::{CallHandle, Client, ClientBuilder, MethodRegistry, MethodSpec};
pub use codec::JsonCodec;
pub use config::ClientConfig;
pub use error::{BoxError, Error, Failure, FailureClass, Result};
pub use http::{CallArgs, ConcreteRequest, MethodKey, RequestDescriptor, RequestTemplate, Response};
pub use resilience::{CircuitBreaker, CommandKey, Fallback, RetryPolicy};
pub use transport::Transport;
