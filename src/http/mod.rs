//! HTTP request/response model.
//!
//! # Data Flow
//! ```text
//! RequestTemplate (per method) + CallArgs (per invocation)
//!     → request.rs RequestDescriptor (immutable, per logical call)
//!     → resolve(endpoint, attempt) → ConcreteRequest (per attempt)
//!     → filter chain → transport
//!     → response.rs Response (single-consumption body)
//! ```

pub mod request;
pub mod response;

pub use request::{BodyProducer, CallArgs, ConcreteRequest, MethodKey, RequestDescriptor, RequestTemplate};
pub use response::{Response, ResponseBody};
