//! Request descriptors and per-attempt concrete requests.
//!
//! # Responsibilities
//! - Describe one logical call (method key, path template, headers, body)
//! - Expand path templates and query parameters against an endpoint
//! - Produce a fresh `ConcreteRequest` for every attempt
//!
//! # Design Decisions
//! - Descriptors are immutable once built and shared by all attempts
//! - Bodies are produced per attempt so lazy producers can stamp nonces
//! - Concrete requests are consumed by value; interceptors return a new one

use std::borrow::Borrow;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, Uri};
use serde::Serialize;
use url::Url;

use crate::error::{Error, Result};

/// Stable identifier of a logical operation (`Interface#method(signature)`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey(Arc<str>);

impl MethodKey {
    pub fn new(interface: &str, signature: &str) -> Self {
        Self(Arc::from(format!("{interface}#{signature}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for MethodKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MethodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces the request body for each attempt.
#[derive(Clone, Default)]
pub enum BodyProducer {
    #[default]
    Empty,
    Bytes(Bytes),
    Lazy(Arc<dyn Fn() -> Bytes + Send + Sync>),
}

impl BodyProducer {
    pub fn produce(&self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Bytes(bytes) => bytes.clone(),
            Self::Lazy(producer) => producer(),
        }
    }
}

impl std::fmt::Debug for BodyProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

/// Static part of a method: HTTP method, path template and fixed headers.
#[derive(Clone, Debug)]
pub struct RequestTemplate {
    method: Method,
    path: String,
    headers: HeaderMap,
}

impl RequestTemplate {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// Per-invocation arguments bound into a descriptor.
#[derive(Clone, Debug, Default)]
pub struct CallArgs {
    path_params: Vec<(String, String)>,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: BodyProducer,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.path_params.push((name.into(), value.to_string()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = BodyProducer::Bytes(body.into());
        self
    }

    pub fn lazy_body<F>(mut self, producer: F) -> Self
    where
        F: Fn() -> Bytes + Send + Sync + 'static,
    {
        self.body = BodyProducer::Lazy(Arc::new(producer));
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| Error::InvalidRequest(format!("failed to encode json body: {e}")))?;
        Ok(self
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body))
    }
}

/// Immutable description of one logical call.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    service: Arc<str>,
    method_key: MethodKey,
    method: Method,
    path_template: String,
    path_params: Vec<(String, String)>,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: BodyProducer,
}

impl RequestDescriptor {
    /// Bind call arguments to a method template. Argument headers override
    /// template headers of the same name.
    pub fn new(
        service: impl Into<Arc<str>>,
        method_key: MethodKey,
        template: &RequestTemplate,
        args: CallArgs,
    ) -> Self {
        let mut headers = template.headers.clone();
        let mut last_name: Option<HeaderName> = None;
        for (name, value) in args.headers {
            // `HeaderMap::into_iter` yields `None` for repeated values of the same name.
            let name = match name {
                Some(name) => {
                    headers.remove(&name);
                    last_name = Some(name.clone());
                    name
                }
                None => match &last_name {
                    Some(name) => name.clone(),
                    None => continue,
                },
            };
            headers.append(name, value);
        }

        Self {
            service: service.into(),
            method_key,
            method: template.method.clone(),
            path_template: template.path.clone(),
            path_params: args.path_params,
            query: args.query,
            headers,
            body: args.body,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method_key(&self) -> &MethodKey {
        &self.method_key
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path_template(&self) -> &str {
        &self.path_template
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Expand `{name}` placeholders of one path segment.
    fn expand_segment(&self, segment: &str) -> Result<String> {
        let mut expanded = String::with_capacity(segment.len());
        let mut rest = segment;
        while let Some(open) = rest.find('{') {
            expanded.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                Error::InvalidRequest(format!("unterminated placeholder in {}", self.path_template))
            })?;
            let name = &after[..close];
            let value = self.param(name).ok_or_else(|| {
                Error::InvalidRequest(format!(
                    "missing path parameter `{name}` for {}",
                    self.path_template
                ))
            })?;
            expanded.push_str(value);
            rest = &after[close + 1..];
        }
        expanded.push_str(rest);
        Ok(expanded)
    }

    /// Resolve against `base` into the request for attempt number `attempt`.
    pub fn resolve(&self, base: &Url, attempt: u32) -> Result<ConcreteRequest> {
        let mut url = base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                Error::InvalidRequest(format!("endpoint {base} cannot carry a path"))
            })?;
            segments.pop_if_empty();
            for segment in self.path_template.split('/').filter(|s| !s.is_empty()) {
                segments.push(&self.expand_segment(segment)?);
            }
        }
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.query {
                pairs.append_pair(name, value);
            }
        }

        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e| Error::InvalidRequest(format!("invalid uri {url}: {e}")))?;

        Ok(ConcreteRequest {
            method_key: self.method_key.clone(),
            method: self.method.clone(),
            uri,
            headers: self.headers.clone(),
            body: self.body.produce(),
            attempt,
        })
    }
}

/// A descriptor resolved against one endpoint for one attempt.
#[derive(Debug)]
pub struct ConcreteRequest {
    method_key: MethodKey,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    attempt: u32,
}

impl ConcreteRequest {
    /// Build a request directly, bypassing a descriptor.
    pub fn new(method_key: MethodKey, method: Method, uri: Uri) -> Self {
        Self {
            method_key,
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            attempt: 1,
        }
    }

    pub fn method_key(&self) -> &MethodKey {
        &self.method_key
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// 1-based attempt number within the logical call.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Replace any existing values of `name`.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn append_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.uri = uri;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn into_parts(self) -> (Method, Uri, HeaderMap, Bytes) {
        (self.method, self.uri, self.headers, self.body)
    }
}
