//! Responses and single-consumption bodies.
//!
//! # Design Decisions
//! - A body is read by value, so reading it twice does not compile
//! - Stages that need to look at the body (logging) copy a bounded prefix
//!   while the chunks flow through to the consumer

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt};
use http::{HeaderMap, StatusCode};

use crate::error::Failure;

enum BodyInner {
    Full(Bytes),
    Stream(BoxStream<'static, Result<Bytes, Failure>>),
}

/// Response body owned by whichever stage currently holds the response.
pub struct ResponseBody {
    inner: BodyInner,
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            inner: BodyInner::Full(bytes.into()),
        }
    }

    pub fn from_stream(stream: BoxStream<'static, Result<Bytes, Failure>>) -> Self {
        Self {
            inner: BodyInner::Stream(stream),
        }
    }

    /// True when the body is buffered and has no bytes.
    pub fn is_known_empty(&self) -> bool {
        matches!(&self.inner, BodyInner::Full(bytes) if bytes.is_empty())
    }

    /// Collect the whole body.
    pub async fn bytes(self) -> Result<Bytes, Failure> {
        match self.inner {
            BodyInner::Full(bytes) => Ok(bytes),
            BodyInner::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes, Failure>> {
        match self.inner {
            BodyInner::Full(bytes) if bytes.is_empty() => stream::empty().boxed(),
            BodyInner::Full(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            BodyInner::Stream(stream) => stream,
        }
    }

    /// Copy up to `limit` bytes as they pass through, without holding any
    /// chunk back.
    ///
    /// `on_prefix` runs once with the copy: when `limit` bytes have been
    /// seen, when the stream ends or fails, or when the body is dropped.
    pub fn inspect_prefix<F>(self, limit: usize, on_prefix: F) -> ResponseBody
    where
        F: FnOnce(Bytes) + Send + 'static,
    {
        match self.inner {
            BodyInner::Full(bytes) => {
                on_prefix(bytes.slice(..bytes.len().min(limit)));
                ResponseBody::from_bytes(bytes)
            }
            BodyInner::Stream(inner) => {
                let mut tap = PrefixTap {
                    limit,
                    buffer: BytesMut::new(),
                    on_prefix: Some(on_prefix),
                };
                if limit == 0 {
                    tap.flush();
                }

                let inspected = stream::unfold((inner, tap), |(mut inner, mut tap)| async move {
                    match inner.next().await {
                        Some(Ok(chunk)) => {
                            tap.copy(&chunk);
                            Some((Ok(chunk), (inner, tap)))
                        }
                        Some(Err(failure)) => {
                            tap.flush();
                            Some((Err(failure), (inner, tap)))
                        }
                        None => {
                            tap.flush();
                            None
                        }
                    }
                });
                ResponseBody::from_stream(inspected.boxed())
            }
        }
    }
}

struct PrefixTap<F: FnOnce(Bytes)> {
    limit: usize,
    buffer: BytesMut,
    on_prefix: Option<F>,
}

impl<F: FnOnce(Bytes)> PrefixTap<F> {
    fn copy(&mut self, chunk: &Bytes) {
        if self.on_prefix.is_none() {
            return;
        }
        let take = chunk.len().min(self.limit - self.buffer.len());
        self.buffer.extend_from_slice(&chunk[..take]);
        if self.buffer.len() >= self.limit {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if let Some(on_prefix) = self.on_prefix.take() {
            on_prefix(std::mem::take(&mut self.buffer).freeze());
        }
    }
}

impl<F: FnOnce(Bytes)> Drop for PrefixTap<F> {
    fn drop(&mut self) {
        self.flush();
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            BodyInner::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            BodyInner::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Response of one attempt.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Buffered response with no headers.
    pub fn with_status(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::new(status, HeaderMap::new(), ResponseBody::from_bytes(body))
    }

    /// `200 OK` carrying `value` as JSON.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, Failure> {
        let body = serde_json::to_vec(value).map_err(Failure::decoded)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        Ok(Self::new(StatusCode::OK, headers, ResponseBody::from_bytes(body)))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, ResponseBody) {
        (self.status, self.headers, self.body)
    }
}
