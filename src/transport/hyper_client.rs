//! Default transport over hyper-util's pooled client.

use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use http_body_util::{BodyExt, Full};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::config::schema::TimeoutConfig;
use crate::error::{Failure, TransportErrorKind};
use crate::http::{ConcreteRequest, Response, ResponseBody};
use crate::transport::Transport;

/// HTTP/1.1 and HTTP/2 transport. Pooling stays inside hyper-util.
#[derive(Clone, Debug)]
pub struct HyperTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    request_timeout: Option<Duration>,
}

impl HyperTransport {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(timeouts.connect_ms)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            request_timeout: timeouts.request_ms.map(Duration::from_millis),
        }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new(&TimeoutConfig::default())
    }
}

impl Transport for HyperTransport {
    fn invoke(&self, request: ConcreteRequest) -> BoxFuture<'static, Result<Response, Failure>> {
        let client = self.client.clone();
        let request_timeout = self.request_timeout;

        Box::pin(async move {
            let (method, uri, headers, body) = request.into_parts();
            let mut outbound = http::Request::new(Full::new(body));
            *outbound.method_mut() = method;
            *outbound.uri_mut() = uri;
            *outbound.headers_mut() = headers;

            let pending = client.request(outbound);
            let result = match request_timeout {
                Some(limit) => tokio::time::timeout(limit, pending)
                    .await
                    .map_err(|_| Failure::Timeout(limit))?,
                None => pending.await,
            };

            let response = result.map_err(|e| {
                let kind = if e.is_connect() {
                    TransportErrorKind::Connect
                } else {
                    TransportErrorKind::Io
                };
                Failure::transport(kind, e)
            })?;

            let (parts, incoming) = response.into_parts();
            Ok::<_, Failure>(Response::new(parts.status, parts.headers, body_stream(incoming)))
        })
    }
}

fn body_stream(incoming: hyper::body::Incoming) -> ResponseBody {
    let stream = incoming
        .into_data_stream()
        .map(|chunk| chunk.map_err(|e| Failure::transport(TransportErrorKind::Io, e)))
        .boxed();
    ResponseBody::from_stream(stream)
}
