//! HTTP origin client.
//!
//! # Responsibilities
//! - Rewrite stream requests onto the configured origin URL
//! - Forward request bodies as they arrive from the edge
//! - Enforce connect and response-header timeouts
//! - Perform WebSocket upgrades and hand back the raw connection
//!
//! # Design Decisions
//! - One pooled hyper client per origin, shared by all streams
//! - Timeout errors are distinct from connection errors
//! - Response bodies stream through; nothing is buffered whole

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyDataStream, BodyExt, Empty, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::time;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_util::io::{ReaderStream, StreamReader};
use url::Url;

use super::{BodyReader, Origin, OriginError, OriginResponse, WebSocketOpen};
use crate::config::OriginConfig;
use crate::mux::Header;
use crate::stream::request::StreamRequest;

type OriginBody = UnsyncBoxBody<Bytes, io::Error>;

/// Origin reached over plain HTTP with the hyper client.
pub struct HttpOrigin {
    /// Scheme and authority, e.g. `http://127.0.0.1:8080`.
    root: String,
    /// Path prefix from the configured URL, without trailing slash.
    prefix: String,
    client: Client<HttpConnector, OriginBody>,
    request_timeout: Duration,
}

impl HttpOrigin {
    /// Build a client for the origin described by `config`.
    pub fn new(config: &OriginConfig) -> Result<Self, OriginError> {
        let url = Url::parse(&config.url)
            .map_err(|e| OriginError::InvalidRequest(format!("origin url {}: {}", config.url, e)))?;
        if url.scheme() != "http" {
            return Err(OriginError::InvalidRequest(format!(
                "unsupported origin scheme {}",
                url.scheme()
            )));
        }

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.connect_timeout()));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            root: url.origin().ascii_serialization(),
            prefix: url.path().trim_end_matches('/').to_string(),
            client,
            request_timeout: config.request_timeout(),
        })
    }

    fn build_request(
        &self,
        request: &StreamRequest,
        body: OriginBody,
    ) -> Result<Request<OriginBody>, OriginError> {
        let uri = format!("{}{}{}", self.root, self.prefix, request.path);
        let mut builder = Request::builder().method(request.method.clone()).uri(uri);

        if let Some(host) = &request.host {
            builder = builder.header("host", host.as_str());
        }
        for header in &request.headers {
            // `:authority` wins over a forwarded `host`.
            if request.host.is_some() && header.name.eq_ignore_ascii_case("host") {
                continue;
            }
            builder = builder.header(header.name.as_str(), header.value.as_str());
        }

        builder
            .body(body)
            .map_err(|e| OriginError::InvalidRequest(e.to_string()))
    }

    async fn send(&self, request: Request<OriginBody>) -> Result<Response<Incoming>, OriginError> {
        match time::timeout(self.request_timeout, self.client.request(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_connect() => Err(OriginError::Connect(error_chain(&e))),
            Ok(Err(e)) => Err(OriginError::Protocol(error_chain(&e))),
            Err(_) => Err(OriginError::Timeout(self.request_timeout)),
        }
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn round_trip(
        &self,
        request: &StreamRequest,
        body: Option<BodyReader>,
    ) -> Result<OriginResponse, OriginError> {
        let body = match body {
            Some(reader) => StreamBody::new(ReaderStream::new(reader).map_ok(Frame::data)).boxed_unsync(),
            None => empty_body(),
        };
        let request = self.build_request(request, body)?;

        let response = self.send(request).await?;
        let (parts, incoming) = response.into_parts();

        Ok(OriginResponse {
            status: parts.status,
            headers: to_stream_headers(&parts.headers),
            body: body_reader(incoming),
        })
    }

    async fn open_websocket(&self, request: &StreamRequest) -> Result<WebSocketOpen, OriginError> {
        let mut request = self.build_request(request, empty_body())?;
        let headers = request.headers_mut();
        headers.insert("connection", HeaderValue::from_static("Upgrade"));
        headers.insert("upgrade", HeaderValue::from_static("websocket"));
        if !headers.contains_key("sec-websocket-version") {
            headers.insert("sec-websocket-version", HeaderValue::from_static("13"));
        }
        if !headers.contains_key("sec-websocket-key") {
            let key = HeaderValue::try_from(generate_key())
                .map_err(|e| OriginError::InvalidRequest(e.to_string()))?;
            headers.insert("sec-websocket-key", key);
        }

        let response = self.send(request).await?;
        let status = response.status();
        let headers = to_stream_headers(response.headers());

        if status != StatusCode::SWITCHING_PROTOCOLS {
            return Ok(WebSocketOpen::Rejected(OriginResponse {
                status,
                headers,
                body: body_reader(response.into_body()),
            }));
        }

        let upgraded = hyper::upgrade::on(response)
            .await
            .map_err(|e| OriginError::UpgradeFailed(error_chain(&e)))?;

        Ok(WebSocketOpen::Upgraded {
            headers,
            io: Box::new(TokioIo::new(upgraded)),
        })
    }
}

fn empty_body() -> OriginBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn body_reader(incoming: Incoming) -> BodyReader {
    let stream = BodyDataStream::new(incoming).map_err(io::Error::other);
    Box::pin(StreamReader::new(stream))
}

/// Flatten a header map into stream headers, keeping duplicates.
fn to_stream_headers(headers: &HeaderMap) -> Vec<Header> {
    headers
        .iter()
        .map(|(name, value)| {
            Header::new(name.as_str(), String::from_utf8_lossy(value.as_bytes()))
        })
        .collect()
}

/// Render an error with its sources, e.g. `client error (Connect): tcp connect error: Connection refused`.
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
