//! Buffered, replayable webhook requests.

use std::net::SocketAddr;

use axum::http::{header, request::Parts, HeaderMap, Method, Uri};
use bytes::Bytes;

/// An inbound webhook with its body buffered once.
///
/// Parsers and the forwarder each take a fresh view of the same bytes through
/// [`WebhookRequest::body`], so extracting a locator never consumes what the
/// backend will later receive.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl WebhookRequest {
    /// Creates a request from its components.
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            uri,
            headers,
            body: body.into(),
            remote_addr: None,
        }
    }

    /// Creates a request from `http` request parts and an already-buffered body.
    pub fn from_parts(parts: Parts, body: Bytes) -> Self {
        Self::new(parts.method, parts.uri, parts.headers, body)
    }

    /// Records the address of the caller that sent this webhook.
    #[must_use]
    pub fn with_remote_addr(mut self, remote_addr: Option<SocketAddr>) -> Self {
        self.remote_addr = remote_addr;
        self
    }

    /// The HTTP method, relayed to the backend unchanged.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target as received: path plus raw query.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// The raw (still percent-encoded) query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// The inbound headers, hop-by-hop ones included.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The peer address, when the listener recorded one.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// A fresh view of the buffered body. Cheap: the bytes are shared, not copied.
    pub fn body(&self) -> Bytes {
        self.body.clone()
    }

    /// Returns `true` if the `Content-Type` media type is `essence`, ignoring
    /// parameters such as `charset` and ASCII case.
    pub fn has_content_type(&self, essence: &str) -> bool {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case(essence))
    }
}
