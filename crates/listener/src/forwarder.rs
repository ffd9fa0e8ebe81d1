//! Reverse-proxying webhooks to the backend CI server.

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, Uri};
use bytes::Bytes;
use reqwest::redirect::Policy;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::WebhookRequest;

/// Headers that describe a single connection and are never relayed.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Forwarding a webhook to the backend failed.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The backend URL cannot be proxied to.
    #[error("backend URL '{url}' is not usable: {reason}")]
    InvalidBackend { url: String, reason: String },

    /// The HTTP client could not be constructed.
    #[error("could not build HTTP client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },

    /// A forwarded header value could not be represented.
    #[error("could not build forwarded header {name}: {reason}")]
    Header { name: &'static str, reason: String },

    /// The backend could not be reached or did not answer.
    #[error("request to backend {url} failed: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered but its body could not be read.
    #[error("response body from backend {url} could not be read: {source}")]
    Response {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
}

/// Relays a webhook to the backend and returns the backend's response.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Sends `request` on and returns the response to relay to the caller.
    async fn forward(&self, request: WebhookRequest) -> Result<Response<Bytes>, ForwardError>;
}

/// A [`Forwarder`] that replays requests over HTTP(S) with `reqwest`.
///
/// The backend sees the original method, headers, and body. Its path is the
/// backend path joined with the request path by a single slash, and its query
/// is the backend query followed by the request query. `Host` names the
/// backend and the caller's address is appended to `X-Forwarded-For`.
/// Redirects are relayed to the caller, not followed.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    backend: Url,
    host: HeaderValue,
}

impl HttpForwarder {
    /// Creates a forwarder targeting `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::InvalidBackend`] if `backend` is not an
    /// `http`/`https` URL with a host.
    pub fn new(backend: Url) -> Result<Self, ForwardError> {
        let invalid = |reason: &str| ForwardError::InvalidBackend {
            url: backend.to_string(),
            reason: reason.to_string(),
        };
        if !matches!(backend.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        let host = backend.host_str().ok_or_else(|| invalid("no host"))?;
        let authority = match backend.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let host = HeaderValue::from_str(&authority).map_err(|e| invalid(&e.to_string()))?;

        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|source| ForwardError::Client { source })?;

        Ok(Self {
            client,
            backend,
            host,
        })
    }

    /// The backend URL a request for `uri` is sent to.
    pub fn target_url(&self, uri: &Uri) -> Url {
        let mut target = self.backend.clone();
        target.set_path(&join_paths(self.backend.path(), uri.path()));

        let query = match (self.backend.query().filter(|q| !q.is_empty()), uri.query()) {
            (Some(base), Some(extra)) if !extra.is_empty() => Some(format!("{base}&{extra}")),
            (Some(base), _) => Some(base.to_string()),
            (None, extra) => extra.map(str::to_string),
        };
        target.set_query(query.as_deref());
        target
    }

    fn outbound_headers(&self, request: &WebhookRequest) -> Result<HeaderMap, ForwardError> {
        let mut headers = request.headers().clone();
        strip_hop_by_hop(&mut headers);
        // Recomputed from the buffered body.
        headers.remove(header::CONTENT_LENGTH);
        headers.insert(header::HOST, self.host.clone());

        if let Some(remote) = request.remote_addr() {
            let client_ip = remote.ip().to_string();
            let prior: Vec<&str> = headers
                .get_all(X_FORWARDED_FOR)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .collect();
            let chain = if prior.is_empty() {
                client_ip
            } else {
                format!("{}, {client_ip}", prior.join(", "))
            };
            let value = HeaderValue::from_str(&chain).map_err(|e| ForwardError::Header {
                name: X_FORWARDED_FOR,
                reason: e.to_string(),
            })?;
            headers.insert(X_FORWARDED_FOR, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, request: WebhookRequest) -> Result<Response<Bytes>, ForwardError> {
        let url = self.target_url(request.uri());
        let headers = self.outbound_headers(&request)?;
        info!(backend = %url, "proxying webhook to backend");

        let upstream = self
            .client
            .request(request.method().clone(), url.clone())
            .headers(headers)
            .body(request.body())
            .send()
            .await
            .map_err(|source| ForwardError::Request {
                url: url.clone(),
                source,
            })?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = upstream
            .bytes()
            .await
            .map_err(|source| ForwardError::Response { url, source })?;
        debug!(%status, bytes = body.len(), "backend responded");

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Joins two URL paths with exactly one slash between them.
fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Removes the fixed hop-by-hop headers plus any named in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}
