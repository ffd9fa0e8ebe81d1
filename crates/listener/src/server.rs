//! HTTP and HTTPS listeners.
//!
//! Both listeners serve the same [`app`]. Every path goes to a single fallback
//! handler: it refuses unrouted paths, buffers the body up to the configured
//! limit, and hands the request to [`WebhookProxy::handle`].

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::IntoResponse;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use domain::ParseError;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::handler::{HandlerError, WebhookProxy};
use crate::WebhookRequest;

/// Largest webhook body accepted by default (10 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// How long the TLS listener waits for in-flight requests on shutdown.
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Configuration and errors
// ---------------------------------------------------------------------------

/// The HTTPS listener's address and key material.
#[derive(Debug, Clone)]
pub struct TlsListenConfig {
    /// Address to accept HTTPS connections on.
    pub address: SocketAddr,
    /// PEM certificate chain.
    pub certificate: PathBuf,
    /// PEM private key.
    pub private_key: PathBuf,
}

/// Which listeners to start. At least one must be present.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// Plain HTTP listen address.
    pub http: Option<SocketAddr>,
    /// HTTPS listener, if enabled.
    pub tls: Option<TlsListenConfig>,
    /// Bodies larger than this are refused.
    pub max_body_bytes: usize,
}

/// A listener could not be started or failed while running.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Neither listener was configured.
    #[error("Quitting as neither HTTP nor TLS were enabled")]
    NoListeners,

    /// The HTTP listen address could not be bound.
    #[error("could not bind HTTP listener on {address}: {source}")]
    Bind {
        /// The requested address.
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The certificate or private key could not be loaded.
    #[error("could not load TLS certificate {} / key {}: {source}", .certificate.display(), .private_key.display())]
    TlsConfig {
        /// Path of the PEM certificate chain.
        certificate: PathBuf,
        /// Path of the PEM private key.
        private_key: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A running listener stopped with an I/O error.
    #[error("{listener} listener on {address} failed: {source}")]
    Listener {
        /// `"HTTP"` or `"TLS"`.
        listener: &'static str,
        /// The address the listener was serving.
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A listener task panicked or was cancelled.
    #[error("listener task ended abnormally: {source}")]
    Task {
        #[source]
        source: tokio::task::JoinError,
    },
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    proxy: Arc<WebhookProxy>,
    max_body_bytes: usize,
}

/// The axum application shared by both listeners.
pub fn app(proxy: Arc<WebhookProxy>, max_body_bytes: usize) -> Router {
    Router::new().fallback(dispatch).with_state(AppState {
        proxy,
        max_body_bytes,
    })
}

async fn dispatch(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> axum::response::Response {
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);
    info!(
        method = %request.method(),
        uri = %request.uri(),
        remote = ?remote_addr,
        "incoming webhook"
    );

    // Unrouted requests are refused before their body is read.
    let Some(hook) = state.proxy.router().resolve(request.uri().path()) else {
        warn!(path = request.uri().path(), "no webhook handler for path");
        return HandlerError::UnknownRoute {
            path: request.uri().path().to_string(),
        }
        .into_response();
    };

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            let source = ParseError::UnreadableBody {
                reason: e.to_string(),
            };
            let error = HandlerError::Parse { hook, source };
            warn!(%error, "could not buffer webhook body");
            return error.into_response();
        }
    };

    let request = WebhookRequest::from_parts(parts, body).with_remote_addr(remote_addr);
    match state.proxy.handle(request).await {
        Ok(response) => response.map(Body::from),
        Err(e) => e.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Runs the configured listeners until `shutdown` resolves or one of them fails.
///
/// On shutdown both listeners stop accepting connections and drain in-flight
/// requests before this returns.
///
/// # Errors
///
/// Returns [`ServeError::NoListeners`] if neither listener is configured, or
/// the first error raised while binding or serving.
pub async fn serve(
    config: ServeConfig,
    proxy: Arc<WebhookProxy>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), ServeError> {
    if config.http.is_none() && config.tls.is_none() {
        return Err(ServeError::NoListeners);
    }

    let app = app(proxy, config.max_body_bytes);
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut listeners = JoinSet::new();

    if let Some(address) = config.http {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServeError::Bind { address, source })?;
        let bound = listener.local_addr().unwrap_or(address);
        info!(address = %bound, "HTTP listener started");

        let app = app.clone();
        let mut stop = stop_rx.clone();
        listeners.spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = stop.wait_for(|stopping| *stopping).await;
            })
            .await
            .map_err(|source| ServeError::Listener {
                listener: "HTTP",
                address: bound,
                source,
            })
        });
    }

    if let Some(tls) = config.tls {
        let rustls = RustlsConfig::from_pem_file(&tls.certificate, &tls.private_key)
            .await
            .map_err(|source| ServeError::TlsConfig {
                certificate: tls.certificate.clone(),
                private_key: tls.private_key.clone(),
                source,
            })?;
        info!(address = %tls.address, "TLS listener started");

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        let mut stop = stop_rx.clone();
        tokio::spawn(async move {
            let _ = stop.wait_for(|stopping| *stopping).await;
            shutdown_handle.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
        });

        let address = tls.address;
        listeners.spawn(async move {
            axum_server::bind_rustls(address, rustls)
                .handle(handle)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .map_err(|source| ServeError::Listener {
                    listener: "TLS",
                    address,
                    source,
                })
        });
    }

    tokio::spawn(async move {
        shutdown.await;
        debug!("stopping listeners");
        let _ = stop_tx.send(true);
    });

    let mut first_error = None;
    while let Some(joined) = listeners.join_next().await {
        let result = joined.map_err(|source| ServeError::Task { source }).and_then(|r| r);
        if let Err(e) = result {
            // One listener failing takes the other down with it.
            if first_error.is_none() {
                first_error = Some(e);
            }
            listeners.abort_all();
        }
    }
    first_error.map_or(Ok(()), Err)
}
