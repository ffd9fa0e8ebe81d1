//! git-webhook-proxy entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: flags and `GIT_WEBHOOK_PROXY_*` environment
//!    variables into an immutable [`config::ProxyConfig`].
//! 2. **Wire observability**: install the `tracing` subscriber and, when
//!    configured, the OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: a [`git::GitMirrorStore`] behind a
//!    [`coordinator::MirrorCoordinator`], an [`listener::HttpForwarder`] for
//!    the backend, and the [`listener::WebhookProxy`] joining them.
//! 4. **Serve** the HTTP and/or HTTPS listeners until SIGINT or SIGTERM.

mod config;
mod telemetry;

use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use coordinator::MirrorCoordinator;
use git::GitMirrorStore;
use listener::{serve, HttpForwarder, WebhookProxy};
use tracing::{info, warn};

use crate::config::{Args, ProxyConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ProxyConfig::try_from(Args::parse())?;
    let _telemetry = telemetry::init(config.log_format, config.otlp_endpoint.as_deref())?;

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("a rustls crypto provider was already installed"))?;

    let router = config.router();
    info!(
        mirror_root = %config.mirror_root.display(),
        backend = %config.backend,
        git = %config.git.display(),
        http = ?config.serve.http,
        tls = ?config.serve.tls.as_ref().map(|tls| tls.address),
        routes = ?router.routes(),
        "starting git webhook proxy"
    );

    let store = GitMirrorStore::new(&config.git).with_timeout(config.git_timeout);
    let coordinator = Arc::new(MirrorCoordinator::new(&config.mirror_root, Arc::new(store)));
    let forwarder = HttpForwarder::new(config.backend.clone()).context("configuring the backend")?;
    let proxy = Arc::new(WebhookProxy::new(router, coordinator, Arc::new(forwarder)));

    serve(config.serve.clone(), proxy, shutdown_signal()).await?;

    info!("Shutting down");
    Ok(())
}

/// Resolves on the first SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}
