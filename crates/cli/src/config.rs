//! Command-line and environment configuration.
//!
//! Every flag can also be set through an environment variable with the
//! `GIT_WEBHOOK_PROXY_` prefix. Flags are parsed once into an immutable
//! [`ProxyConfig`] that the rest of the binary reads from.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use listener::{Route, ServeConfig, TlsListenConfig, WebhookRouter, DEFAULT_MAX_BODY_BYTES};
use thiserror::Error;
use url::Url;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Keeps a local mirror of every Git repository named in incoming webhooks up
/// to date, then forwards each webhook to the backend CI server.
#[derive(Debug, Parser)]
#[command(name = "git-webhook-proxy", version)]
pub struct Args {
    /// Address to accept HTTP webhooks on, e.g. `:8080` or `127.0.0.1:8080`.
    #[arg(long, env = "GIT_WEBHOOK_PROXY_LISTEN", value_parser = parse_listen_address)]
    pub listen: Option<SocketAddr>,

    /// Address to accept HTTPS webhooks on.
    #[arg(long, env = "GIT_WEBHOOK_PROXY_TLS_LISTEN", value_parser = parse_listen_address)]
    pub tls_listen: Option<SocketAddr>,

    /// PEM certificate chain for the HTTPS listener.
    #[arg(long, env = "GIT_WEBHOOK_PROXY_TLS_CERT", default_value = "proxy.crt")]
    pub tls_cert: PathBuf,

    /// PEM private key for the HTTPS listener.
    #[arg(long, env = "GIT_WEBHOOK_PROXY_TLS_KEY", default_value = "proxy.key")]
    pub tls_key: PathBuf,

    /// Base URL of the backend that webhooks are forwarded to.
    #[arg(long, env = "GIT_WEBHOOK_PROXY_REMOTE")]
    pub remote: Url,

    /// Directory under which repository mirrors are kept.
    #[arg(long, env = "GIT_WEBHOOK_PROXY_MIRROR_PATH", default_value = "/tmp/mirror")]
    pub mirror_path: PathBuf,

    /// Path to the `git` binary.
    #[arg(long, env = "GIT_WEBHOOK_PROXY_GIT", default_value = "/usr/bin/git")]
    pub git: PathBuf,

    /// Extra webhook route as PATH=KIND, where KIND is one of jenkins,
    /// github-form, github-json or bitbucket. Repeatable.
    #[arg(
        long = "route",
        env = "GIT_WEBHOOK_PROXY_ROUTES",
        value_name = "PATH=KIND",
        value_delimiter = ','
    )]
    pub routes: Vec<Route>,

    /// Kill any git command still running after this many seconds.
    #[arg(long, env = "GIT_WEBHOOK_PROXY_GIT_TIMEOUT_SECS")]
    pub git_timeout_secs: Option<u64>,

    /// Largest webhook body accepted, in bytes.
    #[arg(long, env = "GIT_WEBHOOK_PROXY_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Log output format.
    #[arg(long, env = "GIT_WEBHOOK_PROXY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// OTLP/gRPC endpoint to export trace spans to, e.g. `http://localhost:4317`.
    #[arg(long, env = "GIT_WEBHOOK_PROXY_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

/// Accepts `host:port`, or `:port` for every interface.
fn parse_listen_address(value: &str) -> Result<SocketAddr, String> {
    let value = value.trim();
    let candidate = match value.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => value.to_string(),
    };
    candidate
        .to_socket_addrs()
        .map_err(|e| format!("invalid listen address '{value}': {e}"))?
        .next()
        .ok_or_else(|| format!("listen address '{value}' resolved to nothing"))
}

/// The configuration is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Both `--listen` and `--tls-listen` are disabled.
    #[error("Quitting as neither HTTP nor TLS were enabled")]
    NoListeners,

    /// A zero timeout would fail every git invocation.
    #[error("--git-timeout-secs must be greater than zero")]
    ZeroGitTimeout,

    /// A zero limit would refuse every non-empty webhook.
    #[error("--max-body-bytes must be greater than zero")]
    ZeroBodyLimit,
}

/// Validated, immutable proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub serve: ServeConfig,
    pub backend: Url,
    pub mirror_root: PathBuf,
    pub git: PathBuf,
    pub git_timeout: Option<Duration>,
    pub routes: Vec<Route>,
    pub log_format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

impl ProxyConfig {
    /// The default routes plus any configured with `--route`.
    pub fn router(&self) -> WebhookRouter {
        self.routes
            .iter()
            .fold(WebhookRouter::default_routes(), |router, route| {
                router.with_route(route.path.clone(), route.hook)
            })
    }
}

impl TryFrom<Args> for ProxyConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.listen.is_none() && args.tls_listen.is_none() {
            return Err(ConfigError::NoListeners);
        }
        if args.git_timeout_secs == Some(0) {
            return Err(ConfigError::ZeroGitTimeout);
        }
        if args.max_body_bytes == 0 {
            return Err(ConfigError::ZeroBodyLimit);
        }

        let tls = args.tls_listen.map(|address| TlsListenConfig {
            address,
            certificate: args.tls_cert,
            private_key: args.tls_key,
        });

        Ok(Self {
            serve: ServeConfig {
                http: args.listen,
                tls,
                max_body_bytes: args.max_body_bytes,
            },
            backend: args.remote,
            mirror_root: args.mirror_path,
            git: args.git,
            git_timeout: args.git_timeout_secs.map(Duration::from_secs),
            routes: args.routes,
            log_format: args.log_format,
            otlp_endpoint: args.otlp_endpoint,
        })
    }
}
