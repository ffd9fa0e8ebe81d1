//! Webhook proxy HTTP surface.
//!
//! Receives webhooks, works out which repository each one is about, makes sure
//! the local mirror of that repository is current, and only then relays the
//! untouched webhook to the backend CI server.
//!
//! ## Request Flow
//!
//! | Step | Component | On failure |
//! |------|-----------|------------|
//! | Match path to parser | [`WebhookRouter`] | 404 |
//! | Buffer body | [`server`] | 500 |
//! | Extract locator | [`HookKind`] | 500 |
//! | Canonicalize + sync mirror | [`coordinator::MirrorCoordinator`] | 500 |
//! | Relay to backend | [`Forwarder`] | 502 |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, payload formats, and reverse-proxy
//! details live here. Mirror semantics come from the [`coordinator`] and
//! [`domain`] crates.

pub mod forwarder;
pub mod handler;
pub mod hooks;
pub mod request;
pub mod router;
pub mod server;

pub use forwarder::{ForwardError, Forwarder, HttpForwarder};
pub use handler::{HandlerError, WebhookProxy};
pub use hooks::{HookKind, UnknownHookKind};
pub use request::WebhookRequest;
pub use router::{Route, RouteParseError, WebhookRouter};
pub use server::{app, serve, ServeConfig, ServeError, TlsListenConfig, DEFAULT_MAX_BODY_BYTES};
