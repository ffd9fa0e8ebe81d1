//! The per-request webhook pipeline.
//!
//! ```text
//! resolve route → extract locator → canonicalize → sync mirror → forward
//! ```
//!
//! Every step must succeed before the next runs. The backend only ever sees a
//! webhook once the mirror it refers to is current.

use std::sync::Arc;

use axum::http::{header, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use coordinator::{MirrorCoordinator, SyncOutcome};
use domain::{
    canonicalize, CanonicalMirrorKey, MirrorSyncError, ParseError, RepositoryLocator, RequestId,
};
use thiserror::Error;
use tracing::{debug, field, info, instrument, warn, Instrument, Span};

use crate::forwarder::{ForwardError, Forwarder};
use crate::hooks::HookKind;
use crate::router::WebhookRouter;
use crate::WebhookRequest;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A webhook could not be proxied.
///
/// Each variant maps to one HTTP status via [`HandlerError::status`]; the
/// response body is the error message.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No parser is registered for the request path.
    #[error("No webhook handler is registered for {path}")]
    UnknownRoute {
        /// The request path that matched no route.
        path: String,
    },

    /// The parser rejected the request.
    #[error("{hook} returned error: {source}")]
    Parse {
        /// The parser the route selected.
        hook: HookKind,
        /// Why the request could not be parsed.
        #[source]
        source: ParseError,
    },

    /// The parser understood the request but found no repository in it.
    #[error("{hook} could not determine the repository URL from this request")]
    NoRepositoryFound {
        /// The parser the route selected.
        hook: HookKind,
    },

    /// The mirror could not be brought up to date.
    #[error(transparent)]
    Sync(#[from] MirrorSyncError),

    /// The mirror sync task panicked or was cancelled.
    #[error("Mirror sync for {locator} was aborted: {source}")]
    SyncAborted {
        /// The repository whose mirror was being synced.
        locator: RepositoryLocator,
        /// The join failure of the sync task.
        #[source]
        source: tokio::task::JoinError,
    },

    /// The backend could not be reached.
    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl HandlerError {
    /// The HTTP status reported to the webhook sender.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownRoute { .. } => StatusCode::NOT_FOUND,
            Self::Parse { .. }
            | Self::NoRepositoryFound { .. }
            | Self::Sync(_)
            | Self::SyncAborted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Forward(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{self}\n"),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// WebhookProxy
// ---------------------------------------------------------------------------

/// Handles one webhook end to end.
///
/// Cheap to share: hold it in an `Arc` and call [`WebhookProxy::handle`] from
/// as many connections as needed. Requests for the same repository are
/// serialised by the [`MirrorCoordinator`]; everything else runs in parallel.
pub struct WebhookProxy {
    router: WebhookRouter,
    coordinator: Arc<MirrorCoordinator>,
    forwarder: Arc<dyn Forwarder>,
}

impl WebhookProxy {
    /// Creates a proxy that dispatches by `router`, keeps mirrors current
    /// through `coordinator`, and relays through `forwarder`.
    pub fn new(
        router: WebhookRouter,
        coordinator: Arc<MirrorCoordinator>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        Self {
            router,
            coordinator,
            forwarder,
        }
    }

    /// The route table requests are dispatched by.
    pub fn router(&self) -> &WebhookRouter {
        &self.router
    }

    /// Runs the full pipeline for `request` and returns the backend's response.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] describing the first step that failed. When an
    /// error is returned nothing was forwarded.
    #[instrument(
        name = "webhook",
        skip_all,
        fields(
            request_id = %RequestId::new_random(),
            method = %request.method(),
            path = %request.path(),
            locator = field::Empty,
            key = field::Empty,
        )
    )]
    pub async fn handle(&self, request: WebhookRequest) -> Result<Response<Bytes>, HandlerError> {
        let result = self.process(request).await;
        match &result {
            Ok(response) => info!(status = %response.status(), "webhook forwarded"),
            Err(e) => warn!(status = %e.status(), error = %e, "webhook not forwarded"),
        }
        result
    }

    async fn process(&self, request: WebhookRequest) -> Result<Response<Bytes>, HandlerError> {
        let hook = self
            .router
            .resolve(request.path())
            .ok_or_else(|| HandlerError::UnknownRoute {
                path: request.path().to_string(),
            })?;

        let locator = hook
            .locator_from(&request)
            .map_err(|source| HandlerError::Parse { hook, source })?
            .ok_or(HandlerError::NoRepositoryFound { hook })?;
        let key = canonicalize(&locator);
        Span::current()
            .record("locator", field::display(&locator))
            .record("key", field::display(&key));
        info!(%hook, "webhook refers to repository");

        let outcome = self.sync_detached(locator, key).await?;
        debug!(?outcome, "mirror is current");

        Ok(self.forwarder.forward(request).await?)
    }

    /// Runs the sync on its own task so that a caller hanging up mid-clone
    /// cannot leave a half-written mirror behind.
    async fn sync_detached(
        &self,
        locator: RepositoryLocator,
        key: CanonicalMirrorKey,
    ) -> Result<SyncOutcome, HandlerError> {
        let coordinator = Arc::clone(&self.coordinator);
        let task_locator = locator.clone();
        let task = tokio::spawn(
            async move { coordinator.sync(&task_locator, &key).await }.instrument(Span::current()),
        );

        match task.await {
            Ok(result) => Ok(result?),
            Err(source) => Err(HandlerError::SyncAborted { locator, source }),
        }
    }
}

impl std::fmt::Debug for WebhookProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookProxy")
            .field("router", &self.router)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}
