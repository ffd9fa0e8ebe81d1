//! End-to-end tests: the proxy app in front of a real backend on a loopback
//! port, with the mirror store replaced by an in-memory fake.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use bytes::Bytes;
use coordinator::MirrorCoordinator;
use domain::{CanonicalMirrorKey, MirrorOperation, MirrorStore, RepositoryLocator, StoreError};
use listener::{
    app, serve, HookKind, HttpForwarder, ServeConfig, ServeError, WebhookProxy, WebhookRouter,
    DEFAULT_MAX_BODY_BYTES,
};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower::ServiceExt;
use tracing::field::{Field, Visit};
use tracing::span::{Id, Record};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;
use url::Url;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeStore {
    operations: Mutex<Vec<(MirrorOperation, PathBuf)>>,
    fail_create: bool,
    /// Signalled once `create` has started.
    clone_started: Option<Arc<Notify>>,
    /// When set, `create` blocks until this is signalled.
    clone_gate: Option<Arc<Notify>>,
}

impl FakeStore {
    fn operations(&self) -> Vec<(MirrorOperation, PathBuf)> {
        self.operations.lock().unwrap().clone()
    }
}

#[async_trait]
impl MirrorStore for FakeStore {
    async fn create(
        &self,
        _locator: &RepositoryLocator,
        mirror_root: &Path,
        key: &CanonicalMirrorKey,
    ) -> Result<(), StoreError> {
        let target = mirror_root.join(key.as_str());
        self.operations
            .lock()
            .unwrap()
            .push((MirrorOperation::Create, target.clone()));
        if let Some(started) = &self.clone_started {
            started.notify_one();
        }
        if let Some(gate) = &self.clone_gate {
            gate.notified().await;
        }
        if self.fail_create {
            return Err(StoreError::Failed {
                operation: MirrorOperation::Create,
                status: "exit status: 128".into(),
                stderr: "fatal: Could not read from remote repository.".into(),
            });
        }
        tokio::fs::create_dir_all(&target).await.unwrap();
        Ok(())
    }

    async fn refresh(&self, mirror: &Path) -> Result<(), StoreError> {
        self.operations
            .lock()
            .unwrap()
            .push((MirrorOperation::Refresh, mirror.to_path_buf()));
        Ok(())
    }

    async fn compact(&self, mirror: &Path) {
        self.operations
            .lock()
            .unwrap()
            .push((MirrorOperation::Compact, mirror.to_path_buf()));
    }
}

/// What the backend saw of one forwarded request.
#[derive(Debug, Clone)]
struct Seen {
    method: String,
    uri: String,
    host: Option<String>,
    content_type: Option<String>,
    body: Bytes,
}

type Log = Arc<Mutex<Vec<Seen>>>;

async fn record(State(log): State<Log>, request: Request) -> axum::response::Response {
    let (parts, body) = request.into_parts();
    let header_value = |name: header::HeaderName| {
        parts
            .headers
            .get(name)
            .map(|v| v.to_str().unwrap().to_string())
    };
    let seen = Seen {
        method: parts.method.to_string(),
        uri: parts.uri.to_string(),
        host: header_value(header::HOST),
        content_type: header_value(header::CONTENT_TYPE),
        body: to_bytes(body, usize::MAX).await.unwrap(),
    };
    log.lock().unwrap().push(seen);

    if parts.uri.path() == "/moved" {
        return (StatusCode::FOUND, [(header::LOCATION, "/elsewhere")]).into_response();
    }
    (
        StatusCode::ACCEPTED,
        [("x-backend", "ci")],
        "Scheduled polling of app",
    )
        .into_response()
}

async fn start_backend() -> (SocketAddr, Log) {
    let log = Log::default();
    let router = Router::new().fallback(record).with_state(Arc::clone(&log));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await });
    (address, log)
}

struct Harness {
    mirrors: TempDir,
    store: Arc<FakeStore>,
    backend: SocketAddr,
    log: Log,
    app: Router,
}

impl Harness {
    async fn new(store: FakeStore) -> Self {
        Self::with_limit(store, DEFAULT_MAX_BODY_BYTES).await
    }

    async fn with_limit(store: FakeStore, max_body_bytes: usize) -> Self {
        let (backend, log) = start_backend().await;
        Self::pointing_at(store, backend, log, max_body_bytes)
    }

    fn pointing_at(store: FakeStore, backend: SocketAddr, log: Log, max_body_bytes: usize) -> Self {
        let mirrors = TempDir::new().unwrap();
        let store = Arc::new(store);
        let coordinator = Arc::new(MirrorCoordinator::new(
            mirrors.path(),
            Arc::clone(&store) as Arc<dyn MirrorStore>,
        ));
        let forwarder =
            HttpForwarder::new(Url::parse(&format!("http://{backend}")).unwrap()).unwrap();
        let router = WebhookRouter::default()
            .with_route("/github-json", HookKind::GitHubJson)
            .with_route("/moved", HookKind::JenkinsQuery);
        let proxy = WebhookProxy::new(router, coordinator, Arc::new(forwarder));

        Self {
            app: app(Arc::new(proxy), max_body_bytes),
            mirrors,
            store,
            backend,
            log,
        }
    }

    async fn send(&self, request: Request) -> (StatusCode, axum::http::HeaderMap, String) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    fn seen(&self) -> Vec<Seen> {
        self.log.lock().unwrap().clone()
    }
}

fn get(uri: &str) -> Request {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn form_post(uri: &str, body: String) -> Request {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

fn github_form(repository_url: &str) -> String {
    let payload = format!(r#"{{"ref":"refs/heads/main","repository":{{"url":"{repository_url}"}}}}"#);
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("payload", &payload)
        .finish()
}

// ---------------------------------------------------------------------------
// Happy paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn notify_commit_clones_then_relays_backend_response() {
    let harness = Harness::new(FakeStore::default()).await;

    let (status, headers, body) = harness
        .send(get("/git/notifyCommit?url=ssh://git@example.com/team/app.git&branches=main"))
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(headers["x-backend"], "ci");
    assert_eq!(body, "Scheduled polling of app");

    let operations = harness.store.operations();
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].0, MirrorOperation::Create);
    assert_eq!(operations[0].1, harness.mirrors.path().join("example.com/team/app.git"));

    let seen = harness.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "GET");
    assert_eq!(
        seen[0].uri,
        "/git/notifyCommit?url=ssh://git@example.com/team/app.git&branches=main"
    );
    assert_eq!(seen[0].host.as_deref(), Some(harness.backend.to_string().as_str()));
}

#[tokio::test]
async fn github_form_refreshes_existing_mirror_and_forwards_body_verbatim() {
    let harness = Harness::new(FakeStore::default()).await;
    std::fs::create_dir_all(harness.mirrors.path().join("github.com/acme/widgets.git")).unwrap();
    let body = github_form("https://github.com/acme/widgets");

    let (status, _, _) = harness.send(form_post("/github-webhook/", body.clone())).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let operations: Vec<_> = harness.store.operations().into_iter().map(|(op, _)| op).collect();
    assert_eq!(operations, vec![MirrorOperation::Refresh, MirrorOperation::Compact]);

    let seen = harness.seen();
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].uri, "/github-webhook/");
    assert_eq!(
        seen[0].content_type.as_deref(),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(seen[0].body, Bytes::from(body));
}

#[tokio::test]
async fn equivalent_locators_share_one_mirror() {
    let harness = Harness::new(FakeStore::default()).await;

    harness
        .send(get("/git/notifyCommit?url=ssh://git@github.com/Acme/Widgets.git"))
        .await;
    let json = Request::builder()
        .method("POST")
        .uri("/github-json")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"repository":{"url":"https://github.com/acme/widgets"}}"#))
        .unwrap();
    harness.send(json).await;

    let operations: Vec<_> = harness.store.operations().into_iter().map(|(op, _)| op).collect();
    assert_eq!(
        operations,
        vec![
            MirrorOperation::Create,
            MirrorOperation::Refresh,
            MirrorOperation::Compact
        ]
    );
    assert_eq!(harness.seen().len(), 2);
}

#[tokio::test]
async fn backend_redirect_is_relayed_not_followed() {
    let harness = Harness::new(FakeStore::default()).await;

    let (status, headers, _) = harness
        .send(get("/moved?url=git@example.com:team/app.git"))
        .await;

    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[header::LOCATION], "/elsewhere");
    assert_eq!(harness.seen().len(), 1);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_path_is_404_and_touches_nothing() {
    let harness = Harness::new(FakeStore::default()).await;

    let (status, _, _) = harness.send(get("/github-webhook")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(harness.store.operations().is_empty());
    assert!(harness.seen().is_empty());
}

#[tokio::test]
async fn request_without_locator_is_500_naming_the_hook() {
    let harness = Harness::new(FakeStore::default()).await;

    let (status, _, body) = harness
        .send(form_post("/github-webhook/", "zen=hello".to_string()))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        body.contains("GitHubFormHook could not determine the repository URL"),
        "{body}"
    );
    assert!(harness.store.operations().is_empty());
    assert!(harness.seen().is_empty());
}

#[tokio::test]
async fn malformed_query_is_500_naming_the_hook() {
    let harness = Harness::new(FakeStore::default()).await;

    let (status, _, body) = harness.send(get("/git/notifyCommit?url=%zz")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("JenkinsQueryHook returned error:"), "{body}");
    assert!(harness.seen().is_empty());
}

#[tokio::test]
async fn failed_clone_is_500_and_not_forwarded() {
    let harness = Harness::new(FakeStore {
        fail_create: true,
        ..FakeStore::default()
    })
    .await;

    let (status, _, body) = harness
        .send(get("/git/notifyCommit?url=git@example.com:team/gone.git"))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("git@example.com:team/gone.git"), "{body}");
    assert!(harness.seen().is_empty());
    assert!(!harness.mirrors.path().join("example.com/team/gone.git").exists());
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let harness = Harness::with_limit(FakeStore::default(), 64).await;
    let body = github_form(&format!("https://github.com/acme/{}", "w".repeat(200)));

    let (status, _, body) = harness.send(form_post("/github-webhook/", body)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("GitHubFormHook returned error:"), "{body}");
    assert!(harness.store.operations().is_empty());
}

#[tokio::test]
async fn unreachable_backend_is_502_after_sync() {
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let harness =
        Harness::pointing_at(FakeStore::default(), closed, Log::default(), DEFAULT_MAX_BODY_BYTES);

    let (status, _, _) = harness
        .send(get("/git/notifyCommit?url=git@example.com:team/app.git"))
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(harness.store.operations().len(), 1);
}

// ---------------------------------------------------------------------------
// Cancellation and tracing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn abandoned_request_still_finishes_clone_and_releases_lock() {
    let started = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let harness = Harness::new(FakeStore {
        clone_started: Some(Arc::clone(&started)),
        clone_gate: Some(Arc::clone(&gate)),
        ..FakeStore::default()
    })
    .await;
    let uri = "/git/notifyCommit?url=ssh://git@example.com/team/app.git";

    let app = harness.app.clone();
    let abandoned = tokio::spawn(async move { app.oneshot(get(uri)).await });
    started.notified().await;
    abandoned.abort();
    assert!(abandoned.await.unwrap_err().is_cancelled());

    gate.notify_one();
    let mirror = harness.mirrors.path().join("example.com/team/app.git");
    tokio::time::timeout(Duration::from_secs(5), async {
        while !mirror.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("clone should complete after the caller went away");
    assert!(harness.seen().is_empty());

    let (status, _, _) = tokio::time::timeout(Duration::from_secs(5), harness.send(get(uri)))
        .await
        .expect("repository lock should be released");
    assert_eq!(status, StatusCode::ACCEPTED);
    let operations: Vec<_> = harness.store.operations().into_iter().map(|(op, _)| op).collect();
    assert_eq!(
        operations,
        vec![
            MirrorOperation::Create,
            MirrorOperation::Refresh,
            MirrorOperation::Compact
        ]
    );
}

/// Collects values recorded on `webhook` spans after they were opened.
#[derive(Clone, Default)]
struct RecordedFields(Arc<Mutex<Vec<(String, String)>>>);

impl RecordedFields {
    fn get(&self, name: &str) -> Option<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.clone())
    }
}

struct Collect<'a>(&'a mut Vec<(String, String)>);

impl Visit for Collect<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.push((field.name().to_string(), value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.push((field.name().to_string(), format!("{value:?}")));
    }
}

impl<S> Layer<S> for RecordedFields
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        if ctx.span(id).is_some_and(|span| span.name() == "webhook") {
            let mut fields = self.0.lock().unwrap();
            values.record(&mut Collect(&mut *fields));
        }
    }
}

#[tokio::test]
async fn request_span_carries_locator_and_key() {
    let fields = RecordedFields::default();
    let _subscriber = tracing_subscriber::registry()
        .with(fields.clone())
        .set_default();
    let harness = Harness::new(FakeStore::default()).await;

    harness
        .send(get("/git/notifyCommit?url=ssh://git@example.com/team/app.git"))
        .await;

    assert_eq!(
        fields.get("locator").as_deref(),
        Some("ssh://git@example.com/team/app.git")
    );
    assert_eq!(fields.get("key").as_deref(), Some("example.com/team/app.git"));
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

#[tokio::test]
async fn serve_requires_a_listener() {
    let harness = Harness::new(FakeStore::default()).await;
    let proxy = proxy_for(&harness);

    let config = ServeConfig {
        http: None,
        tls: None,
        max_body_bytes: DEFAULT_MAX_BODY_BYTES,
    };
    let err = serve(config, proxy, async {}).await.unwrap_err();

    assert!(matches!(err, ServeError::NoListeners));
    assert_eq!(err.to_string(), "Quitting as neither HTTP nor TLS were enabled");
}

#[tokio::test]
async fn serve_returns_once_shutdown_fires() {
    let harness = Harness::new(FakeStore::default()).await;
    let proxy = proxy_for(&harness);

    let config = ServeConfig {
        http: Some("127.0.0.1:0".parse().unwrap()),
        tls: None,
        max_body_bytes: DEFAULT_MAX_BODY_BYTES,
    };
    let served = tokio::time::timeout(
        Duration::from_secs(5),
        serve(config, proxy, async {}),
    )
    .await
    .expect("listener should stop after shutdown");

    served.unwrap();
}

fn proxy_for(harness: &Harness) -> Arc<WebhookProxy> {
    let coordinator = Arc::new(MirrorCoordinator::new(
        harness.mirrors.path(),
        Arc::clone(&harness.store) as Arc<dyn MirrorStore>,
    ));
    let forwarder =
        HttpForwarder::new(Url::parse(&format!("http://{}", harness.backend)).unwrap()).unwrap();
    Arc::new(WebhookProxy::new(
        WebhookRouter::default(),
        coordinator,
        Arc::new(forwarder),
    ))
}
