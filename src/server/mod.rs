//! C8: Webhook Server — receives signed GitHub-style webhook events, filters
//! and debounces them, and drives the reconciliation engine under a
//! single-flight gate so passes never overlap.

mod gate;
mod signature;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::engine::Engine;
use crate::error::QuadsyncError;
use crate::servicemgr::ServiceManagerClient;
use crate::vcs::VersionControlClient;

pub use gate::SingleFlightGate;
pub use signature::verify_signature;

const MAX_BODY_BYTES: usize = 1024 * 1024;
const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const EVENT_HEADER: &str = "x-github-event";
const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

pub struct WebhookServer {
    config: Arc<Config>,
    vcs: Arc<dyn VersionControlClient + Send + Sync>,
    service_manager: Arc<dyn ServiceManagerClient + Send + Sync>,
    secret: Vec<u8>,
    debounce: Duration,
    gate: Arc<Mutex<SingleFlightGate>>,
    debounce_timer: Arc<Mutex<Option<JoinHandle<()>>>>,
    /// The driver's root cancellation context (spec §5). Threaded into
    /// every pass so an in-flight reconciliation observes shutdown at its
    /// next collaborator call, and checked after each pass so a queued
    /// re-run is discarded rather than started once shutdown begins.
    shutdown: CancellationToken,
}

impl WebhookServer {
    pub fn new(
        config: Arc<Config>,
        vcs: Arc<dyn VersionControlClient + Send + Sync>,
        service_manager: Arc<dyn ServiceManagerClient + Send + Sync>,
        secret: Vec<u8>,
        shutdown: CancellationToken,
    ) -> Self {
        WebhookServer {
            config,
            vcs,
            service_manager,
            secret,
            debounce: DEFAULT_DEBOUNCE,
            gate: Arc::new(Mutex::new(SingleFlightGate::default())),
            debounce_timer: Arc::new(Mutex::new(None)),
            shutdown,
        }
    }

    /// Load the webhook secret from the configured file, trimming trailing
    /// whitespace, per spec §4.8.
    pub fn load_secret(path: &Path) -> Result<Vec<u8>, QuadsyncError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            QuadsyncError::ConfigInvalid(format!("reading webhook secret {}: {e}", path.display()))
        })?;
        Ok(content.trim_end().as_bytes().to_vec())
    }

    /// Perform the startup pass, then bind and serve until the server's
    /// shutdown token is cancelled.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<(), QuadsyncError> {
        info!(event = "startup_pass_begin", "running initial reconciliation pass before accepting requests");
        self.clone().run_pass_blocking().await;

        let app = Router::new()
            .route("/", post(webhook_handler))
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| QuadsyncError::Other(anyhow::anyhow!("binding {addr}: {e}")))?;

        info!(event = "listening", addr = %addr, "webhook server ready");

        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| QuadsyncError::Other(anyhow::anyhow!("server error: {e}")))
    }

    /// Reset the debounce timer: any previously-scheduled fire is cancelled
    /// and a new one is scheduled `debounce` from now (latest-wins).
    fn schedule_trigger(self: &Arc<Self>) {
        let mut timer = self.debounce_timer.lock().unwrap();
        if let Some(handle) = timer.take() {
            handle.abort();
        }

        let this = Arc::clone(self);
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            this.fire_single_flight().await;
        }));
    }

    /// Run the single-flight state machine from spec §4.8: at most one pass
    /// runs at a time; any trigger that arrives mid-pass is coalesced into
    /// exactly one queued re-run.
    ///
    /// The gate is acquired exactly once with `request()`; every
    /// subsequent iteration loops on `finish()` alone. Calling `request()`
    /// again inside the loop would re-observe `running == true` (set by
    /// this very call) and wrongly coalesce the already-earned re-run
    /// instead of performing it, wedging `running` stuck forever.
    async fn fire_single_flight(self: Arc<Self>) {
        if !self.gate.lock().unwrap().request() {
            return;
        }

        loop {
            self.clone().run_pass_blocking().await;

            // Shutdown discards any queued re-run rather than starting it.
            if self.shutdown.is_cancelled() {
                let mut gate = self.gate.lock().unwrap();
                gate.pending = false;
                gate.running = false;
                return;
            }

            let run_again = self.gate.lock().unwrap().finish();
            if !run_again {
                return;
            }
        }
    }

    async fn run_pass_blocking(self: Arc<Self>) {
        let config = Arc::clone(&self.config);
        let vcs = Arc::clone(&self.vcs);
        let service_manager = Arc::clone(&self.service_manager);
        let cancel = self.shutdown.clone();

        let result = tokio::task::spawn_blocking(move || {
            let engine = Engine::new(&config, vcs.as_ref(), service_manager.as_ref());
            engine.run_once(false, &cancel)
        })
        .await;

        match result {
            Ok(Ok(outcome)) => info!(
                event = "pass_complete",
                revision = %outcome.revision,
                add = outcome.added,
                update = outcome.updated,
                delete = outcome.deleted,
                had_warnings = outcome.had_warnings,
                "reconciliation pass finished"
            ),
            Ok(Err(e)) => error!(event = "pass_failed", error = %e, "reconciliation pass failed"),
            Err(e) => error!(event = "pass_panicked", error = %e, "reconciliation pass task panicked"),
        }
    }
}

async fn webhook_handler(
    State(server): State<Arc<WebhookServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("application/json") {
        return (StatusCode::BAD_REQUEST, "expected application/json").into_response();
    }

    let signature_header = match headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(h) => h,
        None => return (StatusCode::FORBIDDEN, "missing signature").into_response(),
    };
    if !verify_signature(&server.secret, &body, signature_header) {
        return (StatusCode::FORBIDDEN, "signature mismatch").into_response();
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return (StatusCode::BAD_REQUEST, "malformed JSON body").into_response(),
    };

    let event_type = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let allowed_events = &server.config.serve.allowed_event_types;
    if !allowed_events.is_empty() && !allowed_events.iter().any(|e| e == &event_type) {
        info!(event = "webhook_filtered", reason = "event_type", event_type = %event_type);
        return (StatusCode::OK, "event type not in allow-list, ignored").into_response();
    }

    let git_ref = payload.get("ref").and_then(|v| v.as_str()).unwrap_or("");
    let allowed_refs = &server.config.serve.allowed_refs;
    if !allowed_refs.is_empty() && !allowed_refs.iter().any(|r| r == git_ref) {
        info!(event = "webhook_filtered", reason = "ref", git_ref = %git_ref);
        return (StatusCode::OK, "ref not in allow-list, ignored").into_response();
    }

    server.schedule_trigger();

    (StatusCode::OK, "accepted, reconciliation scheduled").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, PathsConfig, RepoConfig, ServeConfig, SyncConfig};
    use crate::error::QuadsyncError;
    use crate::restart::RestartPolicy;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct NoopVcs;
    impl VersionControlClient for NoopVcs {
        fn ensure_checkout(&self, _url: &str, _git_ref: &str, dest_dir: &Path) -> Result<String, QuadsyncError> {
            std::fs::create_dir_all(dest_dir).unwrap();
            Ok("rev".into())
        }
    }

    struct NoopServiceManager;
    impl ServiceManagerClient for NoopServiceManager {
        fn is_available(&self) -> Result<bool, QuadsyncError> {
            Ok(true)
        }
        fn daemon_reload(&self) -> Result<(), QuadsyncError> {
            Ok(())
        }
        fn try_restart(&self, _unit_names: &[String]) -> Result<(), QuadsyncError> {
            Ok(())
        }
        fn validate_quadlets(&self, _destination_dir: &Path) -> Result<(), QuadsyncError> {
            Ok(())
        }
    }

    fn test_server(secret: &[u8]) -> Arc<WebhookServer> {
        let state_dir = tempfile::tempdir().unwrap();
        let quadlet_dir = tempfile::tempdir().unwrap();
        // Leak the tempdirs for the lifetime of the test process; fine for
        // a short-lived test binary.
        let state_dir = Box::leak(Box::new(state_dir)).path().to_path_buf();
        let quadlet_dir = Box::leak(Box::new(quadlet_dir)).path().to_path_buf();

        let config = Arc::new(Config {
            repo: RepoConfig {
                url: "https://example.com/repo.git".into(),
                git_ref: "main".into(),
                subdir: String::new(),
            },
            paths: PathsConfig {
                quadlet_dir,
                state_dir,
            },
            sync: SyncConfig { prune: false, restart: RestartPolicy::None },
            auth: AuthConfig::default(),
            serve: ServeConfig::default(),
        });

        Arc::new(WebhookServer::new(
            config,
            Arc::new(NoopVcs),
            Arc::new(NoopServiceManager),
            secret.to_vec(),
            CancellationToken::new(),
        ))
    }

    fn sign(secret: &[u8], body: &[u8]) -> String {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[tokio::test]
    async fn wrong_method_is_405() {
        let server = test_server(b"secret");
        let app = Router::new().route("/", post(webhook_handler)).with_state(server);

        let response = app
            .oneshot(Request::builder().method("GET").uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn non_json_content_type_is_400() {
        let server = test_server(b"secret");
        let app = Router::new().route("/", post(webhook_handler)).with_state(server);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "text/plain")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_signature_is_403() {
        let server = test_server(b"secret");
        let app = Router::new().route("/", post(webhook_handler)).with_state(server);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn wrong_signature_is_403() {
        let server = test_server(b"secret");
        let app = Router::new().route("/", post(webhook_handler)).with_state(server);

        let body = br#"{"ref":"refs/heads/main"}"#;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .header("x-hub-signature-256", sign(b"wrong-secret", body))
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn malformed_json_is_400_even_with_valid_signature() {
        let secret = b"secret";
        let server = test_server(secret);
        let app = Router::new().route("/", post(webhook_handler)).with_state(server);

        let body = b"not json";
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .header("x-hub-signature-256", sign(secret, body))
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn valid_signed_event_is_accepted() {
        let secret = b"secret";
        let server = test_server(secret);
        let app = Router::new().route("/", post(webhook_handler)).with_state(server.clone());

        let body = br#"{"ref":"refs/heads/main"}"#;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .header("x-hub-signature-256", sign(secret, body))
                    .header("x-github-event", "push")
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&bytes).contains("accepted"));
    }

    #[tokio::test]
    async fn disallowed_event_type_is_200_without_scheduling() {
        let secret = b"secret";
        let server = test_server(secret);
        let mut config = (*server.config).clone();
        config.serve.allowed_event_types = vec!["push".to_string()];
        let server = Arc::new(WebhookServer::new(
            Arc::new(config),
            Arc::new(NoopVcs),
            Arc::new(NoopServiceManager),
            secret.to_vec(),
            CancellationToken::new(),
        ));
        let app = Router::new().route("/", post(webhook_handler)).with_state(server);

        let body = br#"{"ref":"refs/heads/main"}"#;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .header("x-hub-signature-256", sign(secret, body))
                    .header("x-github-event", "issues")
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&bytes).contains("ignored"));
    }

    /// A `VersionControlClient` slow enough that a test can reliably land a
    /// second trigger while the first pass is still in its checkout step,
    /// counting how many passes actually reached the collaborator call.
    struct SlowCountingVcs {
        delay: Duration,
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl VersionControlClient for SlowCountingVcs {
        fn ensure_checkout(&self, _url: &str, _git_ref: &str, dest_dir: &Path) -> Result<String, QuadsyncError> {
            std::thread::sleep(self.delay);
            std::fs::create_dir_all(dest_dir).unwrap();
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            Ok(format!("rev{n}"))
        }
    }

    fn test_server_with_vcs(
        secret: &[u8],
        vcs: Arc<dyn VersionControlClient + Send + Sync>,
        shutdown: CancellationToken,
    ) -> Arc<WebhookServer> {
        let state_dir = tempfile::tempdir().unwrap();
        let quadlet_dir = tempfile::tempdir().unwrap();
        let state_dir = Box::leak(Box::new(state_dir)).path().to_path_buf();
        let quadlet_dir = Box::leak(Box::new(quadlet_dir)).path().to_path_buf();

        let config = Arc::new(Config {
            repo: RepoConfig {
                url: "https://example.com/repo.git".into(),
                git_ref: "main".into(),
                subdir: String::new(),
            },
            paths: PathsConfig {
                quadlet_dir,
                state_dir,
            },
            sync: SyncConfig { prune: false, restart: RestartPolicy::None },
            auth: AuthConfig::default(),
            serve: ServeConfig::default(),
        });

        Arc::new(WebhookServer::new(
            config,
            vcs,
            Arc::new(NoopServiceManager),
            secret.to_vec(),
            shutdown,
        ))
    }

    // Drives `fire_single_flight`'s actual call sequence (one `request()`,
    // then looping on `finish()`), unlike the gate's own unit tests which
    // call `finish()` back-to-back without going through the driver loop.
    // Regression test for the bug where re-calling `request()` inside the
    // loop coalesced the already-earned re-run instead of performing it.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn burst_during_in_flight_pass_yields_exactly_one_requeued_pass() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let vcs = Arc::new(SlowCountingVcs {
            delay: Duration::from_millis(150),
            calls: calls.clone(),
        });
        let server = test_server_with_vcs(b"secret", vcs, CancellationToken::new());

        let first = tokio::spawn({
            let server = server.clone();
            async move { server.fire_single_flight().await }
        });

        // Lands inside the first pass's artificial delay: a second trigger
        // arriving mid-pass, exactly like a webhook's debounce firing a
        // second `fire_single_flight` call while the first is still running.
        tokio::time::sleep(Duration::from_millis(30)).await;
        server.clone().fire_single_flight().await;

        first.await.unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        let gate = server.gate.lock().unwrap();
        assert!(!gate.running);
        assert!(!gate.pending);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_during_pass_discards_the_queued_rerun() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let vcs = Arc::new(SlowCountingVcs {
            delay: Duration::from_millis(150),
            calls: calls.clone(),
        });
        let shutdown = CancellationToken::new();
        let server = test_server_with_vcs(b"secret", vcs, shutdown.clone());

        let first = tokio::spawn({
            let server = server.clone();
            async move { server.fire_single_flight().await }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        server.clone().fire_single_flight().await; // coalesced into `pending`
        shutdown.cancel();

        first.await.unwrap();

        // Only the in-flight pass ran; the queued re-run was discarded and
        // the gate did not wedge stuck `running`.
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        let gate = server.gate.lock().unwrap();
        assert!(!gate.running);
        assert!(!gate.pending);
    }
}
