//! `quadsyncd serve` — initial pass, then serve the webhook endpoint until
//! a shutdown signal arrives.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::QuadsyncError;
use crate::server::WebhookServer;
use crate::servicemgr::SystemdUserManager;
use crate::vcs::GitCli;

pub async fn run(config: Config) -> Result<(), QuadsyncError> {
    if !config.serve.enabled {
        return Err(QuadsyncError::ConfigInvalid("serve.enabled is false".into()));
    }

    let secret_path = config.serve.github_webhook_secret_file.clone().ok_or_else(|| {
        QuadsyncError::ConfigInvalid("serve.github_webhook_secret_file is required".into())
    })?;
    let secret = WebhookServer::load_secret(&secret_path)?;

    let addr = config
        .serve
        .listen_addr
        .parse()
        .map_err(|e| QuadsyncError::ConfigInvalid(format!("serve.listen_addr: {e}")))?;

    let vcs: Arc<dyn crate::vcs::VersionControlClient + Send + Sync> = Arc::new(GitCli::new(config.auth.clone()));
    let service_manager: Arc<dyn crate::servicemgr::ServiceManagerClient + Send + Sync> =
        Arc::new(SystemdUserManager::new());

    let cancel = CancellationToken::new();
    let server = Arc::new(WebhookServer::new(
        Arc::new(config),
        vcs,
        service_manager,
        secret,
        cancel.clone(),
    ));

    let shutdown_token = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown_token.cancel();
    });

    server.serve(addr).await
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
