//! `quadsyncd sync` — one reconciliation pass, then exit.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::QuadsyncError;
use crate::servicemgr::SystemdUserManager;
use crate::vcs::GitCli;

pub fn run(config: &Config, dry_run: bool) -> Result<(), QuadsyncError> {
    let vcs = GitCli::new(config.auth.clone());
    let service_manager = SystemdUserManager::new();
    let engine = Engine::new(config, &vcs, &service_manager);

    let cancel = Arc::new(CancellationToken::new());
    register_signal_handlers(Arc::clone(&cancel))?;

    let outcome = engine.run_once(dry_run, &cancel)?;

    if outcome.dry_run {
        tracing::info!(
            event = "dry_run_complete",
            add = outcome.added,
            update = outcome.updated,
            delete = outcome.deleted,
            "dry-run finished, no changes applied"
        );
    } else {
        tracing::info!(
            event = "sync_complete",
            revision = %outcome.revision,
            add = outcome.added,
            update = outcome.updated,
            delete = outcome.deleted,
            restarted = outcome.restarted.len(),
            had_warnings = outcome.had_warnings,
            "reconciliation pass finished"
        );
    }

    Ok(())
}

fn register_signal_handlers(cancel: Arc<CancellationToken>) -> Result<(), QuadsyncError> {
    let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    for sig in &[signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(*sig, Arc::clone(&flag))
            .map_err(|e| QuadsyncError::Other(anyhow::anyhow!("registering signal handler: {e}")))?;
    }
    std::thread::spawn(move || loop {
        if flag.load(std::sync::atomic::Ordering::Relaxed) {
            cancel.cancel();
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(200));
    });
    Ok(())
}
