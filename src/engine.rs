//! C7: Reconciliation Engine — composes C1–C6 plus the version-control and
//! service-manager collaborators into one end-to-end pass.

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::apply::apply_from_source_root;
use crate::config::Config;
use crate::discovery::discover;
use crate::error::QuadsyncError;
use crate::model::Manifest;
use crate::plan::{build_plan, next_manifest};
use crate::restart::restart_set;
use crate::servicemgr::ServiceManagerClient;
use crate::state;
use crate::vcs::VersionControlClient;

/// What a completed pass produced, for the driver to report.
#[derive(Debug, Clone, Default)]
pub struct PassOutcome {
    pub revision: String,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub restarted: BTreeSet<String>,
    /// True if a non-fatal failure (currently: restart) occurred but the
    /// pass otherwise completed successfully.
    pub had_warnings: bool,
    pub dry_run: bool,
}

pub struct Engine<'a> {
    config: &'a Config,
    vcs: &'a dyn VersionControlClient,
    service_manager: &'a dyn ServiceManagerClient,
}

impl<'a> Engine<'a> {
    pub fn new(
        config: &'a Config,
        vcs: &'a dyn VersionControlClient,
        service_manager: &'a dyn ServiceManagerClient,
    ) -> Self {
        Engine {
            config,
            vcs,
            service_manager,
        }
    }

    /// Run one reconciliation pass per spec §4.7. `dry_run` skips steps
    /// 6–11 (apply, validate, commit, reload, restart): the engine logs
    /// the planned operations and returns.
    pub fn run_once(&self, dry_run: bool, cancel: &CancellationToken) -> Result<PassOutcome, QuadsyncError> {
        // 1. Ensure the state directory exists.
        state::ensure_state_dir(self.config.state_dir())?;
        check_cancelled(cancel)?;

        // 2. Bring the checkout to the configured revision.
        let checkout_dir = self.config.repo_checkout_dir();
        let revision = self.vcs.ensure_checkout(
            &self.config.repo.url,
            &self.config.repo.git_ref,
            &checkout_dir,
        )?;
        info!(event = "checkout_ready", revision = %revision, "repository checked out");
        check_cancelled(cancel)?;

        // 3. Load previous manifest (corrupt → empty, already logged by state::load).
        let previous = state::load(self.config.state_dir());

        // 4. Discover, hash, plan.
        let source_root = self.config.source_root();
        let destination_dir = &self.config.paths.quadlet_dir;
        let discovered = discover(&source_root)?;
        let plan = build_plan(&source_root, destination_dir, &discovered, &previous, self.config.sync.prune)?;
        check_cancelled(cancel)?;

        let (added, updated, deleted) = plan.counts();
        info!(event = "plan_built", add = added, update = updated, delete = deleted, "plan computed");

        // 5. Dry-run: log and stop.
        if dry_run {
            for op in &plan.add {
                info!(
                    event = "planned_op",
                    op = "add",
                    source = op.source_path.as_deref().unwrap_or(""),
                    dest = %op.dest_path.display(),
                );
            }
            for op in &plan.update {
                info!(
                    event = "planned_op",
                    op = "update",
                    source = op.source_path.as_deref().unwrap_or(""),
                    dest = %op.dest_path.display(),
                );
            }
            for op in &plan.delete {
                info!(event = "planned_op", op = "delete", dest = %op.dest_path.display());
            }
            return Ok(PassOutcome {
                revision,
                added,
                updated,
                deleted,
                restarted: BTreeSet::new(),
                had_warnings: false,
                dry_run: true,
            });
        }

        // 6. Service-manager availability.
        if !self.service_manager.is_available()? {
            return Err(QuadsyncError::ServiceManagerUnavailable(
                "service manager is not available".into(),
            ));
        }
        check_cancelled(cancel)?;

        // 7. Apply.
        apply_from_source_root(&source_root, &plan)?;
        check_cancelled(cancel)?;

        // 8. Validate.
        self.service_manager.validate_quadlets(destination_dir)?;
        check_cancelled(cancel)?;

        // 9. Build and save the new manifest.
        let manifest = next_manifest(&previous, &plan, &revision);
        state::save(self.config.state_dir(), &manifest)?;
        check_cancelled(cancel)?;

        // 10. Reload.
        self.service_manager.daemon_reload()?;

        // 11. Restart (non-fatal).
        let units = restart_set(self.config.sync.restart, &plan, &manifest);
        let units_vec: Vec<String> = units.iter().cloned().collect();
        let had_warnings = match self.service_manager.try_restart(&units_vec) {
            Ok(()) => false,
            Err(e) => {
                warn!(event = "restart_failed", error = %e, "try-restart failed, continuing");
                true
            }
        };

        Ok(PassOutcome {
            revision,
            added,
            updated,
            deleted,
            restarted: units,
            had_warnings,
            dry_run: false,
        })
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), QuadsyncError> {
    if cancel.is_cancelled() {
        Err(QuadsyncError::Cancelled)
    } else {
        Ok(())
    }
}
