//! Service-manager collaborator: the trait contract from spec §6, plus the
//! concrete `SystemdUserManager` implementation shelling out to
//! `systemctl --user` and the podman quadlet generator.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::warn;

use crate::error::QuadsyncError;

/// What the engine needs from the host's user-scope service manager.
pub trait ServiceManagerClient {
    /// Cheap availability probe. A degraded-but-running manager still
    /// counts as available per spec §6.
    fn is_available(&self) -> Result<bool, QuadsyncError>;
    fn daemon_reload(&self) -> Result<(), QuadsyncError>;
    /// Restart only units currently active; missing/inactive targets are
    /// not errors. An empty `unit_names` is a no-op — no process spawned.
    fn try_restart(&self, unit_names: &[String]) -> Result<(), QuadsyncError>;
    /// Run the host generator in dry-run over `destination_dir`. If the
    /// generator binary is absent, log a skip warning and return success.
    fn validate_quadlets(&self, destination_dir: &Path) -> Result<(), QuadsyncError>;
}

const DEFAULT_GENERATOR_PATH: &str = "/usr/lib/systemd/system-generators/podman-system-generator";

pub struct SystemdUserManager {
    generator_path: PathBuf,
}

impl SystemdUserManager {
    pub fn new() -> Self {
        SystemdUserManager {
            generator_path: PathBuf::from(DEFAULT_GENERATOR_PATH),
        }
    }

    pub fn with_generator_path(generator_path: PathBuf) -> Self {
        SystemdUserManager { generator_path }
    }
}

impl Default for SystemdUserManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManagerClient for SystemdUserManager {
    fn is_available(&self) -> Result<bool, QuadsyncError> {
        let output = match Command::new("systemctl")
            .args(["--user", "is-system-running"])
            .output()
        {
            Ok(output) => output,
            Err(_) => return Ok(false),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.trim() == "running" || stdout.trim() == "degraded")
    }

    fn daemon_reload(&self) -> Result<(), QuadsyncError> {
        let output = Command::new("systemctl")
            .args(["--user", "daemon-reload"])
            .output()
            .map_err(|e| QuadsyncError::ReloadFailure(e.to_string()))?;

        if !output.status.success() {
            return Err(QuadsyncError::ReloadFailure(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    fn try_restart(&self, unit_names: &[String]) -> Result<(), QuadsyncError> {
        if unit_names.is_empty() {
            return Ok(());
        }

        let output = Command::new("systemctl")
            .args(["--user", "try-restart", "--no-block"])
            .args(unit_names)
            .output()
            .map_err(|e| QuadsyncError::RestartFailure(e.to_string()))?;

        if !output.status.success() {
            return Err(QuadsyncError::RestartFailure(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    fn validate_quadlets(&self, destination_dir: &Path) -> Result<(), QuadsyncError> {
        if !self.generator_path.is_file() {
            warn!(
                event = "generator_missing",
                path = %self.generator_path.display(),
                "podman quadlet generator not found on host, skipping validation"
            );
            return Ok(());
        }

        let output = Command::new(&self.generator_path)
            .arg("--dryrun")
            .arg(destination_dir)
            .output()
            .map_err(|e| QuadsyncError::ValidationFailure(e.to_string()))?;

        if !output.status.success() {
            return Err(QuadsyncError::ValidationFailure(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}
