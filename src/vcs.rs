//! Version-control collaborator: the trait contract from spec §6, plus the
//! concrete `GitCli` implementation shelling out to the system `git`.

use std::path::Path;
use std::process::Command;

use crate::config::AuthConfig;
use crate::error::QuadsyncError;

/// What the engine needs from version control, independent of whether the
/// underlying implementation shells out or links a native library.
pub trait VersionControlClient {
    /// Bring `dest_dir` to a working tree at `git_ref`, cloning from `url`
    /// first if `dest_dir` isn't already a checkout. Returns the resolved
    /// revision identifier.
    fn ensure_checkout(&self, url: &str, git_ref: &str, dest_dir: &Path) -> Result<String, QuadsyncError>;
}

/// Shells out to the system `git` binary.
pub struct GitCli {
    auth: AuthConfig,
}

impl GitCli {
    pub fn new(auth: AuthConfig) -> Self {
        GitCli { auth }
    }

    fn git(&self, dest_dir: &Path) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(dest_dir);
        if let Some(key_file) = &self.auth.ssh_key_file {
            cmd.env(
                "GIT_SSH_COMMAND",
                format!("ssh -i {} -o IdentitiesOnly=yes", key_file.display()),
            );
        }
        cmd
    }

    fn run(&self, dest_dir: &Path, args: &[&str]) -> Result<String, QuadsyncError> {
        let output = self
            .git(dest_dir)
            .args(args)
            .output()
            .map_err(|e| QuadsyncError::SourceUnavailable(format!("git {}: {e}", args.join(" "))))?;

        if !output.status.success() {
            return Err(QuadsyncError::SourceUnavailable(format!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn authenticated_url(&self, url: &str) -> String {
        match &self.auth.https_token_file {
            Some(token_file) => match std::fs::read_to_string(token_file) {
                Ok(token) => embed_token(url, token.trim()),
                Err(_) => url.to_string(),
            },
            None => url.to_string(),
        }
    }
}

fn embed_token(url: &str, token: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("https://{token}@{rest}")
    } else {
        url.to_string()
    }
}

impl VersionControlClient for GitCli {
    fn ensure_checkout(&self, url: &str, git_ref: &str, dest_dir: &Path) -> Result<String, QuadsyncError> {
        let url = self.authenticated_url(url);

        if !dest_dir.join(".git").is_dir() {
            std::fs::create_dir_all(dest_dir)
                .map_err(|e| QuadsyncError::SourceUnavailable(format!("creating {}: {e}", dest_dir.display())))?;
            self.run(dest_dir, &["clone", "--origin", "origin", &url, "."])?;
        } else {
            self.run(dest_dir, &["remote", "set-url", "origin", &url])?;
            self.run(dest_dir, &["fetch", "origin", git_ref])?;
        }

        let remote_ref = format!("origin/{git_ref}");
        let resolved = if self.run(dest_dir, &["rev-parse", "--verify", &remote_ref]).is_ok() {
            remote_ref
        } else {
            git_ref.to_string()
        };

        self.run(dest_dir, &["checkout", "--force", &resolved])?;
        self.run(dest_dir, &["rev-parse", "HEAD"])
    }
}
