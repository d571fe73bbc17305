//! Configuration loading: TOML on disk, `${VAR}` expansion, and validation
//! of the rules in spec §6.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::QuadsyncError;
use crate::restart::RestartPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub repo: RepoConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub serve: ServeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub subdir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub quadlet_dir: PathBuf,
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub prune: bool,
    #[serde(default)]
    pub restart: RestartPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub ssh_key_file: Option<PathBuf>,
    pub https_token_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub github_webhook_secret_file: Option<PathBuf>,
    #[serde(default)]
    pub allowed_event_types: Vec<String>,
    #[serde(default)]
    pub allowed_refs: Vec<String>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        ServeConfig {
            enabled: false,
            listen_addr: default_listen_addr(),
            github_webhook_secret_file: None,
            allowed_event_types: Vec::new(),
            allowed_refs: Vec::new(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".into()
}

impl Config {
    /// Load config from a TOML file, expand `${VAR}` in path/url fields,
    /// then validate the cross-field rules from spec §6.
    pub fn load(path: &Path) -> Result<Self, QuadsyncError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            QuadsyncError::ConfigInvalid(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut config: Config = toml::from_str(&content)?;
        config.expand_vars()?;
        config.validate()?;
        Ok(config)
    }

    fn expand_vars(&mut self) -> Result<(), QuadsyncError> {
        self.repo.url = expand_env(&self.repo.url, "repo.url")?;
        self.paths.quadlet_dir = PathBuf::from(expand_env(
            &self.paths.quadlet_dir.to_string_lossy(),
            "paths.quadlet_dir",
        )?);
        self.paths.state_dir = PathBuf::from(expand_env(
            &self.paths.state_dir.to_string_lossy(),
            "paths.state_dir",
        )?);
        if let Some(p) = &self.auth.ssh_key_file {
            self.auth.ssh_key_file = Some(PathBuf::from(expand_env(
                &p.to_string_lossy(),
                "auth.ssh_key_file",
            )?));
        }
        if let Some(p) = &self.auth.https_token_file {
            self.auth.https_token_file = Some(PathBuf::from(expand_env(
                &p.to_string_lossy(),
                "auth.https_token_file",
            )?));
        }
        if let Some(p) = &self.serve.github_webhook_secret_file {
            self.serve.github_webhook_secret_file = Some(PathBuf::from(expand_env(
                &p.to_string_lossy(),
                "serve.github_webhook_secret_file",
            )?));
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), QuadsyncError> {
        if !self.paths.quadlet_dir.is_absolute() {
            return Err(QuadsyncError::ConfigInvalid(format!(
                "paths.quadlet_dir must be absolute after expansion, got {}",
                self.paths.quadlet_dir.display()
            )));
        }
        if !self.paths.state_dir.is_absolute() {
            return Err(QuadsyncError::ConfigInvalid(format!(
                "paths.state_dir must be absolute after expansion, got {}",
                self.paths.state_dir.display()
            )));
        }
        if self.auth.ssh_key_file.is_some() && self.auth.https_token_file.is_some() {
            return Err(QuadsyncError::ConfigInvalid(
                "auth.ssh_key_file and auth.https_token_file are mutually exclusive".into(),
            ));
        }
        Ok(())
    }

    pub fn state_dir(&self) -> &Path {
        &self.paths.state_dir
    }

    pub fn repo_checkout_dir(&self) -> PathBuf {
        self.paths.state_dir.join("repo")
    }

    pub fn source_root(&self) -> PathBuf {
        if self.repo.subdir.is_empty() {
            self.repo_checkout_dir()
        } else {
            self.repo_checkout_dir().join(&self.repo.subdir)
        }
    }
}

/// Expand `${VAR}` references in `value` against the process environment.
/// An unset variable is a `ConfigInvalid` error naming both the variable and
/// the offending field, per spec §6.
fn expand_env(value: &str, field: &str) -> Result<String, QuadsyncError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.char_indices().peekable();
    let env: HashMap<String, String> = std::env::vars().collect();

    while let Some((_, c)) = chars.next() {
        if c == '$' && chars.peek().map(|(_, c)| *c) == Some('{') {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            for (_, c) in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            if !closed {
                return Err(QuadsyncError::ConfigInvalid(format!(
                    "unterminated ${{...}} expansion in {field}"
                )));
            }
            match env.get(&name) {
                Some(val) => out.push_str(val),
                None => {
                    return Err(QuadsyncError::ConfigInvalid(format!(
                        "environment variable {name} is not set, required by {field}"
                    )))
                }
            }
        } else {
            out.push(c);
        }
    }

    Ok(out)
}
