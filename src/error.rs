use std::path::PathBuf;
use thiserror::Error;

/// The full error taxonomy for a reconciliation pass and the webhook server.
///
/// Fatal variants abort the current pass without further mutation; restart
/// failure is reported but never turned into a fatal variant — the engine
/// downgrades it to a warning before returning.
#[derive(Debug, Error)]
pub enum QuadsyncError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("service manager unavailable: {0}")]
    ServiceManagerUnavailable(String),

    #[error("discovery failed under {path}: {source}")]
    DiscoveryFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to hash {path}: {source}")]
    HashFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("planned destination {0} escapes the configured destination directory")]
    PathEscape(PathBuf),

    #[error("failed to apply {op} for {dest}: {source}")]
    ApplyFailure {
        op: &'static str,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("generator validation failed: {0}")]
    ValidationFailure(String),

    #[error("manifest is corrupt: {0}")]
    StateCorrupt(String),

    #[error("failed to write state: {0}")]
    StateWriteFailure(String),

    #[error("daemon-reload failed: {0}")]
    ReloadFailure(String),

    #[error("try-restart failed: {0}")]
    RestartFailure(String),

    #[error("webhook signature mismatch")]
    SignatureMismatch,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("pass cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, QuadsyncError>;

impl QuadsyncError {
    /// True for errors the spec marks non-fatal at the call site (restart).
    /// Present so callers can assert intent at the point of use rather than
    /// matching on the variant inline.
    pub fn is_fatal_for_pass(&self) -> bool {
        !matches!(self, QuadsyncError::RestartFailure(_))
    }
}
