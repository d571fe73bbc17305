//! Shared data types: the quadlet extension table, unit-name derivation,
//! the managed-file record, the persisted manifest, and the plan.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The closed set of quadlet extensions and their unit-name infix, per the
/// table in spec §3. Order matches the table for readability; lookup is by
/// exact lowercase extension match.
const QUADLET_EXTENSIONS: &[(&str, &str)] = &[
    ("container", ""),
    ("kube", ""),
    ("pod", ""),
    ("volume", "-volume"),
    ("network", "-network"),
    ("image", "-image"),
    ("build", "-build"),
];

/// Whether a discovered file is a quadlet unit declaration or a companion
/// file referenced by one (env files, config, certs, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Quadlet,
    Companion,
}

/// Classify a file by its exact lowercase extension. Anything outside the
/// closed quadlet set is a companion — this function is total.
pub fn classify(path: &Path) -> FileKind {
    match lowercase_extension(path) {
        Some(ext) if QUADLET_EXTENSIONS.iter().any(|(e, _)| *e == ext) => FileKind::Quadlet,
        _ => FileKind::Companion,
    }
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

/// Derive the systemd service unit name for a quadlet file, per the table in
/// spec §3. Returns `None` for companion files (no unit is ever derived for
/// them — callers that only want quadlet destinations should check
/// `classify` first, but this stays safe to call on anything).
pub fn unit_name(path: &Path) -> Option<String> {
    let ext = lowercase_extension(path)?;
    let (_, infix) = QUADLET_EXTENSIONS.iter().find(|(e, _)| *e == ext)?;
    let base = path.file_stem()?.to_string_lossy();
    Some(format!("{base}{infix}.service"))
}

/// A single file managed by this agent: its path relative to the configured
/// repository subtree, and its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedFile {
    pub source_path: String,
    pub hash: String,
}

/// The on-disk schema version of `state.json`. Bumped only on an
/// incompatible format change; readers treat an unknown/missing version as
/// "assume current" rather than failing, since this is an additive,
/// non-breaking marker (see SPEC_FULL.md §3).
pub const MANIFEST_VERSION: u32 = 1;

/// The durable manifest: every destination path this agent has written,
/// keyed by its absolute path, plus the last-applied source revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_manifest_version")]
    pub version: u32,
    pub revision: String,
    pub managed_files: BTreeMap<PathBuf, ManagedFile>,
}

fn default_manifest_version() -> u32 {
    MANIFEST_VERSION
}

impl Manifest {
    /// A fresh manifest with no managed files and an empty revision, used
    /// both as the zero value and as the corrupt-manifest recovery target.
    pub fn empty() -> Self {
        Manifest {
            version: MANIFEST_VERSION,
            revision: String::new(),
            managed_files: BTreeMap::new(),
        }
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::empty()
    }
}

/// A single file-level operation in a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOp {
    /// Relative to the repository subtree. `None` for deletes.
    pub source_path: Option<String>,
    pub dest_path: PathBuf,
    /// Content hash of the new/existing content. For deletes this is the
    /// hash recorded in the manifest entry being removed (useful for the
    /// restart planner, which may be invoked before the manifest mutates).
    pub hash: String,
}

/// Three disjoint operation sequences produced by the planner.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub add: Vec<FileOp>,
    pub update: Vec<FileOp>,
    pub delete: Vec<FileOp>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (self.add.len(), self.update.len(), self.delete.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_quadlet_extensions() {
        for ext in [
            "container", "volume", "network", "kube", "image", "build", "pod",
        ] {
            let path = PathBuf::from(format!("web.{ext}"));
            assert_eq!(classify(&path), FileKind::Quadlet, "{ext} should be a quadlet");
        }
    }

    #[test]
    fn classifies_companion_extensions() {
        for name in ["web.env", "README.md", "noext", "secret.pem"] {
            assert_eq!(classify(Path::new(name)), FileKind::Companion);
        }
    }

    #[test]
    fn classification_is_case_sensitive_on_extension_lowercasing() {
        // Extensions are matched case-insensitively (lowercased first).
        assert_eq!(classify(Path::new("web.CONTAINER")), FileKind::Quadlet);
    }

    #[test]
    fn unit_name_table_matches_spec() {
        assert_eq!(unit_name(Path::new("web.container")).as_deref(), Some("web.service"));
        assert_eq!(unit_name(Path::new("app.kube")).as_deref(), Some("app.service"));
        assert_eq!(unit_name(Path::new("group.pod")).as_deref(), Some("group.service"));
        assert_eq!(unit_name(Path::new("db.volume")).as_deref(), Some("db-volume.service"));
        assert_eq!(unit_name(Path::new("lan.network")).as_deref(), Some("lan-network.service"));
        assert_eq!(unit_name(Path::new("base.image")).as_deref(), Some("base-image.service"));
        assert_eq!(unit_name(Path::new("ci.build")).as_deref(), Some("ci-build.service"));
    }

    #[test]
    fn unit_name_is_none_for_companions() {
        assert_eq!(unit_name(Path::new("web.env")), None);
    }

    #[test]
    fn manifest_round_trips_through_json() {
        let mut m = Manifest::empty();
        m.revision = "abc123".into();
        m.managed_files.insert(
            PathBuf::from("/srv/quadlets/web.container"),
            ManagedFile {
                source_path: "web.container".into(),
                hash: "0".repeat(64),
            },
        );
        let json = serde_json::to_string_pretty(&m).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn manifest_missing_version_defaults_to_current() {
        let json = r#"{"revision":"x","managed_files":{}}"#;
        let m: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(m.version, MANIFEST_VERSION);
    }

    #[test]
    fn plan_is_empty_when_all_lists_empty() {
        assert!(Plan::default().is_empty());
    }
}
