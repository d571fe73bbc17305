//! C3: State Store — load/save the durable manifest at
//! `<state_dir>/state.json`, using atomic temp-file-then-rename writes.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::QuadsyncError;
use crate::model::Manifest;

/// The manifest's fixed filename under the configured state directory.
pub const STATE_FILE_NAME: &str = "state.json";

pub fn state_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATE_FILE_NAME)
}

/// Load the manifest from `state_dir`. A missing file is an empty manifest,
/// not an error (first-ever sync). A malformed file is also recovered as an
/// empty manifest — the corruption is logged as a warning and never
/// propagated, per spec §3's lifecycle rule.
pub fn load(state_dir: &Path) -> Manifest {
    let path = state_file_path(state_dir);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Manifest::empty(),
        Err(e) => {
            warn!(event = "state_corrupt", error = %e, path = %path.display(), "failed to read state file, starting fresh");
            return Manifest::empty();
        }
    };

    match serde_json::from_str::<Manifest>(&content) {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(event = "state_corrupt", error = %e, path = %path.display(), "state file is malformed, starting fresh");
            Manifest::empty()
        }
    }
}

/// Try to load without silently recovering from corruption, for callers
/// (tests, diagnostics) that want to observe the `StateCorrupt` condition
/// directly rather than the engine's always-recover behavior.
pub fn try_load(state_dir: &Path) -> Result<Manifest, QuadsyncError> {
    let path = state_file_path(state_dir);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Manifest::empty()),
        Err(e) => return Err(QuadsyncError::Io(e)),
    };
    serde_json::from_str(&content)
        .map_err(|e| QuadsyncError::StateCorrupt(e.to_string()))
}

/// Save the manifest as pretty-printed JSON, atomically: write to a sibling
/// temp file in `state_dir`, then rename it over the target. The temp file
/// is removed on any failure path before the rename would have succeeded.
pub fn save(state_dir: &Path, manifest: &Manifest) -> Result<(), QuadsyncError> {
    fs::create_dir_all(state_dir)
        .map_err(|e| QuadsyncError::StateWriteFailure(format!("creating state dir: {e}")))?;

    let path = state_file_path(state_dir);
    let tmp_path = state_dir.join(format!(".{STATE_FILE_NAME}.tmp"));

    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| QuadsyncError::StateWriteFailure(format!("serializing manifest: {e}")))?;

    if let Err(e) = fs::write(&tmp_path, &json) {
        let _ = fs::remove_file(&tmp_path);
        return Err(QuadsyncError::StateWriteFailure(format!(
            "writing temp state file: {e}"
        )));
    }

    if let Err(e) = fs::rename(&tmp_path, &path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(QuadsyncError::StateWriteFailure(format!(
            "renaming temp state file into place: {e}"
        )));
    }

    Ok(())
}

/// Ensure the state directory exists and is writable, per the invariant in
/// spec §3 ("exists and is writable before any mutation"). Probed with a
/// throwaway file rather than a permissions check, since that's the
/// condition that actually matters.
pub fn ensure_state_dir(state_dir: &Path) -> Result<(), QuadsyncError> {
    fs::create_dir_all(state_dir)?;
    let probe = state_dir.join(".quadsyncd-write-probe");
    fs::write(&probe, b"")?;
    fs::remove_file(&probe)?;
    Ok(())
}
