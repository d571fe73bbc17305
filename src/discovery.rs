//! C1: File Discovery — enumerate the files under a repository subtree,
//! excluding anything with a hidden path component.

use std::path::{Path, PathBuf};

use crate::error::QuadsyncError;

/// Recursively enumerate files under `source_root`, skipping any entry (file
/// or directory) whose leaf name starts with `.`. A hidden directory prunes
/// its entire subtree rather than merely being excluded itself.
///
/// Ordering is unspecified by the spec; this returns entries in `walkdir`'s
/// traversal order, which is stable within one process for an unchanging
/// directory tree.
pub fn discover(source_root: &Path) -> Result<Vec<PathBuf>, QuadsyncError> {
    if !source_root.is_dir() {
        return Err(QuadsyncError::SourceUnavailable(format!(
            "source root {} does not exist or is not a directory",
            source_root.display()
        )));
    }

    let mut files = Vec::new();

    let walker = walkdir::WalkDir::new(source_root)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry));

    for entry in walker {
        let entry = entry.map_err(|e| QuadsyncError::DiscoveryFailure {
            path: e.path().unwrap_or(source_root).to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;

        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Compute `path` relative to `source_root` as a forward-slash-normalized
/// string, for use as a `ManagedFile::source_path`.
pub fn relative_source_path(source_root: &Path, path: &Path) -> String {
    path.strip_prefix(source_root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
