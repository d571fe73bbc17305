//! C5: Applier — execute a plan against the destination directory using
//! crash-safe per-file replacement.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::QuadsyncError;
use crate::model::Plan;

/// Apply `plan` to the destination tree, resolving each add/update op's
/// source bytes from `source_root.join(op.source_path)`. Adds and updates
/// are applied in order, then deletes, per spec §4.5. On the first failure
/// the apply aborts and returns the error; operations already applied
/// remain in place — the caller (the engine) must not update the manifest
/// in that case so the next pass retries.
pub fn apply_from_source_root(source_root: &Path, plan: &Plan) -> Result<(), QuadsyncError> {
    for op in &plan.add {
        let src = source_root.join(op.source_path.as_ref().unwrap());
        write_file_atomic(&src, &op.dest_path, "add")?;
    }
    for op in &plan.update {
        let src = source_root.join(op.source_path.as_ref().unwrap());
        write_file_atomic(&src, &op.dest_path, "update")?;
    }
    for op in &plan.delete {
        delete_file(&op.dest_path)?;
    }
    Ok(())
}

/// Copy `src`'s bytes and permission mode into `dest` atomically: create the
/// parent directory if missing, stream into a privately-named temp file in
/// `dest`'s own directory, set its mode to match `src`, then rename it over
/// `dest`. On any error before the rename, the temp file is removed.
fn write_file_atomic(src: &Path, dest: &Path, op_label: &'static str) -> Result<(), QuadsyncError> {
    let parent = dest.parent().ok_or_else(|| QuadsyncError::ApplyFailure {
        op: op_label,
        dest: dest.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"),
    })?;

    fs::create_dir_all(parent).map_err(|source| QuadsyncError::ApplyFailure {
        op: op_label,
        dest: dest.to_path_buf(),
        source,
    })?;

    let tmp_path = tmp_path_for(dest);

    let result = (|| -> io::Result<()> {
        let mode = source_mode(src)?;
        let mut src_file = File::open(src)?;
        let mut tmp_file = File::create(&tmp_path)?;

        let mut buf = [0u8; 64 * 1024];
        loop {
            let read = src_file.read(&mut buf)?;
            if read == 0 {
                break;
            }
            tmp_file.write_all(&buf[..read])?;
        }
        tmp_file.flush()?;
        set_mode(&tmp_file, mode)?;
        drop(tmp_file);
        Ok(())
    })();

    if let Err(source) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(QuadsyncError::ApplyFailure {
            op: op_label,
            dest: dest.to_path_buf(),
            source,
        });
    }

    fs::rename(&tmp_path, dest).map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        QuadsyncError::ApplyFailure {
            op: op_label,
            dest: dest.to_path_buf(),
            source,
        }
    })
}

fn delete_file(dest: &Path) -> Result<(), QuadsyncError> {
    match fs::remove_file(dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(QuadsyncError::ApplyFailure {
            op: "delete",
            dest: dest.to_path_buf(),
            source,
        }),
    }
}

fn tmp_path_for(dest: &Path) -> std::path::PathBuf {
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let pid = std::process::id();
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(".{file_name}.quadsyncd-{pid}.tmp"))
}

#[cfg(unix)]
fn source_mode(path: &Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode())
}

#[cfg(not(unix))]
fn source_mode(_path: &Path) -> io::Result<u32> {
    Ok(0o644)
}

#[cfg(unix)]
fn set_mode(file: &File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &File, _mode: u32) -> io::Result<()> {
    Ok(())
}
