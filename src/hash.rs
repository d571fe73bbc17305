//! C2: Hasher — stream a file's bytes through SHA-256 in constant memory.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::QuadsyncError;

const CHUNK_SIZE: usize = 64 * 1024;

/// Hash `path`'s contents, returning a 64-char lowercase hex digest.
/// Streams the file in fixed-size chunks rather than reading it whole, and
/// closes the handle on every exit path via `File`'s `Drop`.
pub fn hash_file(path: &Path) -> Result<String, QuadsyncError> {
    let file = File::open(path).map_err(|source| QuadsyncError::HashFailure {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let read = reader
            .read(&mut buf)
            .map_err(|source| QuadsyncError::HashFailure {
                path: path.to_path_buf(),
                source,
            })?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash an in-memory byte slice. Used by the webhook signature check and by
/// tests that don't want to round-trip through the filesystem.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
