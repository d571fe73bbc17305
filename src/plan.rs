//! C4: Planner — diff discovered source files against the previous manifest
//! to produce three disjoint operation sets.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::discovery::relative_source_path;
use crate::error::QuadsyncError;
use crate::hash::hash_file;
use crate::model::{FileOp, ManagedFile, Manifest, Plan};

/// Build a plan from the discovered source files, the previous manifest, and
/// the prune flag. `source_root` and `destination_dir` are both absolute.
///
/// Per spec §4.4: a discovered file whose destination has no manifest entry
/// is an `Add`; one whose entry exists with a different hash is an
/// `Update` (this also covers the defensive "same hash, different
/// `source_path`" case); one whose entry exists with the same hash produces
/// no operation. If `prune` is true, every manifest entry whose destination
/// wasn't discovered this pass becomes a `Delete`.
pub fn build_plan(
    source_root: &Path,
    destination_dir: &Path,
    discovered: &[PathBuf],
    previous: &Manifest,
    prune: bool,
) -> Result<Plan, QuadsyncError> {
    let mut plan = Plan::default();
    let mut discovered_dests = BTreeSet::new();

    for source_path in discovered {
        let rel = relative_source_path(source_root, source_path);
        let dest_path = destination_dir.join(&rel);

        if !dest_path.starts_with(destination_dir) {
            return Err(QuadsyncError::PathEscape(dest_path));
        }

        discovered_dests.insert(dest_path.clone());

        let hash = hash_file(source_path)?;

        match previous.managed_files.get(&dest_path) {
            None => plan.add.push(FileOp {
                source_path: Some(rel),
                dest_path,
                hash,
            }),
            Some(entry) if entry.hash != hash || entry.source_path != rel => {
                plan.update.push(FileOp {
                    source_path: Some(rel),
                    dest_path,
                    hash,
                })
            }
            Some(_) => { /* unchanged: no operation */ }
        }
    }

    if prune {
        for (dest_path, entry) in &previous.managed_files {
            if !discovered_dests.contains(dest_path) {
                plan.delete.push(FileOp {
                    source_path: None,
                    dest_path: dest_path.clone(),
                    hash: entry.hash.clone(),
                });
            }
        }
    }

    Ok(plan)
}

/// Build the post-apply manifest from the previous one and an applied plan.
/// Deletes remove their entry; adds/updates upsert with the op's hash and
/// source path. `revision` is set to the pass's resolved source revision.
pub fn next_manifest(previous: &Manifest, plan: &Plan, revision: &str) -> Manifest {
    let mut managed_files = previous.managed_files.clone();

    for op in &plan.delete {
        managed_files.remove(&op.dest_path);
    }
    for op in plan.add.iter().chain(plan.update.iter()) {
        managed_files.insert(
            op.dest_path.clone(),
            ManagedFile {
                source_path: op
                    .source_path
                    .clone()
                    .expect("add/update ops always carry a source_path"),
                hash: op.hash.clone(),
            },
        );
    }

    Manifest {
        version: crate::model::MANIFEST_VERSION,
        revision: revision.to_string(),
        managed_files,
    }
}
