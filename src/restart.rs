//! C6: Restart Planner — derive the set of systemd unit names to
//! try-restart from a plan and the configured policy.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{classify, unit_name, FileKind, Manifest, Plan};

/// Which services get a `try-restart` after a pass. See spec §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Never restart anything.
    #[default]
    None,
    /// Restart only units whose quadlet changed in this pass.
    Changed,
    /// Restart every unit this agent manages, every pass.
    AllManaged,
}

/// Compute the deduplicated set of unit names to try-restart. Iteration
/// order of the result is unspecified by the spec; callers get a
/// `BTreeSet` for a stable, testable order rather than as a guarantee
/// consumers should depend on.
pub fn restart_set(policy: RestartPolicy, plan: &Plan, post_apply_manifest: &Manifest) -> BTreeSet<String> {
    match policy {
        RestartPolicy::None => BTreeSet::new(),
        RestartPolicy::Changed => plan
            .add
            .iter()
            .chain(plan.update.iter())
            .chain(plan.delete.iter())
            .filter_map(|op| quadlet_unit_name(&op.dest_path))
            .collect(),
        RestartPolicy::AllManaged => post_apply_manifest
            .managed_files
            .keys()
            .filter_map(|dest_path| quadlet_unit_name(dest_path))
            .collect(),
    }
}

fn quadlet_unit_name(dest_path: &std::path::Path) -> Option<String> {
    match classify(dest_path) {
        FileKind::Quadlet => unit_name(dest_path),
        FileKind::Companion => None,
    }
}
