//! Folding an applied diff back into a snapshot

use std::collections::HashMap;

use crate::diff::SnapshotDiff;
use crate::snapshot::{Entry, Snapshot};

/// Next snapshot after applying `diff` on top of `base`.
///
/// Removed paths are dropped (a path missing from `base` is ignored), then
/// new and changed entries are upserted. Untouched entries carry over.
pub fn merge_diff(base: &Snapshot, diff: &SnapshotDiff) -> Snapshot {
    let mut by_path: HashMap<&str, &Entry> = base.iter().map(|e| (e.path(), e)).collect();

    for entry in &diff.removed {
        by_path.remove(entry.path());
    }

    for entry in diff.new.iter().chain(&diff.changed) {
        by_path.insert(entry.path(), entry);
    }

    Snapshot::from_entries(by_path.into_values().cloned())
}
