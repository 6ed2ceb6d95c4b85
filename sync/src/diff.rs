//! Snapshot diffing and the ordered sync plan derived from it

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::snapshot::{Entry, Snapshot};

/// Three-way partition of the changes between two snapshots.
///
/// Each list is in canonical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// Present in the target only
    pub new: Vec<Entry>,
    /// Present in the source only
    pub removed: Vec<Entry>,
    /// Files present in both with differing fingerprints, as found in the target
    pub changed: Vec<Entry>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.new.len() + self.removed.len() + self.changed.len()
    }
}

/// Compute what changed going from `source` to `target`.
///
/// A path whose kind differs between the two snapshots is reported as
/// unchanged.
pub fn diff_snapshots(source: &Snapshot, target: &Snapshot) -> SnapshotDiff {
    let source_map: HashMap<&str, &Entry> = source.iter().map(|e| (e.path(), e)).collect();
    let target_map: HashMap<&str, &Entry> = target.iter().map(|e| (e.path(), e)).collect();

    let mut diff = SnapshotDiff::default();

    for entry in target {
        match source_map.get(entry.path()) {
            None => diff.new.push(entry.clone()),
            Some(previous) if previous.kind() != entry.kind() => {
                warn!(
                    "'{}' changed from {:?} to {:?}, kind changes are not synchronized",
                    entry.path(),
                    previous.kind(),
                    entry.kind()
                );
            }
            Some(previous) => {
                if !entry.is_directory() && previous.fingerprint() != entry.fingerprint() {
                    diff.changed.push(entry.clone());
                }
            }
        }
    }

    for entry in source {
        if !target_map.contains_key(entry.path()) {
            diff.removed.push(entry.clone());
        }
    }

    diff
}

/// Actions that can be performed during synchronization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncAction {
    /// Delete a file or directory on the receiving side
    Delete { path: String, is_directory: bool },
    /// Create a directory on the receiving side
    CreateDirectory { path: String },
    /// Transfer a file that does not exist on the receiving side yet
    Copy { path: String, fingerprint: String },
    /// Transfer a file whose content changed
    Update { path: String, fingerprint: String },
}

impl SyncAction {
    pub fn path(&self) -> &str {
        match self {
            SyncAction::Delete { path, .. }
            | SyncAction::CreateDirectory { path }
            | SyncAction::Copy { path, .. }
            | SyncAction::Update { path, .. } => path,
        }
    }

    fn from_new(entry: &Entry) -> Self {
        match entry.fingerprint() {
            Some(fingerprint) if !entry.is_directory() => SyncAction::Copy {
                path: entry.path().to_string(),
                fingerprint: fingerprint.to_string(),
            },
            _ => SyncAction::CreateDirectory {
                path: entry.path().to_string(),
            },
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Delete { path, is_directory: true } => write!(f, "delete {}/", path),
            SyncAction::Delete { path, .. } => write!(f, "delete {}", path),
            SyncAction::CreateDirectory { path } => write!(f, "mkdir  {}/", path),
            SyncAction::Copy { path, .. } => write!(f, "copy   {}", path),
            SyncAction::Update { path, .. } => write!(f, "update {}", path),
        }
    }
}

/// A complete sync plan with all actions in execution order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncPlan {
    /// List of actions to perform
    pub actions: Vec<SyncAction>,
    /// Summary statistics
    pub summary: PlanSummary,
}

/// Summary of a sync plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_actions: usize,
    pub copies: usize,
    pub updates: usize,
    pub deletes: usize,
    pub directory_creates: usize,
}

impl SyncPlan {
    /// Order a diff for execution: removals deepest first, then new entries
    /// shallowest first, then changed files.
    pub fn from_diff(diff: &SnapshotDiff) -> Self {
        let mut actions = Vec::with_capacity(diff.len());

        let mut removed: Vec<&Entry> = diff.removed.iter().collect();
        removed.sort_by(|a, b| b.cmp(a));
        actions.extend(removed.into_iter().map(|entry| SyncAction::Delete {
            path: entry.path().to_string(),
            is_directory: entry.is_directory(),
        }));

        let mut new: Vec<&Entry> = diff.new.iter().collect();
        new.sort();
        actions.extend(new.into_iter().map(SyncAction::from_new));

        let mut changed: Vec<&Entry> = diff.changed.iter().collect();
        changed.sort();
        actions.extend(changed.into_iter().filter_map(|entry| {
            entry.fingerprint().map(|fingerprint| SyncAction::Update {
                path: entry.path().to_string(),
                fingerprint: fingerprint.to_string(),
            })
        }));

        let summary = Self::generate_summary(&actions);
        Self { actions, summary }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn generate_summary(actions: &[SyncAction]) -> PlanSummary {
        let mut summary = PlanSummary {
            total_actions: actions.len(),
            ..Default::default()
        };

        for action in actions {
            match action {
                SyncAction::Delete { .. } => summary.deletes += 1,
                SyncAction::CreateDirectory { .. } => summary.directory_creates += 1,
                SyncAction::Copy { .. } => summary.copies += 1,
                SyncAction::Update { .. } => summary.updates += 1,
            }
        }

        summary
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} actions: {} deletes, {} directories, {} copies, {} updates",
            self.total_actions, self.deletes, self.directory_creates, self.copies, self.updates
        )
    }
}
