//! Metrics and statistics for sync passes

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::diff::SyncAction;

/// Which way a pass moves data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Push,
    Pull,
    Wipe,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncDirection::Push => "push",
            SyncDirection::Pull => "pull",
            SyncDirection::Wipe => "wipe",
        };
        f.write_str(name)
    }
}

/// A single mutation applied to one side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    RemoveRemote,
    CreateRemoteDirectory,
    Upload,
    RemoveLocal,
    CreateLocalDirectory,
    Download,
}

impl Operation {
    /// The operation that carries out `action` in a pass of `direction`
    pub fn for_action(direction: SyncDirection, action: &SyncAction) -> Self {
        let pulling = direction == SyncDirection::Pull;
        match action {
            SyncAction::Delete { .. } if pulling => Operation::RemoveLocal,
            SyncAction::Delete { .. } => Operation::RemoveRemote,
            SyncAction::CreateDirectory { .. } if pulling => Operation::CreateLocalDirectory,
            SyncAction::CreateDirectory { .. } => Operation::CreateRemoteDirectory,
            SyncAction::Copy { .. } | SyncAction::Update { .. } if pulling => Operation::Download,
            SyncAction::Copy { .. } | SyncAction::Update { .. } => Operation::Upload,
        }
    }

    /// Log prefix, e.g. "Removing remote"
    pub fn label(&self) -> &'static str {
        match self {
            Operation::RemoveRemote => "Removing remote",
            Operation::CreateRemoteDirectory => "Creating remote",
            Operation::Upload => "Uploading remote",
            Operation::RemoveLocal => "Removing local",
            Operation::CreateLocalDirectory => "Creating local",
            Operation::Download => "Downloading local",
        }
    }

    /// Log line for applying this operation to `path`
    pub fn describe(&self, path: &str) -> String {
        match self {
            Operation::CreateRemoteDirectory | Operation::CreateLocalDirectory => {
                format!("{} {}/", self.label(), path)
            }
            _ => format!("{} {}", self.label(), path),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Applied,
    /// A removal whose target no longer existed
    AlreadyAbsent,
}

/// A per-entry failure; the pass carries on past it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub path: String,
    pub operation: Operation,
    pub message: String,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.operation, self.path, self.message)
    }
}

/// Counters per applied operation kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStats {
    pub remote_removals: usize,
    pub remote_directories: usize,
    pub uploads: usize,
    pub local_removals: usize,
    pub local_directories: usize,
    pub downloads: usize,
    /// Removals that found nothing to remove
    pub already_absent: usize,
}

impl OperationStats {
    pub fn applied(&self) -> usize {
        self.remote_removals
            + self.remote_directories
            + self.uploads
            + self.local_removals
            + self.local_directories
            + self.downloads
            + self.already_absent
    }
}

/// Metrics for one sync pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMetrics {
    /// Unique session identifier
    pub session_id: Uuid,
    pub direction: SyncDirection,
    pub dry_run: bool,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
    pub duration: Duration,
    /// Number of actions in the plan
    pub planned: usize,
    pub operations: OperationStats,
    pub failures: Vec<OperationFailure>,
    /// Whether the persisted snapshots were written
    pub snapshot_updated: bool,
}

impl SyncMetrics {
    pub fn new(direction: SyncDirection, dry_run: bool) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            direction,
            dry_run,
            start_time: SystemTime::now(),
            end_time: None,
            duration: Duration::default(),
            planned: 0,
            operations: OperationStats::default(),
            failures: Vec::new(),
            snapshot_updated: false,
        }
    }

    pub fn record_operation(&mut self, operation: Operation, outcome: OperationOutcome) {
        if outcome == OperationOutcome::AlreadyAbsent {
            self.operations.already_absent += 1;
            return;
        }

        let counter = match operation {
            Operation::RemoveRemote => &mut self.operations.remote_removals,
            Operation::CreateRemoteDirectory => &mut self.operations.remote_directories,
            Operation::Upload => &mut self.operations.uploads,
            Operation::RemoveLocal => &mut self.operations.local_removals,
            Operation::CreateLocalDirectory => &mut self.operations.local_directories,
            Operation::Download => &mut self.operations.downloads,
        };
        *counter += 1;
    }

    pub fn record_failure(&mut self, path: impl Into<String>, operation: Operation, message: impl Into<String>) {
        let failure = OperationFailure {
            path: path.into(),
            operation,
            message: message.into(),
        };
        warn!(
            session_id = %self.session_id,
            path = %failure.path,
            operation = ?failure.operation,
            "{} {} failed: {}",
            failure.operation,
            failure.path,
            failure.message
        );
        self.failures.push(failure);
    }

    pub fn failed(&self) -> &[OperationFailure] {
        &self.failures
    }

    pub fn is_successful(&self) -> bool {
        self.failures.is_empty()
    }

    /// Mark the pass as completed and log its metrics
    pub fn finish(&mut self) {
        let end = SystemTime::now();
        self.end_time = Some(end);
        self.duration = end.duration_since(self.start_time).unwrap_or_default();

        info!(
            session_id = %self.session_id,
            direction = %self.direction,
            dry_run = self.dry_run,
            duration_secs = self.duration.as_secs_f64(),
            planned = self.planned,
            applied = self.operations.applied(),
            already_absent = self.operations.already_absent,
            failed = self.failures.len(),
            snapshot_updated = self.snapshot_updated,
            "Sync pass completed"
        );
    }

    pub fn summary(&self) -> String {
        if self.dry_run {
            return format!("Dry run {}: {} actions planned", self.direction, self.planned);
        }

        let ops = &self.operations;
        format!(
            "{} completed in {:.2}s: {} of {} actions applied ({} directories, {} transfers, {} removals, {} already absent), {} failed",
            self.direction,
            self.duration.as_secs_f64(),
            ops.applied(),
            self.planned,
            ops.remote_directories + ops.local_directories,
            ops.uploads + ops.downloads,
            ops.remote_removals + ops.local_removals,
            ops.already_absent,
            self.failures.len()
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
