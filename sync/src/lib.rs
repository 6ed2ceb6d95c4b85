//! Snapshot based two-way sync engine
//!
//! A pass compares the snapshot persisted after the previous sync with the
//! current state of one side and applies the difference to the other side:
//! - local directory scanning with content fingerprints
//! - snapshot diffing, merging and exclusion filtering
//! - a lazily explored cache over any [`drivesync_core::RemoteStore`]
//! - push, pull and wipe passes with per-entry failure reporting
//! - dry-run planning

pub mod config;
pub mod diff;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod merge;
pub mod metrics;
pub mod remote_tree;
pub mod scanner;
pub mod snapshot;
pub mod state;
pub mod sync_engine;

#[cfg(test)]
pub(crate) mod memory_store;

use std::path::Path;
use std::sync::Arc;

use drivesync_core::RemoteStore;

// Re-export main types and functions
pub use config::{Settings, SETTINGS_FILE_NAME};
pub use diff::{diff_snapshots, PlanSummary, SnapshotDiff, SyncAction, SyncPlan};
pub use error::{Result, SyncError};
pub use filter::{ExclusionFilter, FilterOptions};
pub use fingerprint::{Fingerprinter, HashAlgorithm};
pub use merge::merge_diff;
pub use metrics::{Operation, OperationFailure, SyncDirection, SyncMetrics};
pub use remote_tree::{DeepLookup, NodeId, Removal, RemoteTree};
pub use scanner::{DirectoryScanner, ScanOptions};
pub use snapshot::{Entry, EntryKind, Snapshot};
pub use state::{LocalState, STATE_FILE_NAME};
pub use sync_engine::{SnapshotPolicy, SyncEngine, SyncOptions, SyncOutcome};

/// Scan a directory into an unfiltered snapshot
pub async fn scan_directory(path: impl AsRef<Path>, options: ScanOptions) -> Result<Snapshot> {
    DirectoryScanner::new(options).scan(path).await
}

/// Run one push pass from `root` to `store`
pub async fn push(root: impl AsRef<Path>, options: SyncOptions, store: Arc<dyn RemoteStore>) -> Result<SyncOutcome> {
    SyncEngine::new(root.as_ref(), options, store)?.push().await
}

/// Run one pull pass from `store` into `root`
pub async fn pull(root: impl AsRef<Path>, options: SyncOptions, store: Arc<dyn RemoteStore>) -> Result<SyncOutcome> {
    SyncEngine::new(root.as_ref(), options, store)?.pull().await
}
