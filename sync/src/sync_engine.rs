//! Push, pull and wipe passes between a local root and a remote store
//!
//! Conflicts follow a last-writer-wins policy: both directions overwrite
//! the other side for every new or changed entry, with no three-way
//! merge. Two machines that push and pull against the same prior
//! snapshot can silently drop one side's changes; nothing here detects
//! that.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use drivesync_core::RemoteStore;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::diff::{diff_snapshots, SnapshotDiff, SyncAction, SyncPlan};
use crate::error::{Result, SyncError};
use crate::filter::{ExclusionFilter, FilterOptions};
use crate::merge::merge_diff;
use crate::metrics::{Operation, OperationOutcome, SyncDirection, SyncMetrics};
use crate::remote_tree::{NodeId, Removal, RemoteTree};
use crate::scanner::{DirectoryScanner, ScanOptions};
use crate::snapshot::{Entry, Snapshot};
use crate::state::{LocalState, STATE_FILE_NAME};

/// When the persisted snapshots are written after a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotPolicy {
    /// Always persist after the operation loop, even if some entries
    /// failed. Failed entries are then not retried by the next pass.
    #[default]
    AfterPass,
    /// Persist only when every entry succeeded
    RequireSuccess,
}

/// Options for sync passes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Name of the sync root folder under the store root
    pub sync_name: String,
    pub filter_options: FilterOptions,
    /// Principals granted access when the sync root is created
    pub shared_with: Vec<String>,
    pub scan_options: ScanOptions,
    pub snapshot_policy: SnapshotPolicy,
    /// Compute the plan without changing anything
    pub dry_run: bool,
}

impl SyncOptions {
    pub fn new(sync_name: impl Into<String>) -> Self {
        Self {
            sync_name: sync_name.into(),
            filter_options: FilterOptions::default(),
            shared_with: Vec::new(),
            scan_options: ScanOptions::default(),
            snapshot_policy: SnapshotPolicy::default(),
            dry_run: false,
        }
    }
}

/// Result of one pass
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub plan: SyncPlan,
    pub metrics: SyncMetrics,
}

impl SyncOutcome {
    pub fn is_successful(&self) -> bool {
        self.metrics.is_successful()
    }
}

pub struct SyncEngine {
    root: PathBuf,
    options: SyncOptions,
    store: Arc<dyn RemoteStore>,
    scanner: DirectoryScanner,
    filter: ExclusionFilter,
    state: LocalState,
}

impl SyncEngine {
    pub fn new(root: impl Into<PathBuf>, options: SyncOptions, store: Arc<dyn RemoteStore>) -> Result<Self> {
        let root = root.into();
        let filter = ExclusionFilter::new(options.filter_options.clone().with_pattern(STATE_FILE_NAME))?;
        let scanner = DirectoryScanner::new(options.scan_options.clone());
        let state = LocalState::new(&root);

        Ok(Self {
            root,
            options,
            store,
            scanner,
            filter,
            state,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn state(&self) -> &LocalState {
        &self.state
    }

    /// Apply local changes since the prior snapshot to the remote
    pub async fn push(&self) -> Result<SyncOutcome> {
        let mut metrics = SyncMetrics::new(SyncDirection::Push, self.options.dry_run);
        let (prior, current) = self.load_local_snapshots().await?;

        let diff = diff_snapshots(&prior, &current);
        let plan = SyncPlan::from_diff(&diff);
        metrics.planned = plan.actions.len();

        if plan.is_empty() {
            info!("No diff, nothing to push");
            return Ok(Self::finish(plan, metrics));
        }
        if self.options.dry_run {
            self.log_dry_run(&plan);
            return Ok(Self::finish(plan, metrics));
        }

        info!("Pushing {} to '{}'", plan.summary, self.options.sync_name);
        let mut tree = RemoteTree::new(self.store.clone());
        let sync_root = self.open_sync_root(&mut tree).await?;

        for action in &plan.actions {
            let operation = Operation::for_action(SyncDirection::Push, action);
            match self.apply_push_action(&mut tree, sync_root, operation, action).await {
                Ok(outcome) => metrics.record_operation(operation, outcome),
                Err(e) => metrics.record_failure(action.path(), operation, e.to_string()),
            }
        }

        if self.should_persist(&metrics) {
            self.state.save(&current).await?;

            let remote = self.fetch_remote_snapshot(&mut tree, sync_root).await?;
            let merged = merge_diff(&remote, &diff);
            self.store_remote_snapshot(&mut tree, sync_root, &merged).await?;
            metrics.snapshot_updated = true;
        }

        Ok(Self::finish(plan, metrics))
    }

    /// Apply remote changes since the prior snapshot to the local root
    pub async fn pull(&self) -> Result<SyncOutcome> {
        let mut metrics = SyncMetrics::new(SyncDirection::Pull, self.options.dry_run);
        let (prior, current) = self.load_local_snapshots().await?;

        let mut tree = RemoteTree::new(self.store.clone());
        let sync_root = self.find_sync_root(&mut tree).await?;
        let remote = match sync_root {
            Some(sync_root) => self.filter.apply(&self.fetch_remote_snapshot(&mut tree, sync_root).await?),
            None => {
                warn!(
                    "Remote folder '{}' does not exist, treating the remote as empty",
                    self.options.sync_name
                );
                Snapshot::new()
            }
        };

        let diff = diff_snapshots(&prior, &remote);
        let plan = SyncPlan::from_diff(&diff);
        metrics.planned = plan.actions.len();

        if plan.is_empty() {
            info!("No diff, nothing to pull");
            return Ok(Self::finish(plan, metrics));
        }
        if self.options.dry_run {
            self.log_dry_run(&plan);
            return Ok(Self::finish(plan, metrics));
        }

        info!("Pulling {} from '{}'", plan.summary, self.options.sync_name);
        for action in &plan.actions {
            let operation = Operation::for_action(SyncDirection::Pull, action);
            match self.apply_pull_action(&mut tree, sync_root, operation, action).await {
                Ok(outcome) => metrics.record_operation(operation, outcome),
                Err(e) => metrics.record_failure(action.path(), operation, e.to_string()),
            }
        }

        if self.should_persist(&metrics) {
            self.state.save(&merge_diff(&current, &diff)).await?;
            metrics.snapshot_updated = true;
        }

        Ok(Self::finish(plan, metrics))
    }

    /// Delete the remote sync root and forget the local prior snapshot
    ///
    /// Only the `sync_name` folder is removed. Other items in the store
    /// root, including other sync folders, are left alone.
    pub async fn wipe(&self) -> Result<SyncOutcome> {
        let mut metrics = SyncMetrics::new(SyncDirection::Wipe, self.options.dry_run);
        let mut tree = RemoteTree::new(self.store.clone());
        let sync_root = self.find_sync_root(&mut tree).await?;

        let diff = SnapshotDiff {
            removed: sync_root
                .map(|_| Entry::directory(self.options.sync_name.clone()))
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let plan = SyncPlan::from_diff(&diff);
        metrics.planned = plan.actions.len();

        if self.options.dry_run {
            self.log_dry_run(&plan);
            return Ok(Self::finish(plan, metrics));
        }

        match sync_root {
            Some(node) => match tree.remove(node).await {
                Ok(Removal::Deleted) => {
                    info!("{}", Operation::RemoveRemote.describe(&format!("{}/", self.options.sync_name)));
                    metrics.record_operation(Operation::RemoveRemote, OperationOutcome::Applied);
                }
                Ok(Removal::AlreadyAbsent) => {
                    info!(
                        "{} - already absent",
                        Operation::RemoveRemote.describe(&format!("{}/", self.options.sync_name))
                    );
                    metrics.record_operation(Operation::RemoveRemote, OperationOutcome::AlreadyAbsent);
                }
                Err(e) => metrics.record_failure(&self.options.sync_name, Operation::RemoveRemote, e.to_string()),
            },
            None => info!("Remote folder '{}' does not exist", self.options.sync_name),
        }

        if metrics.is_successful() {
            self.state.clear().await?;
            metrics.snapshot_updated = true;
        }

        Ok(Self::finish(plan, metrics))
    }

    fn finish(plan: SyncPlan, mut metrics: SyncMetrics) -> SyncOutcome {
        metrics.finish();
        SyncOutcome { plan, metrics }
    }

    fn log_dry_run(&self, plan: &SyncPlan) {
        info!("Dry run, {} not applied", plan.summary);
        for action in &plan.actions {
            debug!("Would {}", action);
        }
    }

    /// Prior and current local snapshots, both filtered
    async fn load_local_snapshots(&self) -> Result<(Snapshot, Snapshot)> {
        let prior = self.filter.apply(&self.state.load().await?);
        let current = self.filter.apply(&self.scanner.scan(&self.root).await?);
        debug!("Prior snapshot has {} entries, local tree {}", prior.len(), current.len());
        Ok((prior, current))
    }

    async fn find_sync_root(&self, tree: &mut RemoteTree) -> Result<Option<NodeId>> {
        let root = tree.root();
        match tree.get_child(root, &self.options.sync_name).await? {
            Some(node) if tree.is_directory(node) => Ok(Some(node)),
            Some(node) => Err(SyncError::conflict_error(
                tree.path(node),
                "the sync root exists but is not a directory",
            )),
            None => Ok(None),
        }
    }

    /// The sync root, created and shared if missing
    async fn open_sync_root(&self, tree: &mut RemoteTree) -> Result<NodeId> {
        if let Some(node) = self.find_sync_root(tree).await? {
            return Ok(node);
        }

        info!("Creating root directory {}", self.options.sync_name);
        let root = tree.root();
        let node = tree.mkdir(root, &self.options.sync_name).await?;
        for principal in &self.options.shared_with {
            tree.grant_access(node, principal).await?;
            info!("Shared {} with {}", self.options.sync_name, principal);
        }
        Ok(node)
    }

    async fn fetch_remote_snapshot(&self, tree: &mut RemoteTree, sync_root: NodeId) -> Result<Snapshot> {
        let Some(node) = tree.get_child(sync_root, STATE_FILE_NAME).await? else {
            debug!("No remote snapshot in '{}'", self.options.sync_name);
            return Ok(Snapshot::new());
        };

        let temp = tempfile::Builder::new().prefix("drivestate").tempfile()?;
        tree.download(node, temp.path()).await?;
        let text = fs::read_to_string(temp.path()).await?;
        Snapshot::parse(&text)
    }

    async fn store_remote_snapshot(&self, tree: &mut RemoteTree, sync_root: NodeId, snapshot: &Snapshot) -> Result<()> {
        let mut temp = tempfile::Builder::new().prefix("drivestate").tempfile()?;
        temp.write_all(snapshot.serialize().as_bytes())?;
        temp.flush()?;

        tree.upload(sync_root, STATE_FILE_NAME, temp.path()).await?;
        debug!("Stored remote snapshot with {} entries", snapshot.len());
        Ok(())
    }

    async fn apply_push_action(
        &self,
        tree: &mut RemoteTree,
        sync_root: NodeId,
        operation: Operation,
        action: &SyncAction,
    ) -> Result<OperationOutcome> {
        match action {
            SyncAction::Delete { path, .. } => {
                let lookup = tree.get_deep(sync_root, path, false).await?;
                let removal = match lookup.node {
                    Some(node) => tree.remove(node).await?,
                    None => Removal::AlreadyAbsent,
                };

                if removal == Removal::AlreadyAbsent {
                    info!("{} - already absent", operation.describe(path));
                    return Ok(OperationOutcome::AlreadyAbsent);
                }
                info!("{}", operation.describe(path));
            }
            SyncAction::CreateDirectory { path } => {
                info!("{}", operation.describe(path));
                let parent = self.remote_parent(tree, sync_root, path).await?;
                tree.mkdir(parent, file_name(path)).await?;
            }
            SyncAction::Copy { path, .. } | SyncAction::Update { path, .. } => {
                info!("{}", operation.describe(path));
                let parent = self.remote_parent(tree, sync_root, path).await?;
                tree.upload(parent, file_name(path), &self.local_path(path)).await?;
            }
        }

        Ok(OperationOutcome::Applied)
    }

    /// Containing remote directory of `path`, creating missing intermediates
    async fn remote_parent(&self, tree: &mut RemoteTree, sync_root: NodeId, path: &str) -> Result<NodeId> {
        tree.get_deep(sync_root, path, true)
            .await?
            .parent
            .ok_or_else(|| SyncError::path_error(path, "No remote parent directory"))
    }

    async fn apply_pull_action(
        &self,
        tree: &mut RemoteTree,
        sync_root: Option<NodeId>,
        operation: Operation,
        action: &SyncAction,
    ) -> Result<OperationOutcome> {
        match action {
            SyncAction::Delete { path, .. } => {
                let local = self.local_path(path);
                if !remove_local(&local).await? {
                    info!("{} - already absent", operation.describe(path));
                    return Ok(OperationOutcome::AlreadyAbsent);
                }
                info!("{}", operation.describe(path));
            }
            SyncAction::CreateDirectory { path } => {
                info!("{}", operation.describe(path));
                let local = self.local_path(path);
                if !fs::metadata(&local).await.map(|m| m.is_dir()).unwrap_or(false) {
                    remove_local(&local).await?;
                    fs::create_dir_all(&local)
                        .await
                        .map_err(|e| SyncError::path_error(&local, format!("Failed to create directory: {}", e)))?;
                }
            }
            SyncAction::Copy { path, .. } | SyncAction::Update { path, .. } => {
                let sync_root = sync_root.ok_or_else(|| SyncError::missing_on_remote(path.clone()))?;
                let node = tree
                    .get_deep(sync_root, path, false)
                    .await?
                    .node
                    .ok_or_else(|| SyncError::missing_on_remote(path.clone()))?;

                info!("{}", operation.describe(path));
                self.download_to(tree, node, &self.local_path(path)).await?;
            }
        }

        Ok(OperationOutcome::Applied)
    }

    /// Download into a temporary file beside `local`, then move it over whatever is there
    async fn download_to(&self, tree: &RemoteTree, node: NodeId, local: &Path) -> Result<()> {
        let directory = local
            .parent()
            .ok_or_else(|| SyncError::path_error(local, "Path has no parent directory"))?;
        fs::create_dir_all(directory)
            .await
            .map_err(|e| SyncError::path_error(directory, format!("Failed to create directory: {}", e)))?;

        let temp = tempfile::Builder::new().prefix(".drivesync").tempfile_in(directory)?;
        tree.download(node, temp.path()).await?;

        remove_local(local).await?;
        temp.persist(local).map_err(|e| SyncError::Io(e.error))?;
        Ok(())
    }

    fn local_path(&self, path: &str) -> PathBuf {
        path.split('/').fold(self.root.clone(), |local, part| local.join(part))
    }

    fn should_persist(&self, metrics: &SyncMetrics) -> bool {
        if metrics.is_successful() {
            return true;
        }

        let failed = metrics.failed().len();
        match self.options.snapshot_policy {
            SnapshotPolicy::AfterPass => {
                warn!(
                    "{} entries failed, persisting the snapshot anyway; those changes will not be retried",
                    failed
                );
                true
            }
            SnapshotPolicy::RequireSuccess => {
                warn!("{} entries failed, keeping the previous snapshot", failed);
                false
            }
        }
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Remove a local file or directory tree; false if nothing was there
async fn remove_local(path: &Path) -> Result<bool> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(SyncError::deletion_error(path, e.to_string())),
    };

    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    removed.map_err(|e| SyncError::deletion_error(path, e.to_string()))?;
    Ok(true)
}
