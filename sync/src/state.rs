//! Persisted prior-sync snapshot

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::snapshot::Snapshot;

/// Name of the snapshot file, both in the local root and in the remote sync root
pub const STATE_FILE_NAME: &str = "drivestate.txt";

/// The prior snapshot stored next to the synchronized files
#[derive(Debug, Clone)]
pub struct LocalState {
    path: PathBuf,
}

impl LocalState {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(STATE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the prior snapshot; a missing file is an empty snapshot
    pub async fn load(&self) -> Result<Snapshot> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Snapshot::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No prior snapshot at {}", self.path.display());
                Ok(Snapshot::new())
            }
            Err(e) => Err(SyncError::path_error(&self.path, format!("Failed to read state: {}", e))),
        }
    }

    /// Replace the stored snapshot atomically
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let path = self.path.clone();
        let text = snapshot.serialize();

        tokio::task::spawn_blocking(move || write_atomically(&path, text.as_bytes()))
            .await
            .map_err(|e| SyncError::Generic(e.into()))??;

        debug!("Saved {} entries to {}", snapshot.len(), self.path.display());
        Ok(())
    }

    /// Remove the stored snapshot; a missing file is not an error
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::deletion_error(&self.path, e.to_string())),
        }
    }
}

/// Write `content` to a temporary file next to `path` and rename it into place
pub(crate) fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let directory = path
        .parent()
        .ok_or_else(|| SyncError::path_error(path, "Path has no parent directory"))?;

    let mut temp = NamedTempFile::new_in(directory)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| SyncError::Io(e.error))?;
    Ok(())
}
