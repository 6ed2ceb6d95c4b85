//! Remote store backed by a local directory, e.g. a mounted network share

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{RemoteError, Result};
use crate::store::{RemoteId, RemoteItem, RemoteStore};

/// A [`RemoteStore`] whose ids are slash-separated paths relative to `root`.
///
/// The root folder has the empty id.
#[derive(Debug, Clone)]
pub struct FolderStore {
    root: PathBuf,
}

impl FolderStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open an existing directory as a store
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let metadata = tokio::fs::metadata(&root)
            .await
            .map_err(|e| map_io_error(e, &root.display().to_string()))?;
        if !metadata.is_dir() {
            return Err(RemoteError::Conflict(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, id: &RemoteId) -> Result<PathBuf> {
        let relative = Path::new(id.as_str());
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn child_id(parent: &RemoteId, name: &str) -> Result<RemoteId> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(RemoteError::Unknown(format!("invalid entry name '{}'", name)));
        }
        if parent.as_str().is_empty() {
            Ok(RemoteId::new(name))
        } else {
            Ok(RemoteId::new(format!("{}/{}", parent, name)))
        }
    }
}

fn map_io_error(error: io::Error, id: &str) -> RemoteError {
    match error.kind() {
        io::ErrorKind::NotFound => RemoteError::NotFound(id.to_string()),
        io::ErrorKind::AlreadyExists => RemoteError::Conflict(id.to_string()),
        _ => RemoteError::Io(error),
    }
}

#[async_trait]
impl RemoteStore for FolderStore {
    fn root_id(&self) -> RemoteId {
        RemoteId::new("")
    }

    async fn list_children(&self, folder: &RemoteId) -> Result<Vec<RemoteItem>> {
        let path = self.resolve(folder)?;
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| map_io_error(e, folder.as_str()))?;

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                debug!("Skipping non UTF-8 entry in {}", path.display());
                continue;
            };
            let is_directory = entry.file_type().await?.is_dir();
            items.push(RemoteItem {
                id: Self::child_id(folder, &name)?,
                name,
                is_directory,
            });
        }

        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn create_directory(&self, name: &str, parent: &RemoteId) -> Result<RemoteId> {
        let id = Self::child_id(parent, name)?;
        let path = self.resolve(&id)?;

        if !tokio::fs::try_exists(self.resolve(parent)?).await? {
            return Err(RemoteError::NotFound(parent.to_string()));
        }
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| map_io_error(e, id.as_str()))?;

        Ok(id)
    }

    async fn upload(&self, name: &str, parent: &RemoteId, local_path: &Path) -> Result<RemoteId> {
        let id = Self::child_id(parent, name)?;
        let path = self.resolve(&id)?;

        if !tokio::fs::try_exists(self.resolve(parent)?).await? {
            return Err(RemoteError::NotFound(parent.to_string()));
        }
        if tokio::fs::try_exists(&path).await? {
            return Err(RemoteError::Conflict(id.to_string()));
        }
        tokio::fs::copy(local_path, &path).await?;

        Ok(id)
    }

    async fn download(&self, id: &RemoteId, destination: &Path) -> Result<()> {
        let path = self.resolve(id)?;
        tokio::fs::copy(&path, destination)
            .await
            .map_err(|e| map_io_error(e, id.as_str()))?;
        Ok(())
    }

    async fn delete(&self, id: &RemoteId) -> Result<()> {
        if id.as_str().is_empty() {
            return Err(RemoteError::Authorization("refusing to delete the store root".to_string()));
        }
        let path = self.resolve(id)?;
        let metadata = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|e| map_io_error(e, id.as_str()))?;

        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn grant_access(&self, id: &RemoteId, principal: &str) -> Result<()> {
        info!("Folder store does not manage permissions, not sharing '{}' with {}", id, principal);
        Ok(())
    }
}
