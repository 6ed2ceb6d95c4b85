//! The `drivesync.json` settings file

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{Result, SyncError};
use crate::filter::{ExclusionFilter, FilterOptions};
use crate::fingerprint::HashAlgorithm;
use crate::scanner::ScanOptions;
use crate::sync_engine::{SnapshotPolicy, SyncOptions};

/// Name of the settings file in the local root
pub const SETTINGS_FILE_NAME: &str = "drivesync.json";

const PLACEHOLDER_SYNC_NAME: &str = "<folder name>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// Name of the folder holding the synchronized tree on the remote
    pub sync_name: String,
    /// Credentials file, relative to the local root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<PathBuf>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub excluded: Vec<String>,
    /// Principals granted write access when the sync folder is created
    #[serde(default, deserialize_with = "null_as_empty")]
    pub shared: Vec<String>,
    /// Use a directory instead of Google Drive as the remote
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_folder: Option<PathBuf>,
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
    #[serde(default)]
    pub snapshot_policy: SnapshotPolicy,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Settings {
    /// Settings written by `init`, to be filled in by the user
    pub fn skeleton() -> Self {
        Self {
            sync_name: PLACEHOLDER_SYNC_NAME.to_string(),
            credentials: Some(PathBuf::from("credentials.json")),
            excluded: Vec::new(),
            shared: Vec::new(),
            remote_folder: None,
            hash_algorithm: HashAlgorithm::default(),
            snapshot_policy: SnapshotPolicy::default(),
        }
    }

    pub fn settings_path(root: &Path) -> PathBuf {
        root.join(SETTINGS_FILE_NAME)
    }

    /// Read and validate the settings of a local root
    pub async fn load(root: &Path) -> Result<Self> {
        let path = Self::settings_path(root);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::config_error(format!(
                    "{} does not exist, run 'drivesync init' to create it",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(SyncError::config_error(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let settings = Self::from_json(&content)?;
        if settings.remote_folder_in_root(root) == Some(PathBuf::new()) {
            return Err(SyncError::config_error(
                "remote-folder cannot be the local root itself",
            ));
        }
        Ok(settings)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(content)
            .map_err(|e| SyncError::config_error(format!("Invalid {}: {}", SETTINGS_FILE_NAME, e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let name = self.sync_name.trim();
        if name.is_empty() {
            return Err(SyncError::config_error("sync-name cannot be empty"));
        }
        if name == PLACEHOLDER_SYNC_NAME {
            return Err(SyncError::config_error(format!(
                "sync-name is still the placeholder, edit {}",
                SETTINGS_FILE_NAME
            )));
        }
        if name.contains('/') {
            return Err(SyncError::config_error("sync-name cannot contain '/'"));
        }

        if self.credentials.is_none() && self.remote_folder.is_none() {
            return Err(SyncError::config_error(
                "credentials is required unless remote-folder is set",
            ));
        }

        ExclusionFilter::new(FilterOptions::new(self.excluded.iter().cloned()))
            .map_err(|e| SyncError::config_error(format!("Invalid excluded pattern: {}", e)))?;

        Ok(())
    }

    /// Write the skeleton settings file, refusing to replace an existing one
    pub async fn write_skeleton(root: &Path) -> Result<PathBuf> {
        let path = Self::settings_path(root);
        let content = serde_json::to_string_pretty(&Self::skeleton())?;

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SyncError::config_error(format!(
                    "{} already exists, this is already a drivesync directory",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        file.write_all(content.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(path)
    }

    pub fn credentials_path(&self, root: &Path) -> Option<PathBuf> {
        self.credentials.as_ref().map(|c| root.join(c))
    }

    pub fn remote_folder_path(&self, root: &Path) -> Option<PathBuf> {
        self.remote_folder.as_ref().map(|f| root.join(f))
    }

    /// Location of the remote folder relative to the local root, when it lies inside it
    pub fn remote_folder_in_root(&self, root: &Path) -> Option<PathBuf> {
        let folder = self.remote_folder_path(root)?;
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir().ok()?.join(root)
        };
        let folder = if folder.is_absolute() {
            folder
        } else {
            std::env::current_dir().ok()?.join(folder)
        };

        normalize(&folder)
            .strip_prefix(normalize(&root))
            .ok()
            .map(Path::to_path_buf)
    }

    /// Engine options for one pass
    ///
    /// A remote folder inside `root` is excluded, otherwise every push
    /// would upload the store into itself.
    pub fn sync_options(&self, root: &Path, dry_run: bool) -> SyncOptions {
        let mut filter_options = FilterOptions::new(self.excluded.iter().cloned());
        if let Some(pattern) = self.remote_folder_in_root(root).and_then(|r| anchored_pattern(&r)) {
            filter_options = filter_options.with_pattern(pattern);
        }

        SyncOptions {
            sync_name: self.sync_name.trim().to_string(),
            filter_options,
            shared_with: self.shared.clone(),
            scan_options: ScanOptions {
                hash_algorithm: self.hash_algorithm,
                ..Default::default()
            },
            snapshot_policy: self.snapshot_policy,
            dry_run,
        }
    }
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

fn anchored_pattern(relative: &Path) -> Option<String> {
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str().map(globset::escape))
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(format!("/{}", parts.join("/")))
}
