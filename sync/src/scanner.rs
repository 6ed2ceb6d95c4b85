//! Local tree traversal into a snapshot using walkdir

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, SyncError};
use crate::fingerprint::{Fingerprinter, HashAlgorithm};
use crate::snapshot::{Entry, Snapshot};

/// Options for directory scanning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Follow symbolic links
    pub follow_links: bool,
    /// Hash algorithm used for file fingerprints
    pub hash_algorithm: HashAlgorithm,
    /// Read buffer size used while hashing
    pub buffer_size: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            hash_algorithm: HashAlgorithm::Blake3,
            buffer_size: 64 * 1024,
        }
    }
}

/// Produces the current-local snapshot of a directory
pub struct DirectoryScanner {
    options: ScanOptions,
    fingerprinter: Fingerprinter,
}

impl DirectoryScanner {
    pub fn new(options: ScanOptions) -> Self {
        let fingerprinter = Fingerprinter::with_buffer_size(options.hash_algorithm, options.buffer_size);
        Self {
            options,
            fingerprinter,
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scan a directory; the root itself is not part of the snapshot
    pub async fn scan<P: AsRef<Path>>(&self, root_path: P) -> Result<Snapshot> {
        let root_path = root_path.as_ref();

        if !root_path.exists() {
            return Err(SyncError::path_error(root_path, "Directory does not exist"));
        }

        if !root_path.is_dir() {
            return Err(SyncError::path_error(root_path, "Path is not a directory"));
        }

        let walker = WalkDir::new(root_path)
            .follow_links(self.options.follow_links)
            .min_depth(1);

        let mut entries = Vec::new();

        for entry in walker {
            let entry = entry.map_err(|e| {
                SyncError::scan_error(root_path, format!("Walk error: {}", e))
            })?;

            let path = entry.path();
            let relative = relative_path(path, root_path)?;
            let file_type = entry.file_type();

            if file_type.is_dir() {
                entries.push(Entry::directory(relative));
            } else if file_type.is_file() {
                let fingerprint = self.fingerprinter.fingerprint(path).await?;
                entries.push(Entry::file(relative, fingerprint));
            } else {
                debug!("Skipping {} (not a regular file or directory)", path.display());
            }
        }

        Ok(Snapshot::from_entries(entries))
    }
}

/// Slash-separated path of `path` relative to `root`
fn relative_path(path: &Path, root: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|e| {
        SyncError::path_error(path, format!("Failed to create relative path: {}", e))
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        let Component::Normal(name) = component else {
            return Err(SyncError::path_error(path, "Unexpected path component"));
        };
        let name = name
            .to_str()
            .ok_or_else(|| SyncError::path_error(path, "File name is not valid UTF-8"))?;
        if name.contains('\n') || name.contains('\r') {
            return Err(SyncError::path_error(path, "File name contains a line break"));
        }
        parts.push(name);
    }

    Ok(parts.join("/"))
}
