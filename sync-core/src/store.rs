//! The hierarchical remote store contract

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Provider-assigned identifier of a remote file or folder
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RemoteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One child returned by a folder listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: RemoteId,
    pub name: String,
    pub is_directory: bool,
}

/// A remote store whose native API only knows about folders and their direct children.
///
/// Path addressing is layered on top of this by the sync engine. Every mutating
/// call may fail and is never retried by an implementation.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Identifier of the top-level folder of the store
    fn root_id(&self) -> RemoteId;

    /// List the direct children of a folder
    async fn list_children(&self, folder: &RemoteId) -> Result<Vec<RemoteItem>>;

    /// Create a folder named `name` inside `parent` and return its identifier
    async fn create_directory(&self, name: &str, parent: &RemoteId) -> Result<RemoteId>;

    /// Create a new file named `name` inside `parent` with the content of `local_path`
    async fn upload(&self, name: &str, parent: &RemoteId, local_path: &Path) -> Result<RemoteId>;

    /// Write the content of a remote file to `destination`
    async fn download(&self, id: &RemoteId, destination: &Path) -> Result<()>;

    /// Delete a file, or a folder together with everything below it
    async fn delete(&self, id: &RemoteId) -> Result<()>;

    /// Give `principal` write access to a file or folder
    async fn grant_access(&self, id: &RemoteId, principal: &str) -> Result<()>;
}
