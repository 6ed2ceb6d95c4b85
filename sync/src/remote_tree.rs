//! Lazily explored in-memory mirror of a remote store
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. A directory's
//! children are listed from the store the first time they are needed and
//! kept in sync with every mutation made through the tree afterwards, so
//! no directory is listed twice unless it is explicitly invalidated.

use std::path::Path;
use std::sync::Arc;

use drivesync_core::{RemoteId, RemoteStore};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::snapshot::EntryKind;

/// Handle of a node inside a [`RemoteTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum Children {
    Unexplored,
    Explored(Vec<NodeId>),
}

#[derive(Debug, Clone)]
struct RemoteNode {
    remote_id: RemoteId,
    name: String,
    kind: EntryKind,
    parent: Option<NodeId>,
    children: Children,
}

/// Result of a path walk: the containing directory and the node itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeepLookup {
    pub parent: Option<NodeId>,
    pub node: Option<NodeId>,
}

impl DeepLookup {
    const NOT_FOUND: DeepLookup = DeepLookup {
        parent: None,
        node: None,
    };
}

/// Outcome of a remote removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Deleted,
    AlreadyAbsent,
}

pub struct RemoteTree {
    store: Arc<dyn RemoteStore>,
    nodes: Vec<RemoteNode>,
    root: NodeId,
}

impl RemoteTree {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        let root = RemoteNode {
            remote_id: store.root_id(),
            name: String::new(),
            kind: EntryKind::Directory,
            parent: None,
            children: Children::Unexplored,
        };

        Self {
            store,
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> &RemoteNode {
        &self.nodes[id.0]
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.node(id).name
    }

    pub fn remote_id(&self, id: NodeId) -> &RemoteId {
        &self.node(id).remote_id
    }

    pub fn kind(&self, id: NodeId) -> EntryKind {
        self.node(id).kind
    }

    pub fn is_directory(&self, id: NodeId) -> bool {
        self.node(id).kind == EntryKind::Directory
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn is_explored(&self, id: NodeId) -> bool {
        matches!(self.node(id).children, Children::Explored(_))
    }

    /// Slash-separated path of a node below the store root
    pub fn path(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id);
            if node.parent.is_some() {
                names.push(node.name.as_str());
            }
            current = node.parent;
        }
        names.reverse();
        names.join("/")
    }

    fn child_path(&self, parent: NodeId, name: &str) -> String {
        let parent_path = self.path(parent);
        if parent_path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", parent_path, name)
        }
    }

    fn insert_child(&mut self, parent: NodeId, remote_id: RemoteId, name: &str, kind: EntryKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(RemoteNode {
            remote_id,
            name: name.to_string(),
            kind,
            parent: Some(parent),
            children: Children::Unexplored,
        });

        if let Children::Explored(children) = &mut self.nodes[parent.0].children {
            children.push(id);
        }
        id
    }

    fn unlink(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent {
            if let Children::Explored(children) = &mut self.nodes[parent.0].children {
                children.retain(|child| *child != id);
            }
        }
    }

    /// List a directory's children from the store unless already done
    pub async fn explore(&mut self, id: NodeId) -> Result<()> {
        if self.is_explored(id) {
            return Ok(());
        }
        if !self.is_directory(id) {
            return Err(SyncError::not_a_directory(self.path(id)));
        }

        let remote_id = self.node(id).remote_id.clone();
        let items = self
            .store
            .list_children(&remote_id)
            .await
            .map_err(|e| SyncError::remote_error(self.path(id), e))?;

        self.nodes[id.0].children = Children::Explored(Vec::with_capacity(items.len()));
        for item in items {
            let kind = if item.is_directory {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            self.insert_child(id, item.id, &item.name, kind);
        }

        debug!("Explored '{}', got {} children", self.path(id), self.children_of(id).len());
        Ok(())
    }

    fn children_of(&self, id: NodeId) -> &[NodeId] {
        match &self.node(id).children {
            Children::Explored(children) => children,
            Children::Unexplored => &[],
        }
    }

    /// Children of a directory, exploring it first if needed
    pub async fn children(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        self.explore(id).await?;
        Ok(self.children_of(id).to_vec())
    }

    /// Child named `name`, exploring the directory first if needed
    pub async fn get_child(&mut self, id: NodeId, name: &str) -> Result<Option<NodeId>> {
        self.explore(id).await?;
        Ok(self
            .children_of(id)
            .iter()
            .copied()
            .find(|child| self.node(*child).name == name))
    }

    /// Walk a slash-separated `path` starting at `from`.
    ///
    /// A missing intermediate directory is created when `create_missing` is
    /// set, otherwise the walk stops and both halves of the result are
    /// `None`. The final component is looked up but never created.
    pub async fn get_deep(&mut self, from: NodeId, path: &str, create_missing: bool) -> Result<DeepLookup> {
        let components: Vec<&str> = path.split('/').collect();
        let Some((last, intermediate)) = components.split_last() else {
            return Err(SyncError::path_error(path, "Empty remote path"));
        };
        if last.is_empty() {
            return Err(SyncError::path_error(path, "Empty remote path"));
        }

        let mut current = from;
        for part in intermediate {
            current = match self.get_child(current, part).await? {
                Some(child) => child,
                None if create_missing => self.mkdir(current, part).await?,
                None => return Ok(DeepLookup::NOT_FOUND),
            };
        }

        let node = self.get_child(current, last).await?;
        Ok(DeepLookup {
            parent: Some(current),
            node,
        })
    }

    /// Existing directory `name` under `parent`, or a newly created one
    pub async fn mkdir(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        if let Some(existing) = self.get_child(parent, name).await? {
            if self.is_directory(existing) {
                return Ok(existing);
            }
            return Err(SyncError::conflict_error(
                self.path(existing),
                "a file exists where a directory is expected",
            ));
        }

        let parent_id = self.node(parent).remote_id.clone();
        let remote_id = self
            .store
            .create_directory(name, &parent_id)
            .await
            .map_err(|e| SyncError::remote_error(self.child_path(parent, name), e))?;

        Ok(self.insert_child(parent, remote_id, name, EntryKind::Directory))
    }

    /// Delete a node remotely and drop it from its parent's children.
    ///
    /// A node the store no longer knows about counts as already absent.
    pub async fn remove(&mut self, id: NodeId) -> Result<Removal> {
        let remote_id = self.node(id).remote_id.clone();

        let outcome = match self.store.delete(&remote_id).await {
            Ok(()) => Removal::Deleted,
            Err(e) if e.is_not_found() => Removal::AlreadyAbsent,
            Err(e) => return Err(SyncError::remote_error(self.path(id), e)),
        };

        self.unlink(id);
        Ok(outcome)
    }

    /// Store `local_path` as `name` under `parent`, replacing any existing child of that name
    pub async fn upload(&mut self, parent: NodeId, name: &str, local_path: &Path) -> Result<NodeId> {
        if !self.is_directory(parent) {
            return Err(SyncError::not_a_directory(self.path(parent)));
        }

        if let Some(existing) = self.get_child(parent, name).await? {
            self.remove(existing).await?;
        }

        let parent_id = self.node(parent).remote_id.clone();
        let remote_id = self
            .store
            .upload(name, &parent_id, local_path)
            .await
            .map_err(|e| SyncError::remote_error(self.child_path(parent, name), e))?;

        Ok(self.insert_child(parent, remote_id, name, EntryKind::File))
    }

    /// Write a remote file's content to `destination`
    pub async fn download(&self, id: NodeId, destination: &Path) -> Result<()> {
        if self.is_directory(id) {
            return Err(SyncError::conflict_error(
                self.path(id),
                "a directory exists where a file is expected",
            ));
        }

        self.store
            .download(&self.node(id).remote_id, destination)
            .await
            .map_err(|e| SyncError::remote_error(self.path(id), e))
    }

    /// Give `principal` access to a node
    pub async fn grant_access(&self, id: NodeId, principal: &str) -> Result<()> {
        self.store
            .grant_access(&self.node(id).remote_id, principal)
            .await
            .map_err(|e| SyncError::remote_error(self.path(id), e))
    }

    /// Forget a directory's cached children so the next lookup lists it again
    pub fn invalidate(&mut self, id: NodeId) {
        self.nodes[id.0].children = Children::Unexplored;
    }
}
