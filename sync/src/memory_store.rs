//! In-memory remote store used by the engine tests

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use drivesync_core::{RemoteError, RemoteId, RemoteItem, RemoteStore};

const ROOT: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    CreateDirectory,
    Upload,
    Download,
    Delete,
    Grant,
}

#[derive(Debug, Clone)]
struct MemoryNode {
    name: String,
    parent: String,
    is_directory: bool,
    content: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<String, MemoryNode>,
    next_id: u64,
    calls: Vec<String>,
    list_calls: usize,
    failures: HashSet<(StoreOp, String)>,
    grants: Vec<(String, String)>,
}

impl Inner {
    fn path_of(&self, id: &str) -> String {
        let mut names = Vec::new();
        let mut current = id;
        while let Some(node) = self.nodes.get(current) {
            names.push(node.name.as_str());
            current = &node.parent;
        }
        names.reverse();
        names.join("/")
    }

    fn find(&self, path: &str) -> Option<String> {
        let mut current = ROOT.to_string();
        for name in path.split('/') {
            current = self
                .nodes
                .iter()
                .find(|(_, node)| node.parent == current && node.name == name)
                .map(|(id, _)| id.clone())?;
        }
        Some(current)
    }

    fn insert(&mut self, name: &str, parent: &str, is_directory: bool, content: Vec<u8>) -> String {
        self.next_id += 1;
        let id = format!("n{}", self.next_id);
        self.nodes.insert(
            id.clone(),
            MemoryNode {
                name: name.to_string(),
                parent: parent.to_string(),
                is_directory,
                content,
            },
        );
        id
    }

    fn remove_recursive(&mut self, id: &str) {
        let children: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.parent == id)
            .map(|(child, _)| child.clone())
            .collect();
        for child in children {
            self.remove_recursive(&child);
        }
        self.nodes.remove(id);
    }

    fn check(&self, op: StoreOp, name: &str) -> Result<(), RemoteError> {
        if self.failures.contains(&(op, name.to_string())) {
            return Err(RemoteError::Server {
                status: 500,
                message: format!("injected {:?} failure for {}", op, name),
            });
        }
        Ok(())
    }

    fn exists(&self, id: &str) -> bool {
        id == ROOT || self.nodes.contains_key(id)
    }
}

/// Remote store double with a call log and failure injection
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn parent_for(inner: &Inner, path: &str) -> String {
        match path.rsplit_once('/') {
            Some((parent, _)) => inner.find(parent).expect("parent directory must exist"),
            None => ROOT.to_string(),
        }
    }

    pub fn add_directory(&self, path: &str) {
        let mut inner = self.inner.lock().unwrap();
        let parent = Self::parent_for(&inner, path);
        let name = path.rsplit('/').next().unwrap();
        inner.insert(name, &parent, true, Vec::new());
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let parent = Self::parent_for(&inner, path);
        let name = path.rsplit('/').next().unwrap();
        inner.insert(name, &parent, false, content.to_vec());
    }

    /// Remove a path without going through the store API
    pub fn remove_path(&self, path: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner.find(path) {
            inner.remove_recursive(&id);
        }
    }

    pub fn fail_on(&self, op: StoreOp, name: &str) {
        self.inner.lock().unwrap().failures.insert((op, name.to_string()));
    }

    pub fn clear_failures(&self) {
        self.inner.lock().unwrap().failures.clear();
    }

    /// Mutating calls as "<op> <path>", in issue order
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn list_calls(&self) -> usize {
        self.inner.lock().unwrap().list_calls
    }

    pub fn grants(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().grants.clone()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.inner.lock().unwrap().find(path).is_some()
    }

    pub fn is_directory(&self, path: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .find(path)
            .and_then(|id| inner.nodes.get(&id).map(|node| node.is_directory))
            .unwrap_or(false)
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        let id = inner.find(path)?;
        inner.nodes.get(&id).map(|node| node.content.clone())
    }

    /// Every stored path, sorted
    pub fn paths(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut paths: Vec<String> = inner.nodes.keys().map(|id| inner.path_of(id)).collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn root_id(&self) -> RemoteId {
        RemoteId::new(ROOT)
    }

    async fn list_children(&self, folder: &RemoteId) -> Result<Vec<RemoteItem>, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.list_calls += 1;
        let name = inner.path_of(folder.as_str());
        inner.check(StoreOp::List, &name)?;
        if !inner.exists(folder.as_str()) {
            return Err(RemoteError::NotFound(folder.to_string()));
        }

        Ok(inner
            .nodes
            .iter()
            .filter(|(_, node)| node.parent == folder.as_str())
            .map(|(id, node)| RemoteItem {
                id: RemoteId::new(id.clone()),
                name: node.name.clone(),
                is_directory: node.is_directory,
            })
            .collect())
    }

    async fn create_directory(&self, name: &str, parent: &RemoteId) -> Result<RemoteId, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.check(StoreOp::CreateDirectory, name)?;
        if !inner.exists(parent.as_str()) {
            return Err(RemoteError::NotFound(parent.to_string()));
        }

        let id = inner.insert(name, parent.as_str(), true, Vec::new());
        let path = inner.path_of(&id);
        inner.calls.push(format!("mkdir {}", path));
        Ok(RemoteId::new(id))
    }

    async fn upload(&self, name: &str, parent: &RemoteId, local_path: &Path) -> Result<RemoteId, RemoteError> {
        let content = tokio::fs::read(local_path).await?;

        let mut inner = self.inner.lock().unwrap();
        inner.check(StoreOp::Upload, name)?;
        if !inner.exists(parent.as_str()) {
            return Err(RemoteError::NotFound(parent.to_string()));
        }

        let id = inner.insert(name, parent.as_str(), false, content);
        let path = inner.path_of(&id);
        inner.calls.push(format!("upload {}", path));
        Ok(RemoteId::new(id))
    }

    async fn download(&self, id: &RemoteId, destination: &Path) -> Result<(), RemoteError> {
        let content = {
            let inner = self.inner.lock().unwrap();
            let node = inner
                .nodes
                .get(id.as_str())
                .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
            inner.check(StoreOp::Download, &node.name)?;
            node.content.clone()
        };

        tokio::fs::write(destination, content).await?;
        Ok(())
    }

    async fn delete(&self, id: &RemoteId) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(node) = inner.nodes.get(id.as_str()) else {
            return Err(RemoteError::NotFound(id.to_string()));
        };
        inner.check(StoreOp::Delete, &node.name.clone())?;

        let path = inner.path_of(id.as_str());
        inner.remove_recursive(id.as_str());
        inner.calls.push(format!("delete {}", path));
        Ok(())
    }

    async fn grant_access(&self, id: &RemoteId, principal: &str) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.check(StoreOp::Grant, principal)?;
        let path = inner.path_of(id.as_str());
        inner.grants.push((path, principal.to_string()));
        Ok(())
    }
}
