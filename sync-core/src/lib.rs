//! Remote storage for drivesync
//!
//! This crate defines the hierarchical remote store contract the sync engine
//! works against, together with a Google Drive implementation and a
//! folder-backed implementation.

pub mod drive;
pub mod error;
pub mod folder;
pub mod store;

pub use drive::{Credentials, DriveClient, DriveClientBuilder};
pub use error::{RemoteError, Result};
pub use folder::FolderStore;
pub use store::{RemoteId, RemoteItem, RemoteStore};
