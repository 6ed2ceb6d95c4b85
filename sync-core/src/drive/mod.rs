//! Google Drive v3 remote store
//!
//! Folder listing, folder creation, multipart upload, media download,
//! deletion and permission grants over the Drive REST API, with OAuth
//! token refresh and retries for read-only requests.

pub mod auth;
pub mod client;
pub mod types;

pub use auth::{AuthManager, AuthState, Credentials};
pub use client::{DriveClient, DriveClientBuilder};
pub use types::*;

#[cfg(test)]
mod client_tests;
