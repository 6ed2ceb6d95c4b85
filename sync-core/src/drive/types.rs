use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{RemoteId, RemoteItem};

pub const DEFAULT_API_URL: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Mime type Drive uses to mark folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Alias Drive accepts for the top-level "My Drive" folder
pub const ROOT_FOLDER_ID: &str = "root";

/// File resource, restricted to the fields requested by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

impl From<DriveFile> for RemoteItem {
    fn from(file: DriveFile) -> Self {
        let is_directory = file.is_folder();
        RemoteItem {
            id: RemoteId::new(file.id),
            name: file.name,
            is_directory,
        }
    }
}

/// One page of a `files.list` response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub files: Vec<DriveFile>,
}

/// Query parameters for `files.list`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-trashed children of `folder_id`
    pub fn children_of(folder_id: &str) -> Self {
        Self::new()
            .query(format!(
                "'{}' in parents and trashed=false",
                folder_id.replace('\'', "\\'")
            ))
            .fields("nextPageToken,files(id,name,mimeType)")
            .page_size(1000)
    }

    pub fn query(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    pub fn fields(mut self, fields: impl Into<String>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn page_token(mut self, page_token: impl Into<String>) -> Self {
        self.page_token = Some(page_token.into());
        self
    }
}

/// Metadata sent when creating a file or folder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub parents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl FileMetadata {
    pub fn file(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parents: vec![parent.into()],
            mime_type: None,
        }
    }

    pub fn folder(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parents: vec![parent.into()],
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
        }
    }
}

/// Response of a create or upload call
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedFile {
    pub id: String,
}

/// Body of a `permissions.create` call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub email_address: String,
}

impl PermissionRequest {
    pub fn writer(email_address: impl Into<String>) -> Self {
        Self {
            kind: "user".to_string(),
            role: "writer".to_string(),
            email_address: email_address.into(),
        }
    }
}

/// OAuth token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_in
            .map(|seconds| Utc::now() + chrono::Duration::seconds(seconds))
    }
}

/// Error envelope returned by the Drive API
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
}
