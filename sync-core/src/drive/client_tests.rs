use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use super::*;
use crate::error::RemoteError;
use crate::store::{RemoteId, RemoteStore};

const PAGE_SIZE: usize = 2;

#[derive(Debug, Clone)]
struct FakeFile {
    name: String,
    parent: String,
    mime_type: String,
    content: Vec<u8>,
}

#[derive(Default)]
struct FakeDrive {
    files: BTreeMap<String, FakeFile>,
    permissions: Vec<(String, Value)>,
    next_id: u32,
    list_failures: u32,
    list_rate_limits: u32,
    list_requests: u32,
    token_requests: u32,
    valid_tokens: Vec<String>,
}

type Shared = Arc<Mutex<FakeDrive>>;

impl FakeDrive {
    fn with_token(token: &str) -> Self {
        Self {
            valid_tokens: vec![token.to_string()],
            ..Default::default()
        }
    }

    fn insert(&mut self, name: &str, parent: &str, mime_type: &str, content: &[u8]) -> String {
        self.next_id += 1;
        let id = format!("id{:04}", self.next_id);
        self.files.insert(
            id.clone(),
            FakeFile {
                name: name.to_string(),
                parent: parent.to_string(),
                mime_type: mime_type.to_string(),
                content: content.to_vec(),
            },
        );
        id
    }

    fn remove_recursive(&mut self, id: &str) {
        let children: Vec<String> = self
            .files
            .iter()
            .filter(|(_, f)| f.parent == id)
            .map(|(child, _)| child.clone())
            .collect();
        for child in children {
            self.remove_recursive(&child);
        }
        self.files.remove(id);
    }

    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|token| self.valid_tokens.iter().any(|valid| valid == token))
            .unwrap_or(false)
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({"error": {"code": status.as_u16(), "message": message}})),
    )
        .into_response()
}

async fn list_files(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut drive = state.lock().unwrap();
    if !drive.is_authorized(&headers) {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid Credentials");
    }
    drive.list_requests += 1;
    if drive.list_rate_limits > 0 {
        drive.list_rate_limits -= 1;
        let mut response = error_response(StatusCode::TOO_MANY_REQUESTS, "Rate Limit Exceeded");
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, header::HeaderValue::from_static("0"));
        return response;
    }
    if drive.list_failures > 0 {
        drive.list_failures -= 1;
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Backend Error");
    }

    let q = params.get("q").cloned().unwrap_or_default();
    let Some(parent) = q
        .strip_suffix(" in parents and trashed=false")
        .and_then(|p| p.strip_prefix('\''))
        .and_then(|p| p.strip_suffix('\''))
    else {
        return error_response(StatusCode::BAD_REQUEST, "unsupported query");
    };
    if params.get("fields").map(String::as_str) != Some("nextPageToken,files(id,name,mimeType)")
        || params.get("pageSize").map(String::as_str) != Some("1000")
    {
        return error_response(StatusCode::BAD_REQUEST, "unexpected list parameters");
    }

    let children: Vec<Value> = drive
        .files
        .iter()
        .filter(|(_, f)| f.parent == parent)
        .map(|(id, f)| json!({"id": id, "name": f.name, "mimeType": f.mime_type}))
        .collect();

    let offset: usize = params
        .get("pageToken")
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);
    let end = (offset + PAGE_SIZE).min(children.len());
    let mut body = json!({ "files": children[offset..end].to_vec() });
    if end < children.len() {
        body["nextPageToken"] = json!(end.to_string());
    }
    Json(body).into_response()
}

async fn create_folder(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(metadata): Json<Value>,
) -> Response {
    let mut drive = state.lock().unwrap();
    if !drive.is_authorized(&headers) {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid Credentials");
    }

    let name = metadata["name"].as_str().unwrap_or_default().to_string();
    let parent = metadata["parents"][0].as_str().unwrap_or_default().to_string();
    let mime_type = metadata["mimeType"].as_str().unwrap_or_default().to_string();
    if parent != "root" && !drive.files.contains_key(&parent) {
        return error_response(StatusCode::NOT_FOUND, "File not found");
    }

    let id = drive.insert(&name, &parent, &mime_type, b"");
    Json(json!({ "id": id })).into_response()
}

fn part_body(part: &str) -> Option<&str> {
    part.split_once("\r\n\r\n")
        .and_then(|(_, body)| body.strip_suffix("\r\n"))
}

async fn upload_file(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let mut drive = state.lock().unwrap();
    if !drive.is_authorized(&headers) {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid Credentials");
    }
    if params.get("uploadType").map(String::as_str) != Some("multipart") {
        return error_response(StatusCode::BAD_REQUEST, "expected multipart upload");
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let Some(boundary) = content_type.strip_prefix("multipart/related; boundary=") else {
        return error_response(StatusCode::BAD_REQUEST, "missing boundary");
    };

    let text = String::from_utf8_lossy(&body).to_string();
    let delimiter = format!("--{}", boundary);
    let parts: Vec<&str> = text.split(delimiter.as_str()).collect();
    if parts.len() != 4 || parts[3] != "--\r\n" {
        return error_response(StatusCode::BAD_REQUEST, "malformed multipart body");
    }
    let (Some(metadata), Some(content)) = (part_body(parts[1]), part_body(parts[2])) else {
        return error_response(StatusCode::BAD_REQUEST, "malformed part");
    };
    let Ok(metadata) = serde_json::from_str::<Value>(metadata) else {
        return error_response(StatusCode::BAD_REQUEST, "malformed metadata");
    };

    let name = metadata["name"].as_str().unwrap_or_default().to_string();
    let parent = metadata["parents"][0].as_str().unwrap_or_default().to_string();
    let id = drive.insert(&name, &parent, "application/octet-stream", content.as_bytes());
    Json(json!({ "id": id })).into_response()
}

async fn download_file(
    State(state): State<Shared>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let drive = state.lock().unwrap();
    if !drive.is_authorized(&headers) {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid Credentials");
    }
    if params.get("alt").map(String::as_str) != Some("media") {
        return error_response(StatusCode::BAD_REQUEST, "expected alt=media");
    }

    match drive.files.get(&id) {
        Some(file) => (StatusCode::OK, file.content.clone()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "File not found"),
    }
}

async fn delete_file(State(state): State<Shared>, headers: HeaderMap, UrlPath(id): UrlPath<String>) -> Response {
    let mut drive = state.lock().unwrap();
    if !drive.is_authorized(&headers) {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid Credentials");
    }
    if !drive.files.contains_key(&id) {
        return error_response(StatusCode::NOT_FOUND, "File not found");
    }

    drive.remove_recursive(&id);
    StatusCode::NO_CONTENT.into_response()
}

async fn create_permission(
    State(state): State<Shared>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(permission): Json<Value>,
) -> Response {
    let mut drive = state.lock().unwrap();
    if !drive.is_authorized(&headers) {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid Credentials");
    }
    if params.get("sendNotificationEmail").map(String::as_str) != Some("false") {
        return error_response(StatusCode::BAD_REQUEST, "notification expected to be disabled");
    }
    if !drive.files.contains_key(&id) {
        return error_response(StatusCode::NOT_FOUND, "File not found");
    }

    drive.permissions.push((id, permission));
    Json(json!({ "id": "perm1" })).into_response()
}

async fn issue_token(State(state): State<Shared>, Form(form): Form<HashMap<String, String>>) -> Response {
    let mut drive = state.lock().unwrap();
    if form.get("grant_type").map(String::as_str) != Some("refresh_token")
        || form.get("refresh_token").map(String::as_str) != Some("refresh-me")
    {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))).into_response();
    }

    drive.token_requests += 1;
    drive.valid_tokens.push("refreshed-token".to_string());
    Json(json!({
        "access_token": "refreshed-token",
        "expires_in": 3599,
        "token_type": "Bearer"
    }))
    .into_response()
}

async fn spawn_fake_drive(drive: FakeDrive) -> (SocketAddr, Shared) {
    let state = Arc::new(Mutex::new(drive));
    let app = Router::new()
        .route("/drive/v3/files", get(list_files).post(create_folder))
        .route("/drive/v3/files/:id", get(download_file).delete(delete_file))
        .route("/drive/v3/files/:id/permissions", post(create_permission))
        .route("/upload/drive/v3/files", post(upload_file))
        .route("/token", post(issue_token))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

fn client_for(addr: SocketAddr, credentials: Credentials) -> DriveClient {
    DriveClientBuilder::new(credentials)
        .api_url(format!("http://{}/drive/v3", addr))
        .upload_url(format!("http://{}/upload/drive/v3", addr))
        .token_url(format!("http://{}/token", addr))
        .timeout(Duration::from_secs(10))
        .retry_max_elapsed(Duration::from_secs(5))
        .build()
        .unwrap()
}

fn static_token() -> Credentials {
    Credentials::AccessToken("test-token".to_string())
}

#[tokio::test]
async fn test_list_children_follows_pagination() {
    let mut drive = FakeDrive::with_token("test-token");
    let docs = drive.insert("docs", "root", FOLDER_MIME_TYPE, b"");
    drive.insert("a.txt", "root", "text/plain", b"a");
    drive.insert("b.txt", "root", "text/plain", b"b");
    drive.insert("c.txt", "root", "text/plain", b"c");
    drive.insert("nested.txt", &docs, "text/plain", b"n");
    let (addr, state) = spawn_fake_drive(drive).await;

    let client = client_for(addr, static_token());
    let children = client.list_children(&client.root_id()).await.unwrap();

    let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["docs", "a.txt", "b.txt", "c.txt"]);
    assert!(children[0].is_directory);
    assert!(!children[1].is_directory);
    assert_eq!(state.lock().unwrap().list_requests, 2);

    let nested = client.list_children(&RemoteId::new(docs)).await.unwrap();
    assert_eq!(nested.len(), 1);
    assert_eq!(nested[0].name, "nested.txt");
}

#[tokio::test]
async fn test_create_directory() {
    let (addr, state) = spawn_fake_drive(FakeDrive::with_token("test-token")).await;
    let client = client_for(addr, static_token());

    let id = client.create_directory("backup", &client.root_id()).await.unwrap();

    let drive = state.lock().unwrap();
    let folder = drive.files.get(id.as_str()).unwrap();
    assert_eq!(folder.name, "backup");
    assert_eq!(folder.parent, "root");
    assert_eq!(folder.mime_type, FOLDER_MIME_TYPE);
}

#[tokio::test]
async fn test_upload_sends_metadata_and_content() {
    let mut drive = FakeDrive::with_token("test-token");
    let folder = drive.insert("backup", "root", FOLDER_MIME_TYPE, b"");
    let (addr, state) = spawn_fake_drive(drive).await;
    let client = client_for(addr, static_token());

    let temp = TempDir::new().unwrap();
    let local = temp.path().join("notes.txt");
    std::fs::write(&local, "hello drive\nsecond line").unwrap();

    let id = client
        .upload("notes.txt", &RemoteId::new(folder.clone()), &local)
        .await
        .unwrap();

    let drive = state.lock().unwrap();
    let uploaded = drive.files.get(id.as_str()).unwrap();
    assert_eq!(uploaded.name, "notes.txt");
    assert_eq!(uploaded.parent, folder);
    assert_eq!(uploaded.content, b"hello drive\nsecond line");
}

#[tokio::test]
async fn test_download_writes_destination() {
    let mut drive = FakeDrive::with_token("test-token");
    let id = drive.insert("data.bin", "root", "application/octet-stream", b"remote content");
    let (addr, _state) = spawn_fake_drive(drive).await;
    let client = client_for(addr, static_token());

    let temp = TempDir::new().unwrap();
    let destination = temp.path().join("data.bin");
    client.download(&RemoteId::new(id), &destination).await.unwrap();

    assert_eq!(std::fs::read(&destination).unwrap(), b"remote content");
}

#[tokio::test]
async fn test_delete_folder_and_missing_id() {
    let mut drive = FakeDrive::with_token("test-token");
    let folder = drive.insert("old", "root", FOLDER_MIME_TYPE, b"");
    drive.insert("f.txt", &folder, "text/plain", b"f");
    let (addr, state) = spawn_fake_drive(drive).await;
    let client = client_for(addr, static_token());

    client.delete(&RemoteId::new(folder.clone())).await.unwrap();
    assert!(state.lock().unwrap().files.is_empty());

    let err = client.delete(&RemoteId::new(folder)).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_grant_access_creates_writer_permission() {
    let mut drive = FakeDrive::with_token("test-token");
    let folder = drive.insert("shared", "root", FOLDER_MIME_TYPE, b"");
    let (addr, state) = spawn_fake_drive(drive).await;
    let client = client_for(addr, static_token());

    client
        .grant_access(&RemoteId::new(folder.clone()), "friend@example.com")
        .await
        .unwrap();

    let drive = state.lock().unwrap();
    assert_eq!(drive.permissions.len(), 1);
    let (id, permission) = &drive.permissions[0];
    assert_eq!(id, &folder);
    assert_eq!(permission["type"], "user");
    assert_eq!(permission["role"], "writer");
    assert_eq!(permission["emailAddress"], "friend@example.com");
}

#[tokio::test]
async fn test_listing_retries_transient_failures() {
    let mut drive = FakeDrive::with_token("test-token");
    drive.insert("a.txt", "root", "text/plain", b"a");
    drive.list_failures = 2;
    let (addr, state) = spawn_fake_drive(drive).await;
    let client = client_for(addr, static_token());

    let children = client.list_children(&client.root_id()).await.unwrap();

    assert_eq!(children.len(), 1);
    assert_eq!(state.lock().unwrap().list_requests, 3);
}

#[tokio::test]
async fn test_listing_waits_out_rate_limits() {
    let mut drive = FakeDrive::with_token("test-token");
    drive.insert("a.txt", "root", "text/plain", b"a");
    drive.list_rate_limits = 1;
    let (addr, state) = spawn_fake_drive(drive).await;
    let client = client_for(addr, static_token());

    let children = client.list_children(&client.root_id()).await.unwrap();

    assert_eq!(children.len(), 1);
    assert_eq!(state.lock().unwrap().list_requests, 2);
}

#[test]
fn test_builder_rejects_invalid_base_url() {
    let result = DriveClientBuilder::new(static_token()).api_url("not a url").build();
    assert!(matches!(result, Err(RemoteError::InvalidUrl(_))));
}

#[tokio::test]
async fn test_rejected_token_is_authentication_error() {
    let (addr, _state) = spawn_fake_drive(FakeDrive::with_token("test-token")).await;
    let client = client_for(addr, Credentials::AccessToken("stale".to_string()));

    let err = client.list_children(&client.root_id()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Authentication(ref m) if m == "Invalid Credentials"));
}

#[tokio::test]
async fn test_authorized_user_refreshes_once() {
    let mut drive = FakeDrive::default();
    drive.insert("a.txt", "root", "text/plain", b"a");
    let (addr, state) = spawn_fake_drive(drive).await;

    let credentials = Credentials::AuthorizedUser {
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        refresh_token: "refresh-me".to_string(),
    };
    let client = client_for(addr, credentials);

    client.list_children(&client.root_id()).await.unwrap();
    client.list_children(&client.root_id()).await.unwrap();

    assert_eq!(state.lock().unwrap().token_requests, 1);
}

#[test]
fn test_children_query_escapes_quotes() {
    let params = ListParams::children_of("it's");
    assert_eq!(params.q.as_deref(), Some("'it\\'s' in parents and trashed=false"));
    assert_eq!(params.page_size, Some(1000));
}
