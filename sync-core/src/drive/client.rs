use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{ClientBuilder, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::auth::{AuthManager, Credentials};
use super::types::*;
use crate::error::{RemoteError, Result};
use crate::store::{RemoteId, RemoteItem, RemoteStore};

/// Google Drive v3 REST client
pub struct DriveClient {
    http_client: reqwest::Client,
    api_url: String,
    upload_url: String,
    auth: Arc<AuthManager>,
    retry_max_elapsed: Duration,
}

impl DriveClient {
    /// Create a client against the public Drive endpoints
    pub fn new(credentials: Credentials) -> Result<Self> {
        DriveClientBuilder::new(credentials).build()
    }

    /// Create a client from a JSON credentials file
    pub async fn from_credentials_file(path: &Path) -> Result<Self> {
        let credentials = Credentials::from_file(path).await?;
        Self::new(credentials)
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Fetch one page of a folder listing
    pub async fn list_page(&self, params: &ListParams) -> Result<FileList> {
        let url = format!("{}/files", self.api_url);
        let query = serde_urlencoded::to_string(params)
            .map_err(|e| RemoteError::Unknown(format!("Failed to encode list parameters: {}", e)))?;

        let operation = || async {
            let request = self.authorized(self.http_client.get(format!("{}?{}", url, query))).await?;
            let response = request.send().await?;
            self.handle_response(response, "files").await
        };

        self.retry_operation(operation).await
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.auth.get_valid_token().await?;
        Ok(request.bearer_auth(token))
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response, context: &str) -> Result<T> {
        let response = self.check_status(response, context).await?;
        let content: T = response.json().await?;
        Ok(content)
    }

    async fn check_status(&self, response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        if response.status() == StatusCode::UNAUTHORIZED {
            self.auth.invalidate().await;
        }

        Err(self.parse_error_response(response, context).await)
    }

    async fn parse_error_response(&self, response: reqwest::Response, context: &str) -> RemoteError {
        let status = response.status();

        match status {
            StatusCode::NOT_FOUND => RemoteError::NotFound(context.to_string()),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());

                RemoteError::RateLimit { retry_after }
            }
            _ => {
                let error_text = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ErrorResponse>(&error_text)
                    .map(|e| e.error.message)
                    .unwrap_or(error_text);

                match status {
                    StatusCode::UNAUTHORIZED => RemoteError::Authentication(message),
                    StatusCode::FORBIDDEN => RemoteError::Authorization(message),
                    status if status.is_client_error() || status.is_server_error() => RemoteError::Server {
                        status: status.as_u16(),
                        message,
                    },
                    _ => RemoteError::Unknown(message),
                }
            }
        }
    }

    async fn retry_operation<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            max_elapsed_time: Some(self.retry_max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            match operation().await {
                Ok(result) => Ok(result),
                Err(error) => {
                    if let Some(seconds) = error.retry_after() {
                        warn!("Rate limited, retrying in {}s", seconds);
                        Err(backoff::Error::retry_after(error, Duration::from_secs(seconds)))
                    } else if error.is_retryable() {
                        warn!("Retryable error occurred: {}", error);
                        Err(backoff::Error::transient(error))
                    } else {
                        debug!("Non-retryable error: {}", error);
                        Err(backoff::Error::permanent(error))
                    }
                }
            }
        })
        .await
    }

    async fn multipart_body(
        metadata: &FileMetadata,
        local_path: &Path,
    ) -> Result<(String, u64, reqwest::Body)> {
        let boundary = format!("drivesync-{}", Uuid::new_v4().simple());
        let metadata = serde_json::to_string(metadata)?;

        let head = format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
             --{boundary}\r\nContent-Type: application/octet-stream\r\n\r\n"
        );
        let tail = format!("\r\n--{boundary}--\r\n");

        let file = tokio::fs::File::open(local_path).await?;
        let file_len = file.metadata().await?.len();
        let content_length = head.len() as u64 + file_len + tail.len() as u64;

        let parts = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(head))])
            .chain(ReaderStream::new(file))
            .chain(stream::iter(vec![Ok(Bytes::from(tail))]));

        let content_type = format!("multipart/related; boundary={}", boundary);
        Ok((content_type, content_length, reqwest::Body::wrap_stream(parts)))
    }
}

#[async_trait]
impl RemoteStore for DriveClient {
    fn root_id(&self) -> RemoteId {
        RemoteId::new(ROOT_FOLDER_ID)
    }

    async fn list_children(&self, folder: &RemoteId) -> Result<Vec<RemoteItem>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = ListParams::children_of(folder.as_str());
            if let Some(token) = page_token.take() {
                params = params.page_token(token);
            }

            let page = self.list_page(&params).await?;
            items.extend(page.files.into_iter().map(RemoteItem::from));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Listed {} children of {}", items.len(), folder);
        Ok(items)
    }

    async fn create_directory(&self, name: &str, parent: &RemoteId) -> Result<RemoteId> {
        let url = format!("{}/files", self.api_url);
        let metadata = FileMetadata::folder(name, parent.as_str());

        let request = self
            .authorized(self.http_client.post(&url).query(&[("fields", "id")]).json(&metadata))
            .await?;
        let response = request.send().await?;
        let created: CreatedFile = self.handle_response(response, name).await?;

        debug!("Created folder {} ({})", name, created.id);
        Ok(RemoteId::new(created.id))
    }

    async fn upload(&self, name: &str, parent: &RemoteId, local_path: &Path) -> Result<RemoteId> {
        let url = format!("{}/files", self.upload_url);
        let metadata = FileMetadata::file(name, parent.as_str());
        let (content_type, content_length, body) = Self::multipart_body(&metadata, local_path).await?;

        let request = self
            .authorized(
                self.http_client
                    .post(&url)
                    .query(&[("uploadType", "multipart"), ("fields", "id")])
                    .header(CONTENT_TYPE, content_type)
                    .header(CONTENT_LENGTH, content_length)
                    .body(body),
            )
            .await?;
        let response = request.send().await?;
        let created: CreatedFile = self.handle_response(response, name).await?;

        debug!("Uploaded {} as {}", local_path.display(), created.id);
        Ok(RemoteId::new(created.id))
    }

    async fn download(&self, id: &RemoteId, destination: &Path) -> Result<()> {
        let url = format!("{}/files/{}", self.api_url, id);

        let operation = || async {
            let request = self
                .authorized(self.http_client.get(&url).query(&[("alt", "media")]))
                .await?;
            let response = self.check_status(request.send().await?, id.as_str()).await?;

            let mut file = tokio::fs::File::create(destination).await?;
            let mut chunks = response.bytes_stream();
            while let Some(chunk) = chunks.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            Ok(())
        };

        self.retry_operation(operation).await
    }

    async fn delete(&self, id: &RemoteId) -> Result<()> {
        let url = format!("{}/files/{}", self.api_url, id);

        let request = self.authorized(self.http_client.delete(&url)).await?;
        let response = request.send().await?;
        self.check_status(response, id.as_str()).await?;
        Ok(())
    }

    async fn grant_access(&self, id: &RemoteId, principal: &str) -> Result<()> {
        let url = format!("{}/files/{}/permissions", self.api_url, id);

        let request = self
            .authorized(
                self.http_client
                    .post(&url)
                    .query(&[("sendNotificationEmail", "false")])
                    .json(&PermissionRequest::writer(principal)),
            )
            .await?;
        let response = request.send().await?;
        self.check_status(response, id.as_str()).await?;

        debug!("Granted write access on {} to {}", id, principal);
        Ok(())
    }
}

// Builder pattern for client configuration
pub struct DriveClientBuilder {
    credentials: Credentials,
    api_url: String,
    upload_url: String,
    token_url: String,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
    retry_max_elapsed: Duration,
}

impl DriveClientBuilder {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            api_url: DEFAULT_API_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            timeout: None,
            connect_timeout: Some(Duration::from_secs(10)),
            user_agent: None,
            retry_max_elapsed: Duration::from_secs(60),
        }
    }

    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Upper bound on the time spent retrying a read-only request
    pub fn retry_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.retry_max_elapsed = elapsed;
        self
    }

    pub fn build(self) -> Result<DriveClient> {
        let mut client_builder = ClientBuilder::new();

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        if let Some(connect_timeout) = self.connect_timeout {
            client_builder = client_builder.connect_timeout(connect_timeout);
        }

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| concat!("drivesync/", env!("CARGO_PKG_VERSION")).to_string());
        client_builder = client_builder.user_agent(user_agent);

        for base in [&self.api_url, &self.upload_url, &self.token_url] {
            Url::parse(base)?;
        }

        let http_client = client_builder.build().map_err(RemoteError::Network)?;
        let auth = Arc::new(AuthManager::new(
            http_client.clone(),
            self.token_url,
            self.credentials,
        ));

        Ok(DriveClient {
            http_client,
            api_url: self.api_url,
            upload_url: self.upload_url,
            auth,
            retry_max_elapsed: self.retry_max_elapsed,
        })
    }
}
