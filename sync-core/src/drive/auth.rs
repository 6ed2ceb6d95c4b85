use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::types::TokenResponse;
use crate::error::{RemoteError, Result};

/// Authentication material read from the credentials file
#[derive(Clone)]
pub enum Credentials {
    /// OAuth client credentials with a long-lived refresh token
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    /// A pre-issued access token, used as-is
    AccessToken(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::AuthorizedUser { client_id, .. } => f
                .debug_struct("AuthorizedUser")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            Credentials::AccessToken(_) => f.write_str("AccessToken(..)"),
        }
    }
}

#[derive(Deserialize)]
struct CredentialsFile {
    #[serde(rename = "type")]
    kind: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    access_token: Option<String>,
}

impl Credentials {
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RemoteError::credentials(path, e.to_string()))?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let file: CredentialsFile = serde_json::from_str(content)
            .map_err(|e| RemoteError::credentials(path, e.to_string()))?;

        match file.kind.as_deref() {
            Some("service_account") => Err(RemoteError::credentials(
                path,
                "service account keys are not supported, use authorized_user credentials or an access token",
            )),
            Some("authorized_user") | None if file.refresh_token.is_some() => {
                let missing = |field: &str| RemoteError::credentials(path, format!("missing field '{}'", field));
                Ok(Credentials::AuthorizedUser {
                    client_id: file.client_id.ok_or_else(|| missing("client_id"))?,
                    client_secret: file.client_secret.ok_or_else(|| missing("client_secret"))?,
                    refresh_token: file.refresh_token.ok_or_else(|| missing("refresh_token"))?,
                })
            }
            Some("authorized_user") => Err(RemoteError::credentials(path, "missing field 'refresh_token'")),
            _ => match file.access_token {
                Some(token) => Ok(Credentials::AccessToken(token)),
                None => Err(RemoteError::credentials(
                    path,
                    "expected authorized_user credentials or an access_token",
                )),
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }

    pub fn needs_refresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                // Refresh if token expires within 5 minutes
                let refresh_threshold = expires_at - Duration::minutes(5);
                Utc::now() >= refresh_threshold
            }
            None => false,
        }
    }

    pub fn set_token(&mut self, token: TokenResponse) {
        self.expires_at = token.expires_at();
        self.token = Some(token.access_token);
    }

    pub fn clear(&mut self) {
        self.token = None;
        self.expires_at = None;
    }
}

pub struct AuthManager {
    client: reqwest::Client,
    token_url: String,
    credentials: Credentials,
    state: Arc<RwLock<AuthState>>,
}

impl AuthManager {
    pub fn new(client: reqwest::Client, token_url: String, credentials: Credentials) -> Self {
        let mut state = AuthState::new();
        if let Credentials::AccessToken(token) = &credentials {
            state.token = Some(token.clone());
        }

        Self {
            client,
            token_url,
            credentials,
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn refresh_token(&self) -> Result<String> {
        let (client_id, client_secret, refresh_token) = match &self.credentials {
            Credentials::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            } => (client_id, client_secret, refresh_token),
            Credentials::AccessToken(token) => return Ok(token.clone()),
        };

        debug!("Refreshing access token");

        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];

        let response = self.client.post(&self.token_url).form(&form).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("Token refresh failed: {}", error_text);
            return Err(RemoteError::Authentication(error_text));
        }

        let token: TokenResponse = response.json().await?;
        let access_token = token.access_token.clone();

        {
            let mut state = self.state.write().await;
            state.set_token(token);
        }

        debug!("Token refresh successful");
        Ok(access_token)
    }

    pub async fn get_valid_token(&self) -> Result<String> {
        {
            let state = self.state.read().await;
            if let Some(token) = &state.token {
                if !state.is_expired() && !state.needs_refresh() {
                    return Ok(token.clone());
                }
            }
        }

        self.refresh_token().await
    }

    /// Forget the cached token so the next request fetches a fresh one
    pub async fn invalidate(&self) {
        if let Credentials::AuthorizedUser { .. } = self.credentials {
            self.state.write().await.clear();
        }
    }

    pub fn auth_state(&self) -> Arc<RwLock<AuthState>> {
        self.state.clone()
    }
}
