//! Google OAuth token plumbing.
//!
//! Handles the authorization-code flow for connecting a Gmail account:
//! consent URL, code exchange, token refresh, and the userinfo lookup
//! that identifies which Google account was connected.

use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{NewConnection, PROVIDER_GOOGLE};
use crate::ingest::SupervisorHandle;
use crate::store::{SqliteStore, StoreError};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Scopes requested at consent. Read-only mail access plus enough
/// identity to label the connection.
const SCOPES: &str = "openid email profile https://www.googleapis.com/auth/gmail.readonly";

/// Why a user's Google connection could not produce a usable access token
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no google connection for user {0}")]
    NotConnected(Uuid),

    #[error("stored google authorization is no longer valid, reconnect the account")]
    Reauthorize,

    #[error("code exchange failed: {0}")]
    Exchange(String),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Token endpoint reply, for both code exchange and refresh
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Identity of the Google account behind a token
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// OAuth client for one registered Google application
#[derive(Clone)]
pub struct GoogleAuth {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    token_url: String,
    http: reqwest::Client,
}

impl GoogleAuth {
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            token_url: TOKEN_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Use a different token endpoint in place of Google's.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Random state parameter tying the consent redirect back to us.
    pub fn generate_state() -> String {
        let mut hasher = Sha256::new();
        hasher.update(Uuid::new_v4().as_bytes());
        hasher.update(
            Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_be_bytes(),
        );
        hex::encode(&hasher.finalize()[..16])
    }

    /// Consent URL the user opens in a browser.
    ///
    /// `access_type=offline` with `prompt=consent` makes Google issue a
    /// refresh token even for repeat authorizations.
    pub fn authorize_url(&self, state: &str) -> Result<String, ConnectionError> {
        let request = self
            .http
            .get(AUTH_URL)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", SCOPES),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ])
            .build()?;
        Ok(request.url().to_string())
    }

    /// Trade an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, ConnectionError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectionError::Exchange(format!("{status}: {body}")));
        }
        Ok(response.json().await?)
    }

    /// Get a fresh access token from a stored refresh token.
    ///
    /// Google answers 400/401 when the refresh token itself was revoked;
    /// that is a reauthorize, not a retry.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenResponse, ConnectionError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(ConnectionError::Reauthorize);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectionError::Refresh(format!("{status}: {body}")));
        }
        Ok(response.json().await?)
    }

    /// Identify the account behind an access token.
    pub async fn fetch_user_info(&self, access_token: &str) -> Result<UserInfo, ConnectionError> {
        let response = self
            .http
            .get(USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectionError::Exchange(format!(
                "userinfo {status}: {body}"
            )));
        }
        Ok(response.json().await?)
    }

    /// Finish the flow after the user pasted the authorization code:
    /// exchange it, look up the account, store the connection.
    ///
    /// If this is the user's first connection and a poll supervisor is
    /// running, polling starts right away instead of waiting for the next
    /// resync.
    pub async fn complete_authorization(
        &self,
        store: &SqliteStore,
        user_id: Uuid,
        code: &str,
        supervisor: Option<&SupervisorHandle>,
    ) -> Result<UserInfo, ConnectionError> {
        let token = self.exchange_code(code).await?;
        let info = self.fetch_user_info(&token.access_token).await?;

        let is_new = store.find_connection(user_id, PROVIDER_GOOGLE)?.is_none();
        let expires_at = token.expires_in.map(|secs| Utc::now() + Duration::seconds(secs));

        store.upsert_connection(
            user_id,
            &NewConnection {
                provider: PROVIDER_GOOGLE.to_string(),
                provider_account_id: Some(info.id.clone()),
                provider_account_email: Some(info.email.clone()),
                access_token: token.access_token,
                refresh_token: token.refresh_token,
                expires_at,
                token_type: token.token_type,
                scope: token.scope,
            },
        )?;
        info!(%user_id, email = %info.email, "google account connected");

        if is_new {
            if let Some(supervisor) = supervisor {
                if let Err(e) = supervisor.resync_now().await {
                    warn!("could not start mail polling immediately: {e}");
                }
            }
        }

        Ok(info)
    }
}
