//! Gmail REST API client.
//!
//! Pull-based: the poll supervisor asks for unread messages, the pipeline
//! ingests them, and processed messages get their UNREAD label removed so
//! they never come back.

use std::sync::Arc;

use async_trait::async_trait;
use base64::prelude::*;
use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{ProviderConnection, PROVIDER_GOOGLE};
use crate::ingest::{EmailContent, MailError, MailSource};
use crate::store::SqliteStore;

use super::oauth::{ConnectionError, GoogleAuth};

const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// How many unread messages one poll asks for
const UNREAD_PAGE_SIZE: u32 = 10;

#[derive(Debug, Error)]
pub enum GmailError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("gmail api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl From<GmailError> for MailError {
    fn from(e: GmailError) -> Self {
        match e {
            GmailError::Connection(ConnectionError::NotConnected(_)) => MailError::NotConnected,
            GmailError::Connection(ConnectionError::Reauthorize) => MailError::Reauthorize,
            other => MailError::Transient(other.to_string()),
        }
    }
}

/// Gmail client for all connected accounts; per-call user scoping
pub struct GmailClient {
    http: reqwest::Client,
    store: Arc<SqliteStore>,
    auth: GoogleAuth,
    base_url: String,
}

impl GmailClient {
    pub fn new(store: Arc<SqliteStore>, auth: GoogleAuth) -> Self {
        Self {
            http: reqwest::Client::new(),
            store,
            auth,
            base_url: GMAIL_BASE.to_string(),
        }
    }

    /// Use a different API root in place of Google's.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Connection with a currently-valid access token, refreshing first
    /// when the stored one has expired.
    async fn valid_connection(
        &self,
        user_id: Uuid,
    ) -> Result<ProviderConnection, ConnectionError> {
        let conn = self
            .store
            .find_connection(user_id, PROVIDER_GOOGLE)?
            .ok_or(ConnectionError::NotConnected(user_id))?;

        if conn.is_expired(Utc::now()) {
            return self.refresh_connection(&conn).await;
        }
        Ok(conn)
    }

    /// Refresh the access token and persist the result.
    async fn refresh_connection(
        &self,
        conn: &ProviderConnection,
    ) -> Result<ProviderConnection, ConnectionError> {
        let refresh_token = conn
            .refresh_token
            .as_deref()
            .ok_or(ConnectionError::Reauthorize)?;
        let token = self.auth.refresh_access_token(refresh_token).await?;

        let expires_at = token.expires_in.map(|secs| Utc::now() + Duration::seconds(secs));
        self.store.update_connection_tokens(
            conn.user_id,
            PROVIDER_GOOGLE,
            &token.access_token,
            token.refresh_token.as_deref(),
            expires_at,
        )?;
        debug!(user_id = %conn.user_id, "google access token refreshed");

        self.store
            .find_connection(conn.user_id, PROVIDER_GOOGLE)?
            .ok_or(ConnectionError::NotConnected(conn.user_id))
    }

    async fn fetch_unread_impl(&self, user_id: Uuid) -> Result<Vec<EmailContent>, GmailError> {
        let mut conn = self.valid_connection(user_id).await?;

        let mut response = self.list_unread(&conn.access_token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            // token died between the expiry check and the call
            conn = self.refresh_connection(&conn).await?;
            response = self.list_unread(&conn.access_token).await?;
        }
        let list: MessageList = Self::read_json(response).await?;

        let mut emails = Vec::with_capacity(list.messages.len());
        for message in list.messages {
            match self.fetch_detail(&conn.access_token, &message.id).await {
                Ok(detail) => emails.push(extract_content(detail)),
                Err(e) => warn!(message_id = %message.id, "failed to fetch message: {e}"),
            }
        }
        Ok(emails)
    }

    async fn list_unread(&self, access_token: &str) -> Result<reqwest::Response, GmailError> {
        Ok(self
            .http
            .get(format!("{}/users/me/messages", self.base_url))
            .query(&[
                ("q", "is:unread".to_string()),
                ("maxResults", UNREAD_PAGE_SIZE.to_string()),
            ])
            .bearer_auth(access_token)
            .send()
            .await?)
    }

    async fn fetch_detail(
        &self,
        access_token: &str,
        id: &str,
    ) -> Result<MessageDetail, GmailError> {
        let response = self
            .http
            .get(format!("{}/users/me/messages/{}", self.base_url, id))
            .bearer_auth(access_token)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn mark_read_impl(&self, user_id: Uuid, remote_id: &str) -> Result<(), GmailError> {
        let conn = self.valid_connection(user_id).await?;
        let response = self
            .http
            .post(format!(
                "{}/users/me/messages/{}/modify",
                self.base_url, remote_id
            ))
            .bearer_auth(&conn.access_token)
            .json(&serde_json::json!({ "removeLabelIds": ["UNREAD"] }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GmailError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// Register a Pub/Sub push channel for the user's inbox.
    pub async fn setup_watch(&self, user_id: Uuid, topic: &str) -> Result<WatchReply, GmailError> {
        let conn = self.valid_connection(user_id).await?;
        let response = self
            .http
            .post(format!("{}/users/me/watch", self.base_url))
            .bearer_auth(&conn.access_token)
            .json(&serde_json::json!({
                "topicName": topic,
                "labelIds": ["INBOX"],
                "labelFilterAction": "include",
            }))
            .send()
            .await?;
        Self::read_json(response).await
    }

    /// Check status then parse, folding API rejections into one error shape.
    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GmailError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GmailError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MailSource for GmailClient {
    async fn fetch_unread(&self, user_id: Uuid) -> Result<Vec<EmailContent>, MailError> {
        Ok(self.fetch_unread_impl(user_id).await?)
    }

    async fn mark_read(&self, user_id: Uuid, remote_id: &str) -> Result<(), MailError> {
        Ok(self.mark_read_impl(user_id, remote_id).await?)
    }
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    id: String,
    #[serde(default)]
    thread_id: String,
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: PartBody,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

/// Reply from users.watch
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchReply {
    pub history_id: Option<String>,
    pub expiration: Option<String>,
}

/// Pull the fields the pipeline needs out of a full message payload.
fn extract_content(detail: MessageDetail) -> EmailContent {
    let payload = detail.payload.unwrap_or_default();
    EmailContent {
        remote_id: detail.id,
        thread_id: detail.thread_id,
        subject: header_value(&payload.headers, "subject"),
        sender: header_value(&payload.headers, "from"),
        date: header_value(&payload.headers, "date"),
        body: find_plain_text(&payload).unwrap_or_default(),
    }
}

fn header_value(headers: &[Header], name: &str) -> String {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
        .unwrap_or_default()
}

/// First text/plain body in the part tree, depth first.
fn find_plain_text(part: &MessagePart) -> Option<String> {
    if part.mime_type == "text/plain" {
        if let Some(data) = part.body.data.as_deref() {
            return Some(decode_body(data));
        }
    }
    part.parts.iter().find_map(find_plain_text)
}

/// Gmail bodies are url-safe base64, usually without padding.
fn decode_body(data: &str) -> String {
    match BASE64_URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            debug!("undecodable message body: {e}");
            String::new()
        }
    }
}
