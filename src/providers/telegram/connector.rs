//! Session-based Telegram connectivity.
//!
//! The MTProto transport itself runs in a local gateway sidecar; this module
//! defines the narrow traits the rest of the service programs against, plus
//! the HTTP client for that gateway. Tests swap in scripted fakes.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

/// Errors talking to the gateway
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("telegram gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("telegram gateway error: {0}")]
    Gateway(String),
}

/// Errors completing a login
#[derive(Debug, Error)]
pub enum SignInError {
    #[error("second factor required")]
    SecondFactorRequired,

    #[error("invalid login code")]
    InvalidCode,

    #[error("sign-in rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Opaque handle for downloadable media
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaRef(pub String);

/// An inbound event on a live client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Incoming text message
    Text { sender: String, text: String },

    /// Incoming voice note
    Voice { sender: String, media: MediaRef },

    /// Incoming audio file attachment
    Audio { sender: String, media: MediaRef },

    /// Anything the service does not process
    #[serde(other)]
    Ignored,
}

/// Entry point for opening Telegram sessions
#[async_trait]
pub trait TelegramConnector: Send + Sync {
    /// Start a login by having a code delivered to the phone.
    async fn send_code(&self, phone: &str) -> Result<Box<dyn PendingAuth>, ConnectorError>;

    /// Open a live client from a stored session token.
    async fn connect(&self, session: &str) -> Result<Box<dyn LiveClient>, ConnectorError>;
}

/// A login waiting for its code (and possibly a second factor)
#[async_trait]
pub trait PendingAuth: Send {
    /// Provider-issued hash identifying the delivered code.
    fn phone_code_hash(&self) -> &str;

    async fn sign_in(
        &mut self,
        phone: &str,
        code: &str,
    ) -> Result<Box<dyn LiveClient>, SignInError>;

    async fn sign_in_with_password(
        &mut self,
        password: &str,
    ) -> Result<Box<dyn LiveClient>, SignInError>;

    /// Drop the pending login on the provider side.
    async fn abort(self: Box<Self>);
}

/// An authenticated, connected client
#[async_trait]
pub trait LiveClient: Send + Sync {
    /// Serialized session token for persistence.
    fn session(&self) -> &str;

    async fn is_authorized(&self) -> Result<bool, ConnectorError>;

    /// Wait for the next inbound event.
    async fn next_event(&mut self) -> Result<InboundEvent, ConnectorError>;

    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, ConnectorError>;

    async fn disconnect(self: Box<Self>);
}

/// Gateway reply envelope
#[derive(Debug, Deserialize)]
struct GatewayReply<T> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

impl<T> GatewayReply<T> {
    fn into_result(self) -> Result<T, ConnectorError> {
        if self.ok {
            self.result
                .ok_or_else(|| ConnectorError::Gateway("reply missing result".to_string()))
        } else {
            Err(ConnectorError::Gateway(
                self.error.unwrap_or_else(|| "unknown gateway error".to_string()),
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendCodeReply {
    auth_key: String,
    phone_code_hash: String,
}

#[derive(Debug, Deserialize)]
struct SessionReply {
    session: String,
}

#[derive(Debug, Deserialize)]
struct ClientReply {
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct AuthorizedReply {
    authorized: bool,
}

#[derive(Debug, Deserialize)]
struct EventsReply {
    event: Option<InboundEvent>,
}

/// HTTP client for the MTProto gateway sidecar
#[derive(Clone)]
pub struct GatewayConnector {
    base_url: String,
    client: reqwest::Client,
}

impl GatewayConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ConnectorError> {
        let reply: GatewayReply<T> = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await?
            .json()
            .await?;
        reply.into_result()
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ConnectorError> {
        let reply: GatewayReply<T> = self
            .client
            .get(self.url(path))
            .send()
            .await?
            .json()
            .await?;
        reply.into_result()
    }

    async fn open_client(&self, session: &str) -> Result<GatewayClient, ConnectorError> {
        let reply: ClientReply = self
            .post_json("/clients", &json!({ "session": session }))
            .await?;
        Ok(GatewayClient {
            gateway: self.clone(),
            client_id: reply.client_id,
            session: session.to_string(),
        })
    }
}

#[async_trait]
impl TelegramConnector for GatewayConnector {
    async fn send_code(&self, phone: &str) -> Result<Box<dyn PendingAuth>, ConnectorError> {
        let reply: SendCodeReply = self
            .post_json("/sessions/code", &json!({ "phone": phone }))
            .await?;
        Ok(Box::new(GatewayPending {
            gateway: self.clone(),
            auth_key: reply.auth_key,
            phone_code_hash: reply.phone_code_hash,
        }))
    }

    async fn connect(&self, session: &str) -> Result<Box<dyn LiveClient>, ConnectorError> {
        Ok(Box::new(self.open_client(session).await?))
    }
}

/// Pending login against the gateway
struct GatewayPending {
    gateway: GatewayConnector,
    auth_key: String,
    phone_code_hash: String,
}

/// Distinguish sign-in rejections from transport problems.
///
/// The gateway forwards provider error codes verbatim, so a mention of
/// "password" means a second factor is set on the account.
fn classify_sign_in_error(e: ConnectorError) -> SignInError {
    match e {
        ConnectorError::Gateway(msg) => {
            let lower = msg.to_ascii_lowercase();
            if lower.contains("password") {
                SignInError::SecondFactorRequired
            } else if lower.contains("phone_code") || lower.contains("code invalid") {
                SignInError::InvalidCode
            } else {
                SignInError::Rejected(msg)
            }
        }
        other => SignInError::Connector(other),
    }
}

#[async_trait]
impl PendingAuth for GatewayPending {
    fn phone_code_hash(&self) -> &str {
        &self.phone_code_hash
    }

    async fn sign_in(
        &mut self,
        phone: &str,
        code: &str,
    ) -> Result<Box<dyn LiveClient>, SignInError> {
        let reply: SessionReply = self
            .gateway
            .post_json(
                "/sessions/sign-in",
                &json!({
                    "auth_key": self.auth_key,
                    "phone": phone,
                    "code": code,
                }),
            )
            .await
            .map_err(classify_sign_in_error)?;

        let client = self.gateway.open_client(&reply.session).await?;
        Ok(Box::new(client))
    }

    async fn sign_in_with_password(
        &mut self,
        password: &str,
    ) -> Result<Box<dyn LiveClient>, SignInError> {
        let reply: SessionReply = self
            .gateway
            .post_json(
                "/sessions/password",
                &json!({
                    "auth_key": self.auth_key,
                    "password": password,
                }),
            )
            .await
            .map_err(classify_sign_in_error)?;

        let client = self.gateway.open_client(&reply.session).await?;
        Ok(Box::new(client))
    }

    async fn abort(self: Box<Self>) {
        let result: Result<serde_json::Value, _> = self
            .gateway
            .post_json("/sessions/abort", &json!({ "auth_key": self.auth_key }))
            .await;
        if let Err(e) = result {
            debug!("failed to abort pending login: {e}");
        }
    }
}

/// Live client backed by the gateway
struct GatewayClient {
    gateway: GatewayConnector,
    client_id: String,
    session: String,
}

#[async_trait]
impl LiveClient for GatewayClient {
    fn session(&self) -> &str {
        &self.session
    }

    async fn is_authorized(&self) -> Result<bool, ConnectorError> {
        let reply: AuthorizedReply = self
            .gateway
            .get_json(&format!("/clients/{}/authorized", self.client_id))
            .await?;
        Ok(reply.authorized)
    }

    async fn next_event(&mut self) -> Result<InboundEvent, ConnectorError> {
        // long poll, empty replies mean the wait timed out
        loop {
            let reply: EventsReply = self
                .gateway
                .get_json(&format!("/clients/{}/events?wait=25", self.client_id))
                .await?;
            if let Some(event) = reply.event {
                return Ok(event);
            }
        }
    }

    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, ConnectorError> {
        let response = self
            .gateway
            .client
            .get(self.gateway.url(&format!(
                "/clients/{}/media/{}",
                self.client_id, media.0
            )))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::Gateway(format!(
                "media download returned {status}"
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn disconnect(self: Box<Self>) {
        let result = self
            .gateway
            .client
            .delete(self.gateway.url(&format!("/clients/{}", self.client_id)))
            .send()
            .await;
        if let Err(e) = result {
            debug!("failed to disconnect client: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_ok() {
        let reply: GatewayReply<SessionReply> =
            serde_json::from_str(r#"{"ok": true, "result": {"session": "abc"}, "error": null}"#)
                .unwrap();
        assert_eq!(reply.into_result().unwrap().session, "abc");
    }

    #[test]
    fn test_envelope_error() {
        let reply: GatewayReply<SessionReply> =
            serde_json::from_str(r#"{"ok": false, "result": null, "error": "PHONE_CODE_INVALID"}"#)
                .unwrap();
        let err = reply.into_result().unwrap_err();
        assert!(matches!(err, ConnectorError::Gateway(msg) if msg == "PHONE_CODE_INVALID"));
    }

    #[test]
    fn test_event_parsing() {
        let text: InboundEvent =
            serde_json::from_str(r#"{"kind": "text", "sender": "Alice", "text": "hi"}"#).unwrap();
        assert!(matches!(text, InboundEvent::Text { sender, text } if sender == "Alice" && text == "hi"));

        let voice: InboundEvent =
            serde_json::from_str(r#"{"kind": "voice", "sender": "Bob", "media": "m-9"}"#).unwrap();
        assert!(
            matches!(voice, InboundEvent::Voice { media, .. } if media == MediaRef("m-9".to_string()))
        );

        let unknown: InboundEvent =
            serde_json::from_str(r#"{"kind": "sticker", "sender": "Bob"}"#).unwrap();
        assert!(matches!(unknown, InboundEvent::Ignored));
    }

    #[test]
    fn test_sign_in_error_classification() {
        let second = classify_sign_in_error(ConnectorError::Gateway(
            "SESSION_PASSWORD_NEEDED".to_string(),
        ));
        assert!(matches!(second, SignInError::SecondFactorRequired));

        let invalid =
            classify_sign_in_error(ConnectorError::Gateway("PHONE_CODE_INVALID".to_string()));
        assert!(matches!(invalid, SignInError::InvalidCode));

        let other = classify_sign_in_error(ConnectorError::Gateway("FLOOD_WAIT_420".to_string()));
        assert!(matches!(other, SignInError::Rejected(_)));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let gateway = GatewayConnector::new("http://localhost:9009/");
        assert_eq!(gateway.url("/clients"), "http://localhost:9009/clients");
    }
}
