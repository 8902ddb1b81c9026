//! Telegram provider.
//!
//! Two independent front doors into the pipeline:
//!
//! 1. **Sessions**: user-account clients attached through a gateway
//!    service, receiving messages the user gets in their own chats
//! 2. **Bot**: a Bot API client users message directly
//!
//! Both paths end in the same ingestion pipeline; they differ in how the
//! message arrives and whether the sender is framed into the text.

pub mod bot;
pub mod connector;
pub mod session;

// Re-export key types
pub use bot::{BotHandle, TelegramBot};
pub use connector::{
    ConnectorError, GatewayConnector, InboundEvent, LiveClient, MediaRef, PendingAuth,
    SignInError, TelegramConnector,
};
pub use session::{AuthError, AuthState, StartedAuth, TelegramSessions};
