//! Gmail provider: OAuth connection management plus the message API.

pub mod api;
pub mod oauth;

// Re-export key types
pub use api::{GmailClient, GmailError, WatchReply};
pub use oauth::{ConnectionError, GoogleAuth, TokenResponse, UserInfo};
