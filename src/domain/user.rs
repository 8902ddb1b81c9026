//! Registered users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered owner of ingested items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: Uuid,

    /// Telegram username this user is reachable at, without the leading @
    pub telegram_tag: Option<String>,

    /// Serialized Telegram client session, present once authenticated
    pub telegram_session: Option<String>,

    /// When the user was registered
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether this user has a stored Telegram client session.
    pub fn has_telegram_session(&self) -> bool {
        self.telegram_session
            .as_deref()
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }
}
