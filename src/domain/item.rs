//! Captured items and their sources.
//!
//! An Item is one captured message, normalized to a common shape regardless
//! of which channel it arrived through.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel an item arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Telegram client session or bot
    Telegram,

    /// Gmail inbox polling
    Gmail,

    /// Direct submission (CLI)
    Web,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Gmail => "gmail",
            Self::Web => "web",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "telegram" => Some(Self::Telegram),
            "gmail" => Some(Self::Gmail),
            "web" => Some(Self::Web),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the original message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Plain chat text
    Text,

    /// Voice note, transcribed before ingestion
    Voice,

    /// Audio file attachment, transcribed before ingestion
    Audio,

    /// Email message
    Email,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
            Self::Audio => "audio",
            Self::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "voice" => Some(Self::Voice),
            "audio" => Some(Self::Audio),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A captured message owned by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Unique identifier for this item
    pub id: Uuid,

    /// User who owns this item
    pub owner_id: Uuid,

    /// Short display title
    pub title: String,

    /// Longer body, possibly truncated from the original
    pub description: String,

    /// Channel the item arrived through
    pub source: Option<Source>,

    /// Shape of the original message
    pub message_type: Option<MessageType>,

    /// The full original text as received
    pub original_text: Option<String>,

    /// Source-specific metadata (message ids, sender, headers)
    pub metadata: Option<serde_json::Value>,

    /// When the item was captured
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating an item
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub title: String,
    pub description: String,
    pub source: Option<Source>,
    pub message_type: Option<MessageType>,
    pub original_text: Option<String>,
    pub metadata: Option<serde_json::Value>,
}
