//! intake - Multi-source message ingestion and classification service
//!
//! Captures messages from Telegram (client sessions and a bot) and Gmail,
//! classifies each one with OpenAI (falling back to keyword heuristics),
//! and persists the result in SQLite.
//!
//! # Architecture
//!
//! Every channel funnels into the same ingestion pipeline:
//! - Providers turn their wire formats into plain text
//! - The Ingestor classifies the text and persists item plus classification
//!   in one transaction
//! - Per-user poll workers and session listeners run as supervised tasks
//!
//! # Modules
//!
//! - `providers`: Telegram and Gmail front doors
//! - `ingest`: The shared pipeline, mail polling, and dedup
//! - `classify`: OpenAI classification with keyword fallback
//! - `transcribe`: Whisper transcription for voice messages
//! - `store`: SQLite persistence
//! - `domain`: Data structures (User, Item, Classification, connections)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Register a user and start the gateway
//! intake user add --telegram-tag alice
//! intake serve
//!
//! # Classify a message directly
//! intake add "Meeting with Bob tomorrow at 3pm" --user-id <user-id>
//!
//! # Connect an account
//! intake gmail connect <user-id>
//! ```

pub mod classify;
pub mod cli;
pub mod config;
pub mod domain;
pub mod ingest;
pub mod providers;
pub mod store;
pub mod transcribe;

// Re-export main types at crate root for convenience
pub use classify::Classifier;
pub use domain::{
    Category, Classification, ClassificationResult, Entities, Item, MessageType, Priority, Source,
    User,
};
pub use ingest::{EmailContent, IngestedItem, Ingestor, PollSupervisor, SupervisorHandle};
pub use store::{SqliteStore, StoreError};
pub use transcribe::Transcriber;

// Telegram integration
pub use providers::telegram::{TelegramBot, TelegramSessions};

// Gmail integration
pub use providers::gmail::{GmailClient, GoogleAuth};
