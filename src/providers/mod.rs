//! Message source integrations.
//!
//! Each provider turns its own wire format into plain text and hands it
//! to the ingestion pipeline; nothing downstream knows where a message
//! came from beyond the [`crate::domain::Source`] tag.

pub mod gmail;
pub mod telegram;
