//! Message ingestion pipeline.
//!
//! Every provider funnels into the same sequence:
//!
//! 1. **Receive**: a provider produces plain text (chat message,
//!    transcribed voice note, extracted email body)
//! 2. **Classify**: the classifier assigns category, priority and entities
//! 3. **Persist**: item and classification are stored together
//!
//! Push-style providers call [`Ingestor`] directly from their listeners;
//! the pull-style mail path runs under the [`supervisor`], which also
//! dedups already-processed messages.

pub mod dedup;
pub mod pipeline;
pub mod supervisor;

// Re-export key types
pub use dedup::RecentIds;
pub use pipeline::{EmailContent, IngestedItem, Ingestor};
pub use supervisor::{
    MailError, MailSource, PollSupervisor, SupervisorDown, SupervisorHandle, SupervisorStatus,
};
