//! Domain types for the intake service.
//!
//! This module contains the core data structures:
//! - User: A registered owner of ingested items
//! - Item: A captured message, normalized across sources
//! - Classification: Category, priority and extracted entities for an item
//! - ProviderConnection: OAuth tokens linking a user to an external provider

pub mod classification;
pub mod connection;
pub mod item;
pub mod user;

// Re-export commonly used types
pub use classification::{Category, Classification, ClassificationResult, Entities, Priority};
pub use connection::{NewConnection, ProviderConnection, PROVIDER_GOOGLE};
pub use item::{Item, MessageType, NewItem, Source};
pub use user::User;
