//! The ingestion pipeline: classify a message, resolve its title, persist
//! item and classification atomically.
//!
//! Classification never fails (it degrades to a keyword fallback), so the
//! only errors surfacing from here are persistence errors.

use std::sync::Arc;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::classify::Classifier;
use crate::domain::{ClassificationResult, Item, MessageType, NewItem, Source};
use crate::store::{SqliteStore, StoreError};

/// Extracted content of one mail message, ready for ingestion
#[derive(Debug, Clone)]
pub struct EmailContent {
    /// Provider-side message id
    pub remote_id: String,

    /// Provider-side thread id
    pub thread_id: String,

    pub subject: String,
    pub sender: String,
    pub date: String,

    /// Decoded plain-text body, possibly empty
    pub body: String,
}

impl EmailContent {
    /// Combined representation handed to the classifier.
    pub fn full_text(&self) -> String {
        format!(
            "Subject: {}\n\nFrom: {}\n\n{}",
            self.subject, self.sender, self.body
        )
    }
}

/// A persisted item together with the classification that was attached
#[derive(Debug, Clone)]
pub struct IngestedItem {
    pub item: Item,
    pub classification: ClassificationResult,
}

/// Entry point every message source funnels through
pub struct Ingestor {
    store: Arc<SqliteStore>,
    classifier: Arc<Classifier>,
}

impl Ingestor {
    pub fn new(store: Arc<SqliteStore>, classifier: Arc<Classifier>) -> Self {
        Self { store, classifier }
    }

    /// Classify a chat message and persist it.
    ///
    /// The item's title comes from the classification; the raw text is kept
    /// in `original_text`.
    #[instrument(skip(self, text), fields(%owner_id, %source))]
    pub async fn ingest_text(
        &self,
        owner_id: Uuid,
        text: &str,
        source: Source,
        message_type: MessageType,
    ) -> Result<IngestedItem, StoreError> {
        let classification = self.classifier.classify(text, source).await;

        let item = self.store.create_item_with_classification(
            owner_id,
            NewItem {
                source: Some(source),
                message_type: Some(message_type),
                original_text: Some(text.to_string()),
                ..Default::default()
            },
            Some(&classification),
        )?;

        info!(
            item_id = %item.id,
            category = %classification.category,
            "ingested message"
        );

        Ok(IngestedItem {
            item,
            classification,
        })
    }

    /// Classify an extracted email and persist it.
    ///
    /// Messages without a decoded body are skipped and yield `Ok(None)`.
    #[instrument(skip(self, email), fields(%owner_id, remote_id = %email.remote_id))]
    pub async fn ingest_email(
        &self,
        owner_id: Uuid,
        email: &EmailContent,
    ) -> Result<Option<IngestedItem>, StoreError> {
        if email.body.is_empty() {
            debug!("skipping email without plain-text body");
            return Ok(None);
        }

        let full_text = email.full_text();
        let classification = self.classifier.classify(&full_text, Source::Gmail).await;

        let title = if email.subject.is_empty() {
            "No Subject".to_string()
        } else {
            email.subject.clone()
        };

        let item = self.store.create_item_with_classification(
            owner_id,
            NewItem {
                title,
                description: truncate_chars(&email.body, 1000),
                source: Some(Source::Gmail),
                message_type: Some(MessageType::Email),
                original_text: Some(full_text),
                metadata: Some(serde_json::json!({
                    "gmail_message_id": email.remote_id,
                    "gmail_thread_id": email.thread_id,
                    "sender": email.sender,
                    "date": email.date,
                })),
            },
            Some(&classification),
        )?;

        info!(
            item_id = %item.id,
            subject = %email.subject,
            "ingested email"
        );

        Ok(Some(IngestedItem {
            item,
            classification,
        }))
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, Priority};

    fn test_ingestor() -> Ingestor {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let classifier = Arc::new(Classifier::new(None));
        Ingestor::new(store, classifier)
    }

    fn sample_email(body: &str) -> EmailContent {
        EmailContent {
            remote_id: "m-1".to_string(),
            thread_id: "t-1".to_string(),
            subject: "Weekly sync".to_string(),
            sender: "alice@example.com".to_string(),
            date: "Mon, 4 Aug 2025 09:00:00 +0000".to_string(),
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn test_ingest_text_persists_item_and_classification() {
        let ingestor = test_ingestor();
        let user = ingestor.store.create_user(None).unwrap();

        let ingested = ingestor
            .ingest_text(
                user.id,
                "Let's meet tomorrow at 3pm to discuss the budget",
                Source::Telegram,
                MessageType::Text,
            )
            .await
            .unwrap();

        assert_eq!(ingested.classification.category, Category::Meeting);
        assert_eq!(ingested.classification.priority, Priority::High);
        assert_eq!(ingested.item.title, "Let's meet tomorrow at 3pm to");
        assert_eq!(ingested.item.description, "");
        assert_eq!(ingested.item.source, Some(Source::Telegram));

        let stored = ingestor
            .store
            .get_classification(ingested.item.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.category, Category::Meeting);
        assert!(stored.action_required);
    }

    #[tokio::test]
    async fn test_ingest_email_skips_empty_body() {
        let ingestor = test_ingestor();
        let user = ingestor.store.create_user(None).unwrap();

        let result = ingestor
            .ingest_email(user.id, &sample_email(""))
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(ingestor.store.count_items(user.id).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_email_persists_metadata() {
        let ingestor = test_ingestor();
        let user = ingestor.store.create_user(None).unwrap();

        let ingested = ingestor
            .ingest_email(user.id, &sample_email("budget review notes"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(ingested.item.source, Some(Source::Gmail));
        assert_eq!(ingested.item.message_type, Some(MessageType::Email));
        assert_eq!(ingested.item.description, "budget review notes");

        let metadata = ingested.item.metadata.unwrap();
        assert_eq!(metadata["gmail_message_id"], "m-1");
        assert_eq!(metadata["gmail_thread_id"], "t-1");
        assert_eq!(metadata["sender"], "alice@example.com");

        // classifier-derived title wins over the subject, shortened past 50
        assert_eq!(
            ingested.item.title,
            "Subject: Weekly sync From: alice@example.com bu..."
        );
    }

    #[tokio::test]
    async fn test_ingest_email_truncates_description() {
        let ingestor = test_ingestor();
        let user = ingestor.store.create_user(None).unwrap();

        let ingested = ingestor
            .ingest_email(user.id, &sample_email(&"x".repeat(1500)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(ingested.item.description.chars().count(), 1000);
        // original text keeps the full body
        assert!(ingested.item.original_text.unwrap().len() > 1500);
    }
}
