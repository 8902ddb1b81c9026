//! Telegram Bot API front end.
//!
//! Long-polls getUpdates and turns direct messages to the bot into
//! classified items. Senders are matched to accounts by their Telegram
//! username; unknown senders get a registration hint instead.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{Category, ClassificationResult, MessageType, Priority, Source, User};
use crate::ingest::Ingestor;
use crate::store::{SqliteStore, StoreError};
use crate::transcribe::Transcriber;

/// Long-poll wait passed to getUpdates
const POLL_TIMEOUT_SECS: u64 = 30;

/// Wait between retries after a failed poll
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Response from Telegram API
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Message result from sendMessage
#[derive(Debug, Deserialize)]
struct MessageResult {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    chat: Chat,
    #[serde(default)]
    from: Option<Sender>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    voice: Option<Voice>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Sender {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Voice {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    file_path: Option<String>,
}

/// Bot client that polls for updates and answers in the chat
pub struct TelegramBot {
    token: String,
    api_base: String,
    http: reqwest::Client,
    store: Arc<SqliteStore>,
    ingestor: Arc<Ingestor>,
    transcriber: Arc<Transcriber>,
}

/// Running bot poll task
pub struct BotHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl BotHandle {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.task.await;
    }
}

impl TelegramBot {
    pub fn new(
        token: String,
        store: Arc<SqliteStore>,
        ingestor: Arc<Ingestor>,
        transcriber: Arc<Transcriber>,
    ) -> Self {
        Self {
            token,
            api_base: DEFAULT_API_BASE.to_string(),
            http: reqwest::Client::new(),
            store,
            ingestor,
            transcriber,
        }
    }

    /// Use a different API host, e.g. a self-hosted Bot API server.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Build API URL
    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.token, file_path)
    }

    /// Start the getUpdates poll loop.
    pub fn start(self) -> BotHandle {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.run(stop_rx));
        BotHandle { stop_tx, task }
    }

    async fn run(self, mut stop_rx: mpsc::Receiver<()>) {
        info!("telegram bot polling started");
        let mut offset = 0i64;
        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                updates = self.get_updates(offset) => match updates {
                    Ok(updates) => {
                        for update in updates {
                            offset = offset.max(update.update_id + 1);
                            if let Some(message) = update.message {
                                self.handle_message(message).await;
                            }
                        }
                    }
                    Err(e) => {
                        error!("telegram bot poll failed: {e:#}");
                        tokio::select! {
                            _ = stop_rx.recv() => break,
                            _ = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                        }
                    }
                }
            }
        }
        info!("telegram bot stopped");
    }

    async fn handle_message(&self, message: IncomingMessage) {
        let chat_id = message.chat.id;
        let username = message
            .from
            .as_ref()
            .and_then(|s| s.username.as_deref());
        let first_name = message
            .from
            .as_ref()
            .and_then(|s| s.first_name.as_deref());

        if message.text.as_deref() == Some("/start") {
            self.handle_start(chat_id, username, first_name).await;
            return;
        }

        let user = match self.resolve_sender(username) {
            Ok(Some(user)) => user,
            Ok(None) => {
                self.reply(
                    chat_id,
                    "I don't recognize you. Please register your Telegram username in your profile first.",
                )
                .await;
                return;
            }
            Err(e) => {
                error!("telegram sender lookup failed: {e}");
                return;
            }
        };

        if let Some(text) = message.text.as_deref() {
            self.handle_text(chat_id, user.id, text).await;
        } else if let Some(voice) = &message.voice {
            self.handle_voice(chat_id, user.id, &voice.file_id).await;
        }
    }

    fn resolve_sender(&self, username: Option<&str>) -> Result<Option<User>, StoreError> {
        match username {
            Some(tag) => self.store.find_user_by_telegram_tag(tag),
            None => Ok(None),
        }
    }

    async fn handle_start(&self, chat_id: i64, username: Option<&str>, first_name: Option<&str>) {
        let registered = match self.resolve_sender(username) {
            Ok(user) => user.is_some(),
            Err(e) => {
                error!("telegram sender lookup failed: {e}");
                false
            }
        };

        let text = if registered {
            format!(
                "Hello {}! Your account is connected.\nYou can send me text messages or voice messages, and I'll process and classify them for you.",
                first_name.unwrap_or("there")
            )
        } else {
            "Hello! To use this bot, please register your Telegram username in your profile settings first.\nOnce registered, you can send me text or voice messages!".to_string()
        };
        self.reply(chat_id, &text).await;
    }

    async fn handle_text(&self, chat_id: i64, user_id: Uuid, text: &str) {
        match self
            .ingestor
            .ingest_text(user_id, text, Source::Telegram, MessageType::Text)
            .await
        {
            Ok(ingested) => {
                self.reply_markdown(chat_id, &format_reply(&ingested.classification))
                    .await;
            }
            Err(e) => {
                error!(%user_id, "failed to process telegram message: {e}");
                self.reply(
                    chat_id,
                    "❌ Sorry, there was an error processing your message. Please try again.",
                )
                .await;
            }
        }
    }

    async fn handle_voice(&self, chat_id: i64, user_id: Uuid, file_id: &str) {
        let status_id = match self
            .send_message(chat_id, "🎤 Processing your voice message...", false)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("failed to send status message: {e:#}");
                None
            }
        };

        let transcript = match self.download_file(file_id).await {
            Ok(payload) => self.transcriber.transcribe_voice_payload(&payload).await,
            Err(e) => {
                error!("failed to download voice message: {e:#}");
                None
            }
        };

        let Some(text) = transcript else {
            self.status_update(
                chat_id,
                status_id,
                "❌ Sorry, I couldn't understand your voice message. Please try again or send a text message.",
            )
            .await;
            return;
        };

        self.status_update(chat_id, status_id, &format!("📝 I heard: \"{text}\""))
            .await;

        match self
            .ingestor
            .ingest_text(user_id, &text, Source::Telegram, MessageType::Voice)
            .await
        {
            Ok(ingested) => {
                self.reply_markdown(chat_id, &format_reply(&ingested.classification))
                    .await;
            }
            Err(e) => {
                error!(%user_id, "failed to process voice message: {e}");
                self.reply(
                    chat_id,
                    "❌ Sorry, there was an error processing your message. Please try again.",
                )
                .await;
            }
        }
    }

    /// Edit the earlier status message, or send a fresh one if it never
    /// made it out.
    async fn status_update(&self, chat_id: i64, status_id: Option<i64>, text: &str) {
        match status_id {
            Some(message_id) => {
                if let Err(e) = self.edit_message(chat_id, message_id, text).await {
                    warn!("failed to edit telegram status: {e:#}");
                }
            }
            None => self.reply(chat_id, text).await,
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.send_message(chat_id, text, false).await {
            warn!("failed to send telegram reply: {e:#}");
        }
    }

    async fn reply_markdown(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.send_message(chat_id, text, true).await {
            warn!("failed to send telegram reply: {e:#}");
        }
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let url = self.api_url("getUpdates");

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "timeout": POLL_TIMEOUT_SECS,
                "offset": offset,
            }))
            .send()
            .await
            .context("Failed to poll Telegram updates")?;

        let result: TelegramResponse<Vec<Update>> = response
            .json()
            .await
            .context("Failed to parse Telegram response")?;

        if !result.ok {
            anyhow::bail!(
                "Telegram API error: {}",
                result.description.unwrap_or_default()
            );
        }

        Ok(result.result.unwrap_or_default())
    }

    async fn send_message(&self, chat_id: i64, text: &str, markdown: bool) -> Result<i64> {
        let url = self.api_url("sendMessage");

        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if markdown {
            body["parse_mode"] = serde_json::Value::String("Markdown".to_string());
        }

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send Telegram message")?;

        let result: TelegramResponse<MessageResult> = response
            .json()
            .await
            .context("Failed to parse Telegram response")?;

        if !result.ok {
            anyhow::bail!(
                "Telegram API error: {}",
                result.description.unwrap_or_default()
            );
        }

        Ok(result.result.map(|r| r.message_id).unwrap_or(0))
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        let url = self.api_url("editMessageText");

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": text,
            }))
            .send()
            .await
            .context("Failed to edit Telegram message")?;

        let result: TelegramResponse<serde_json::Value> = response
            .json()
            .await
            .context("Failed to parse Telegram response")?;

        if !result.ok {
            anyhow::bail!(
                "Telegram API error: {}",
                result.description.unwrap_or_default()
            );
        }

        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let url = self.api_url("getFile");

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await
            .context("Failed to request Telegram file info")?;

        let result: TelegramResponse<FileInfo> = response
            .json()
            .await
            .context("Failed to parse Telegram response")?;

        if !result.ok {
            anyhow::bail!(
                "Telegram API error: {}",
                result.description.unwrap_or_default()
            );
        }

        let file_path = result
            .result
            .and_then(|f| f.file_path)
            .context("Telegram file has no download path")?;

        let bytes = self
            .http
            .get(self.file_url(&file_path))
            .send()
            .await
            .context("Failed to download Telegram file")?
            .error_for_status()
            .context("Telegram file download rejected")?
            .bytes()
            .await
            .context("Failed to read Telegram file body")?;

        Ok(bytes.to_vec())
    }
}

fn category_emoji(category: Category) -> &'static str {
    match category {
        Category::Meeting => "📅",
        Category::Task => "✅",
        Category::Information => "ℹ️",
        Category::Thought => "💭",
    }
}

fn priority_emoji(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "🔴",
        Priority::Medium => "🟡",
        Priority::Low => "🟢",
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Chat reply summarizing what the classifier made of a message.
fn format_reply(classification: &ClassificationResult) -> String {
    let mut reply = format!(
        "{} **Message Classified**\n\n",
        category_emoji(classification.category)
    );
    reply.push_str(&format!(
        "**Category:** {}\n",
        capitalize(classification.category.as_str())
    ));
    reply.push_str(&format!(
        "**Priority:** {} {}\n",
        priority_emoji(classification.priority),
        capitalize(classification.priority.as_str())
    ));
    reply.push_str(&format!(
        "**Confidence:** {:.1}%\n",
        classification.confidence * 100.0
    ));

    if classification.action_required {
        reply.push_str("**Action Required:** ⚠️ Yes\n");
    }
    if !classification.summary.is_empty() {
        reply.push_str(&format!("**Summary:** {}\n", classification.summary));
    }

    let entities = &classification.entities;
    let contact = entities.contact.as_deref().filter(|c| !c.is_empty());
    let has_entities = !entities.dates.is_empty()
        || !entities.times.is_empty()
        || contact.is_some()
        || !entities.projects.is_empty()
        || !entities.keywords.is_empty();

    if has_entities {
        reply.push_str("\n**Extracted Information:**\n");
        if !entities.dates.is_empty() {
            reply.push_str(&format!("📅 Dates: {}\n", entities.dates.join(", ")));
        }
        if !entities.times.is_empty() {
            reply.push_str(&format!("⏰ Times: {}\n", entities.times.join(", ")));
        }
        if let Some(contact) = contact {
            reply.push_str(&format!("👤 Contact: {contact}\n"));
        }
        if !entities.projects.is_empty() {
            reply.push_str(&format!("📁 Projects: {}\n", entities.projects.join(", ")));
        }
        if !entities.keywords.is_empty() {
            let keywords: Vec<&str> =
                entities.keywords.iter().take(3).map(String::as_str).collect();
            reply.push_str(&format!("🔍 Keywords: {}\n", keywords.join(", ")));
        }
    }

    reply.push_str("\n✅ Message saved successfully!");
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classifier;
    use crate::domain::Entities;

    fn classification() -> ClassificationResult {
        ClassificationResult {
            title: "Budget review".to_string(),
            category: Category::Meeting,
            priority: Priority::High,
            confidence: 0.85,
            action_required: true,
            summary: "Budget review with Sarah".to_string(),
            entities: Entities {
                dates: vec!["tomorrow".to_string()],
                times: vec!["3pm".to_string()],
                contact: Some("Sarah".to_string()),
                projects: vec![],
                keywords: vec![
                    "budget".to_string(),
                    "review".to_string(),
                    "meeting".to_string(),
                    "quarterly".to_string(),
                ],
            },
        }
    }

    #[test]
    fn test_api_url() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ingestor = Arc::new(Ingestor::new(store.clone(), Arc::new(Classifier::new(None))));
        let transcriber = Arc::new(Transcriber::new(None, None));
        let bot = TelegramBot::new("TOKEN".to_string(), store, ingestor, transcriber);
        assert_eq!(
            bot.api_url("getUpdates"),
            "https://api.telegram.org/botTOKEN/getUpdates"
        );
        assert_eq!(
            bot.file_url("voice/file_1.oga"),
            "https://api.telegram.org/file/botTOKEN/voice/file_1.oga"
        );
    }

    #[tokio::test]
    async fn test_stop_interrupts_poll_retry_delay() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ingestor = Arc::new(Ingestor::new(store.clone(), Arc::new(Classifier::new(None))));
        let transcriber = Arc::new(Transcriber::new(None, None));

        // bind then drop a listener so the port refuses connections
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let bot = TelegramBot::new("TOKEN".to_string(), store, ingestor, transcriber)
            .with_api_base(format!("http://{addr}"));
        let handle = bot.start();

        // polls fail immediately, leaving the loop in its retry delay
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_secs(2), handle.stop())
            .await
            .expect("stop should not wait out the retry delay");
    }

    #[test]
    fn test_format_reply_full() {
        let reply = format_reply(&classification());

        assert!(reply.starts_with("📅 **Message Classified**\n\n"));
        assert!(reply.contains("**Category:** Meeting\n"));
        assert!(reply.contains("**Priority:** 🔴 High\n"));
        assert!(reply.contains("**Confidence:** 85.0%\n"));
        assert!(reply.contains("**Action Required:** ⚠️ Yes\n"));
        assert!(reply.contains("**Summary:** Budget review with Sarah\n"));
        assert!(reply.contains("\n**Extracted Information:**\n"));
        assert!(reply.contains("📅 Dates: tomorrow\n"));
        assert!(reply.contains("⏰ Times: 3pm\n"));
        assert!(reply.contains("👤 Contact: Sarah\n"));
        // keywords capped at three
        assert!(reply.contains("🔍 Keywords: budget, review, meeting\n"));
        assert!(!reply.contains("quarterly"));
        assert!(reply.ends_with("\n✅ Message saved successfully!"));
    }

    #[test]
    fn test_format_reply_minimal() {
        let mut c = classification();
        c.category = Category::Thought;
        c.priority = Priority::Low;
        c.confidence = 0.5;
        c.action_required = false;
        c.summary = String::new();
        c.entities = Entities::default();

        let reply = format_reply(&c);
        assert!(reply.starts_with("💭 **Message Classified**\n\n"));
        assert!(reply.contains("**Priority:** 🟢 Low\n"));
        assert!(reply.contains("**Confidence:** 50.0%\n"));
        assert!(!reply.contains("Action Required"));
        assert!(!reply.contains("Summary"));
        assert!(!reply.contains("Extracted Information"));
        assert!(reply.ends_with("\n✅ Message saved successfully!"));
    }

    #[test]
    fn test_empty_contact_not_shown() {
        let mut c = classification();
        c.entities.contact = Some(String::new());
        let reply = format_reply(&c);
        assert!(!reply.contains("👤 Contact:"));
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("meeting"), "Meeting");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_parse_text_update() {
        let json = r#"{
            "update_id": 7,
            "message": {
                "message_id": 42,
                "chat": {"id": 100},
                "from": {"id": 9, "username": "alice", "first_name": "Alice"},
                "text": "hello"
            }
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();
        assert_eq!(update.update_id, 7);
        let message = update.message.unwrap();
        assert_eq!(message.chat.id, 100);
        assert_eq!(
            message.from.as_ref().unwrap().username.as_deref(),
            Some("alice")
        );
        assert_eq!(message.text.as_deref(), Some("hello"));
        assert!(message.voice.is_none());
    }

    #[test]
    fn test_parse_voice_update() {
        let json = r#"{
            "update_id": 8,
            "message": {
                "message_id": 43,
                "chat": {"id": 100},
                "from": {"id": 9, "username": "alice"},
                "voice": {"file_id": "AwACAgI", "duration": 4}
            }
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();
        let message = update.message.unwrap();
        assert_eq!(message.voice.unwrap().file_id, "AwACAgI");
        assert!(message.text.is_none());
    }

    #[test]
    fn test_parse_update_without_message() {
        let json = r#"{"update_id": 9, "edited_message": {"message_id": 1}}"#;
        let update: Update = serde_json::from_str(json).unwrap();
        assert!(update.message.is_none());
    }
}
