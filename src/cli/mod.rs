//! Command-line interface for intake.
//!
//! Provides commands for running the ingestion gateway, managing users
//! and their Telegram/Gmail connections, and submitting or classifying
//! messages directly.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::classify::Classifier;
use crate::config;
use crate::domain::{MessageType, Source, PROVIDER_GOOGLE};
use crate::ingest::Ingestor;
use crate::store::SqliteStore;

pub mod gmail;
pub mod serve;
pub mod telegram;

/// intake - Multi-source message ingestion and classification service
#[derive(Parser, Debug)]
#[command(name = "intake")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the ingestion gateway in the foreground
    Serve,

    /// Manage registered users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage Telegram client sessions
    Telegram {
        #[command(subcommand)]
        command: telegram::TelegramCommands,
    },

    /// Manage Gmail connections
    Gmail {
        #[command(subcommand)]
        command: gmail::GmailCommands,
    },

    /// Show users and their connection state
    Status,

    /// Classify a message and save it for a user
    Add {
        /// Message text
        text: String,

        /// User who will own the item
        #[arg(short, long)]
        user_id: String,

        /// Source channel to record (telegram, gmail, web)
        #[arg(short, long, default_value = "web")]
        source: String,
    },

    /// Classify a message without saving it
    Classify {
        /// Message text
        text: String,

        /// Source channel to classify as (telegram, gmail, web)
        #[arg(short, long, default_value = "web")]
        source: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// User management subcommands
#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Register a new user
    Add {
        /// Telegram username to associate (leading @ is stripped)
        #[arg(short, long)]
        telegram_tag: Option<String>,
    },

    /// List registered users
    List,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve => serve::execute().await,
            Commands::User { command } => execute_user(command).await,
            Commands::Telegram { command } => execute_telegram(command).await,
            Commands::Gmail { command } => execute_gmail(command).await,
            Commands::Status => show_status().await,
            Commands::Add {
                text,
                user_id,
                source,
            } => add_item(&text, &user_id, &source).await,
            Commands::Classify { text, source } => classify_text(&text, &source).await,
            Commands::Config => show_config().await,
        }
    }
}

/// Execute user subcommands
async fn execute_user(command: UserCommands) -> Result<()> {
    match command {
        UserCommands::Add { telegram_tag } => add_user(telegram_tag).await,
        UserCommands::List => list_users().await,
    }
}

/// Execute telegram subcommands
async fn execute_telegram(command: telegram::TelegramCommands) -> Result<()> {
    match command {
        telegram::TelegramCommands::Login { user_id, phone } => {
            telegram::execute_login(&user_id, &phone).await
        }
        telegram::TelegramCommands::Logout { user_id } => {
            telegram::execute_logout(&user_id).await
        }
    }
}

/// Execute gmail subcommands
async fn execute_gmail(command: gmail::GmailCommands) -> Result<()> {
    match command {
        gmail::GmailCommands::Connect { user_id } => gmail::execute_connect(&user_id).await,
        gmail::GmailCommands::Disconnect { user_id } => gmail::execute_disconnect(&user_id).await,
        gmail::GmailCommands::Watch { user_id, topic } => {
            gmail::execute_watch(&user_id, &topic).await
        }
    }
}

/// Open the store at the configured path, creating the data directory
/// on first use.
pub(crate) fn open_store() -> Result<SqliteStore> {
    let path = config::db_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
    }
    SqliteStore::open(&path)
        .with_context(|| format!("Failed to open database: {}", path.display()))
}

pub(crate) fn parse_user_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("Invalid user ID: {}", s))
}

fn parse_source(s: &str) -> Result<Source> {
    Source::parse(s)
        .ok_or_else(|| anyhow::anyhow!("Unknown source: {} (expected telegram, gmail, or web)", s))
}

/// Register a new user
async fn add_user(telegram_tag: Option<String>) -> Result<()> {
    let store = open_store()?;

    let tag = telegram_tag
        .map(|t| t.trim_start_matches('@').to_string())
        .filter(|t| !t.is_empty());
    let user = store.create_user(tag.as_deref())?;

    println!("User ID: {}", user.id);
    if let Some(tag) = &user.telegram_tag {
        println!("Telegram tag: @{}", tag);
    }
    println!("Created: {}", user.created_at);

    Ok(())
}

/// List registered users
async fn list_users() -> Result<()> {
    let store = open_store()?;
    let users = store.list_users()?;

    if users.is_empty() {
        println!("No users registered. Use 'intake user add' to create one.");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<10}", "USER ID", "TELEGRAM TAG", "SESSION");
    println!("{}", "-".repeat(70));

    for user in &users {
        let tag = user.telegram_tag.as_deref().unwrap_or("-");
        let session = if user.has_telegram_session() {
            "stored"
        } else {
            "-"
        };
        println!("{:<38} {:<20} {:<10}", user.id, tag, session);
    }

    println!("\nTotal: {} users", users.len());

    Ok(())
}

/// Show every user's connection state
async fn show_status() -> Result<()> {
    let cfg = config::config()?;
    let store = open_store()?;
    let users = store.list_users()?;

    if users.is_empty() {
        println!("No users registered. Use 'intake user add' to create one.");
        return Ok(());
    }

    for user in &users {
        println!("User {}", user.id);
        if let Some(tag) = &user.telegram_tag {
            println!("  Telegram tag: @{}", tag);
        }
        let telegram = if user.has_telegram_session() {
            "session stored"
        } else {
            "not connected"
        };
        println!("  Telegram: {}", telegram);

        match store.find_connection(user.id, PROVIDER_GOOGLE)? {
            Some(conn) => {
                let email = conn
                    .provider_account_email
                    .as_deref()
                    .unwrap_or("unknown account");
                println!("  Gmail: connected ({})", email);
                if let Some(expires) = conn.expires_at {
                    println!("    Token expires: {}", expires);
                }
            }
            None => println!("  Gmail: not connected"),
        }

        println!("  Items: {}", store.count_items(user.id)?);
        println!();
    }

    println!(
        "Mail polling: resync every {}s, poll every {}s",
        cfg.polling.resync_interval.as_secs(),
        cfg.polling.poll_interval.as_secs()
    );

    Ok(())
}

/// Classify a message and save it for a user
async fn add_item(text: &str, user_id_str: &str, source_str: &str) -> Result<()> {
    let user_id = parse_user_id(user_id_str)?;
    let source = parse_source(source_str)?;

    if text.trim().is_empty() {
        anyhow::bail!("Message text is empty");
    }

    let cfg = config::config()?;
    let store = Arc::new(open_store()?);

    if store.get_user(user_id)?.is_none() {
        anyhow::bail!("User not found: {}", user_id);
    }

    let classifier = Arc::new(Classifier::new(cfg.openai_api_key.clone()));
    let ingestor = Ingestor::new(store, classifier);

    let ingested = ingestor
        .ingest_text(user_id, text, source, MessageType::Text)
        .await?;

    println!("Item ID: {}", ingested.item.id);
    println!("Title: {}", ingested.item.title);
    println!("Category: {}", ingested.classification.category);
    println!("Priority: {}", ingested.classification.priority);
    println!("Confidence: {:.2}", ingested.classification.confidence);

    Ok(())
}

/// Classify a message without saving it
async fn classify_text(text: &str, source_str: &str) -> Result<()> {
    let source = parse_source(source_str)?;

    if text.trim().is_empty() {
        anyhow::bail!("Message text is empty");
    }

    let cfg = config::config()?;
    let classifier = Classifier::new(cfg.openai_api_key.clone());
    let result = classifier.classify(text, source).await;

    println!("Title: {}", result.title);
    println!("Category: {}", result.category);
    println!("Priority: {}", result.priority);
    println!("Confidence: {:.2}", result.confidence);
    println!(
        "Action required: {}",
        if result.action_required { "yes" } else { "no" }
    );
    if !result.summary.is_empty() {
        println!("Summary: {}", result.summary);
    }

    let entities = &result.entities;
    if !entities.dates.is_empty() {
        println!("Dates: {}", entities.dates.join(", "));
    }
    if !entities.times.is_empty() {
        println!("Times: {}", entities.times.join(", "));
    }
    if let Some(contact) = entities.contact.as_deref().filter(|c| !c.is_empty()) {
        println!("Contact: {}", contact);
    }
    if !entities.projects.is_empty() {
        println!("Projects: {}", entities.projects.join(", "));
    }
    if !entities.keywords.is_empty() {
        println!("Keywords: {}", entities.keywords.join(", "));
    }

    Ok(())
}

/// Show the resolved configuration (for debugging)
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("  Intake Configuration");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.db_path.display());
    println!("  Lock:     {}", cfg.lock_path().display());
    println!();
    println!("OpenAI:");
    println!(
        "  API key:          {}",
        if cfg.openai_api_key.is_some() {
            "set"
        } else {
            "(not set - keyword fallback)"
        }
    );
    println!(
        "  Whisper language: {}",
        cfg.whisper_language.as_deref().unwrap_or("(auto)")
    );
    println!();
    println!("Telegram:");
    println!(
        "  Bot token:   {}",
        if cfg.telegram_bot_token.is_some() {
            "set"
        } else {
            "(not set)"
        }
    );
    println!(
        "  Gateway URL: {}",
        cfg.telegram_gateway_url.as_deref().unwrap_or("(not set)")
    );
    println!();
    println!("Google:");
    match &cfg.google {
        Some(google) => {
            println!("  Client ID:    {}", google.client_id);
            println!("  Redirect URI: {}", google.redirect_uri);
        }
        None => println!("  (not configured)"),
    }
    println!();
    println!("Mail polling:");
    println!(
        "  Resync interval: {}s",
        cfg.polling.resync_interval.as_secs()
    );
    println!(
        "  Poll interval:   {}s",
        cfg.polling.poll_interval.as_secs()
    );

    Ok(())
}
