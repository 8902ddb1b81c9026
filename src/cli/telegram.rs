//! Telegram CLI subcommands for managing client sessions.
//!
//! `login` walks through the interactive code flow (and the second factor
//! when the account has one); `logout` clears the stored session.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::classify::Classifier;
use crate::config;
use crate::ingest::Ingestor;
use crate::providers::telegram::{AuthError, GatewayConnector, TelegramSessions};
use crate::store::SqliteStore;
use crate::transcribe::Transcriber;

use super::{open_store, parse_user_id};

/// Telegram session subcommands
#[derive(Subcommand, Debug)]
pub enum TelegramCommands {
    /// Log a user's Telegram account in (interactive)
    Login {
        /// User to attach the session to
        user_id: String,

        /// Phone number in international format (e.g. +15551234567)
        #[arg(short, long)]
        phone: String,
    },

    /// Clear a user's stored Telegram session
    Logout {
        /// User whose session to clear
        user_id: String,
    },
}

/// Build a sessions manager wired to the configured gateway.
fn build_sessions(store: Arc<SqliteStore>) -> Result<TelegramSessions> {
    let cfg = config::config()?;
    let gateway_url = cfg
        .telegram_gateway_url
        .as_deref()
        .context("TELEGRAM_GATEWAY_URL is not configured")?;

    let classifier = Arc::new(Classifier::new(cfg.openai_api_key.clone()));
    let transcriber = Arc::new(Transcriber::new(
        cfg.openai_api_key.clone(),
        cfg.whisper_language.clone(),
    ));
    let ingestor = Arc::new(Ingestor::new(store.clone(), classifier));

    Ok(TelegramSessions::new(
        Arc::new(GatewayConnector::new(gateway_url)),
        store,
        ingestor,
        transcriber,
    ))
}

/// Print a prompt and read one trimmed line from stdin.
fn prompt(label: &str) -> Result<String> {
    eprint!("{}: ", label);
    io::stderr().flush().ok();

    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

/// Execute the `telegram login` command
pub async fn execute_login(user_id_str: &str, phone: &str) -> Result<()> {
    let user_id = parse_user_id(user_id_str)?;
    let store = Arc::new(open_store()?);
    let sessions = build_sessions(store)?;

    eprintln!("📱 Sending login code to {}...", phone);
    let started = sessions.start_auth(user_id, phone).await?;

    let code = prompt("Enter the code you received")?;
    if code.is_empty() {
        anyhow::bail!("No code entered");
    }

    match sessions.verify(&started.session_key, &code, None).await {
        Ok(()) => {}
        Err(AuthError::SecondFactorRequired) => {
            // The pending login stays parked, so we can retry with the
            // account password on the same attempt.
            let password = prompt("Two-factor password")?;
            if password.is_empty() {
                anyhow::bail!("No password entered");
            }
            sessions
                .verify(&started.session_key, &code, Some(&password))
                .await?;
        }
        Err(e) => return Err(e.into()),
    }

    eprintln!("✅ Telegram session stored for user {}", user_id);
    eprintln!("   Restart the gateway to start listening for messages.");

    sessions.shutdown().await;
    Ok(())
}

/// Execute the `telegram logout` command
pub async fn execute_logout(user_id_str: &str) -> Result<()> {
    let user_id = parse_user_id(user_id_str)?;
    let store = open_store()?;

    if store.get_user(user_id)?.is_none() {
        anyhow::bail!("User not found: {}", user_id);
    }
    store.clear_telegram_session(user_id)?;

    eprintln!("✅ Telegram session cleared for user {}", user_id);
    eprintln!("   A running gateway keeps its live connection until restarted.");
    Ok(())
}
