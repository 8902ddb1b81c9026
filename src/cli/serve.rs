//! The `serve` command: run the ingestion gateway in the foreground.
//!
//! Starts whichever front doors are configured (Telegram client sessions,
//! the Telegram bot, Gmail polling) and runs until Ctrl-C. Missing
//! credentials disable the matching front door instead of failing startup.

use std::fs::File;
use std::sync::Arc;

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::{info, warn};

use crate::classify::Classifier;
use crate::config;
use crate::ingest::{Ingestor, PollSupervisor};
use crate::providers::gmail::{GmailClient, GoogleAuth};
use crate::providers::telegram::{GatewayConnector, TelegramBot, TelegramSessions};
use crate::transcribe::Transcriber;

/// Execute the `serve` command
pub async fn execute() -> Result<()> {
    let cfg = config::config()?;

    std::fs::create_dir_all(&cfg.home)
        .with_context(|| format!("Failed to create home directory: {}", cfg.home.display()))?;

    // Only one gateway per home directory.
    let lock_path = cfg.lock_path();
    let lock_file = File::create(&lock_path)
        .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
    lock_file.try_lock_exclusive().with_context(|| {
        format!(
            "Another gateway is already running (lock held on {})",
            lock_path.display()
        )
    })?;

    let store = Arc::new(super::open_store()?);
    let classifier = Arc::new(Classifier::new(cfg.openai_api_key.clone()));
    let transcriber = Arc::new(Transcriber::new(
        cfg.openai_api_key.clone(),
        cfg.whisper_language.clone(),
    ));
    let ingestor = Arc::new(Ingestor::new(store.clone(), classifier));

    if cfg.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY not set; using keyword classification, voice messages are skipped");
    }

    let sessions = match cfg.telegram_gateway_url.as_deref() {
        Some(url) => {
            let sessions = Arc::new(TelegramSessions::new(
                Arc::new(GatewayConnector::new(url)),
                store.clone(),
                ingestor.clone(),
                transcriber.clone(),
            ));
            let restored = sessions.restore_all().await;
            info!(restored, "telegram sessions restored");
            Some(sessions)
        }
        None => {
            warn!("TELEGRAM_GATEWAY_URL not set; telegram client sessions disabled");
            None
        }
    };

    let supervisor = match cfg.google.as_ref() {
        Some(google) => {
            let auth = GoogleAuth::new(
                google.client_id.clone(),
                google.client_secret.clone(),
                google.redirect_uri.clone(),
            );
            let mail = Arc::new(GmailClient::new(store.clone(), auth));
            let handle = PollSupervisor::new(store.clone(), mail, ingestor.clone())
                .with_intervals(cfg.polling.resync_interval, cfg.polling.poll_interval)
                .start();
            Some(handle)
        }
        None => {
            warn!("Google credentials not set; gmail polling disabled");
            None
        }
    };

    let bot = match cfg.telegram_bot_token.clone() {
        Some(token) => Some(
            TelegramBot::new(token, store.clone(), ingestor.clone(), transcriber.clone()).start(),
        ),
        None => {
            warn!("TELEGRAM_BOT_TOKEN not set; telegram bot disabled");
            None
        }
    };

    if sessions.is_none() && supervisor.is_none() && bot.is_none() {
        anyhow::bail!(
            "Nothing to serve: configure TELEGRAM_GATEWAY_URL, TELEGRAM_BOT_TOKEN, \
             or Google credentials"
        );
    }

    info!("gateway running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutting down");

    if let Some(bot) = bot {
        bot.stop().await;
    }
    if let Some(supervisor) = supervisor {
        supervisor.stop().await;
    }
    if let Some(sessions) = sessions {
        sessions.shutdown().await;
    }

    // Lock is released when the file handle drops.
    Ok(())
}
