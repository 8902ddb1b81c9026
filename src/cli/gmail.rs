//! Gmail CLI subcommands for connecting Google accounts.
//!
//! `connect` walks through the OAuth authorization-code flow, `disconnect`
//! removes the stored connection, and `watch` registers a Pub/Sub push
//! channel for a connected inbox.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::config::{self, GoogleSettings};
use crate::domain::PROVIDER_GOOGLE;
use crate::providers::gmail::{GmailClient, GoogleAuth};

use super::{open_store, parse_user_id};

/// Gmail connection subcommands
#[derive(Subcommand, Debug)]
pub enum GmailCommands {
    /// Connect a Google account (interactive OAuth flow)
    Connect {
        /// User to attach the connection to
        user_id: String,
    },

    /// Remove a user's Google connection
    Disconnect {
        /// User whose connection to remove
        user_id: String,
    },

    /// Register a Pub/Sub push notification watch on the inbox
    Watch {
        /// User whose inbox to watch
        user_id: String,

        /// Pub/Sub topic name (projects/<project>/topics/<topic>)
        #[arg(short, long)]
        topic: String,
    },
}

fn google_settings() -> Result<&'static GoogleSettings> {
    let cfg = config::config()?;
    cfg.google
        .as_ref()
        .context("GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET are not configured")
}

fn build_auth(google: &GoogleSettings) -> GoogleAuth {
    GoogleAuth::new(
        google.client_id.clone(),
        google.client_secret.clone(),
        google.redirect_uri.clone(),
    )
}

/// Execute the `gmail connect` command
pub async fn execute_connect(user_id_str: &str) -> Result<()> {
    let user_id = parse_user_id(user_id_str)?;
    let store = open_store()?;

    if store.get_user(user_id)?.is_none() {
        anyhow::bail!("User not found: {}", user_id);
    }

    let google = google_settings()?;
    let auth = build_auth(google);
    let state = GoogleAuth::generate_state();
    let url = auth.authorize_url(&state)?;

    eprintln!("Open this URL in a browser and authorize access:");
    eprintln!();
    eprintln!("  {}", url);
    eprintln!();
    eprintln!(
        "After approving you will be redirected to {};",
        google.redirect_uri
    );
    eprintln!("copy the value of the 'code' parameter from the address bar.");
    eprintln!();

    eprint!("Authorization code: ");
    io::stderr().flush().ok();
    let mut code = String::new();
    io::stdin()
        .read_line(&mut code)
        .context("Failed to read from stdin")?;
    let code = code.trim();
    if code.is_empty() {
        anyhow::bail!("No authorization code entered");
    }

    let info = auth
        .complete_authorization(&store, user_id, code, None)
        .await?;

    eprintln!("✅ Connected {} for user {}", info.email, user_id);
    eprintln!("   A running gateway starts polling at its next resync.");
    Ok(())
}

/// Execute the `gmail disconnect` command
pub async fn execute_disconnect(user_id_str: &str) -> Result<()> {
    let user_id = parse_user_id(user_id_str)?;
    let store = open_store()?;

    if store.delete_connection(user_id, PROVIDER_GOOGLE)? {
        eprintln!("✅ Google connection removed for user {}", user_id);
        eprintln!("   A running gateway stops polling at its next resync.");
    } else {
        eprintln!("No Google connection found for user {}", user_id);
    }
    Ok(())
}

/// Execute the `gmail watch` command
pub async fn execute_watch(user_id_str: &str, topic: &str) -> Result<()> {
    let user_id = parse_user_id(user_id_str)?;
    let store = Arc::new(open_store()?);

    let google = google_settings()?;
    let client = GmailClient::new(store, build_auth(google));

    let reply = client.setup_watch(user_id, topic).await?;

    eprintln!("✅ Watch registered");
    if let Some(history_id) = reply.history_id {
        println!("History ID: {}", history_id);
    }
    if let Some(expiration) = reply.expiration {
        println!("Expires: {}", expiration);
    }
    Ok(())
}
