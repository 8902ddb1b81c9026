//! Configuration for the intake service.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (INTAKE_HOME, OPENAI_API_KEY, ...)
//! 2. Config file (.intake/config.yaml)
//! 3. Defaults (~/.intake)
//!
//! Config file discovery:
//! - Searches current directory and parents for .intake/config.yaml
//! - The database path in the config file is relative to the config file's
//!   parent directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::ingest::supervisor::{DEFAULT_POLL_INTERVAL, DEFAULT_RESYNC_INTERVAL};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub openai: Option<OpenAiConfig>,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub google: Option<GoogleConfig>,
    #[serde(default)]
    pub polling: Option<PollingConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// Database file (relative to config file)
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub whisper_language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub gateway_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    pub resync_interval_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
}

/// Resolved configuration with absolute paths and applied defaults
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the intake home (state directory)
    pub home: PathBuf,
    /// Absolute path to the sqlite database
    pub db_path: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// OpenAI API key, shared by classification and transcription
    pub openai_api_key: Option<String>,
    /// Language hint for audio-file transcription
    pub whisper_language: Option<String>,
    /// Telegram Bot API token
    pub telegram_bot_token: Option<String>,
    /// Base URL of the Telegram gateway for user-account sessions
    pub telegram_gateway_url: Option<String>,
    /// Google OAuth application, present only when fully configured
    pub google: Option<GoogleSettings>,
    /// Poll scheduling
    pub polling: PollingSettings,
}

#[derive(Debug, Clone)]
pub struct GoogleSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone)]
pub struct PollingSettings {
    pub resync_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ResolvedConfig {
    /// Lock file taken by `serve` so only one instance runs per home.
    pub fn lock_path(&self) -> PathBuf {
        self.home.join("intake.lock")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".intake").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Environment value, with empty strings treated as unset
fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".intake");

    let config_file = find_config_file();
    let file = match &config_file {
        Some(path) => Some(load_config_file(path)?),
        None => None,
    };

    // Base directory is the parent of .intake/ (i.e., grandparent of config.yaml)
    let base_dir = config_file
        .as_ref()
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .map(Path::to_path_buf);

    let home = env_override("INTAKE_HOME")
        .map(PathBuf::from)
        .unwrap_or(default_home);

    let file_db = file
        .as_ref()
        .and_then(|f| f.database.path.as_deref())
        .zip(base_dir.as_deref());
    let db_path = match (env_override("INTAKE_DB"), file_db) {
        (Some(env_db), _) => PathBuf::from(env_db),
        (None, Some((path, base))) => resolve_path(base, path),
        (None, None) => home.join("intake.db"),
    };

    let openai = file.as_ref().and_then(|f| f.openai.as_ref());
    let telegram = file.as_ref().and_then(|f| f.telegram.as_ref());
    let google_cfg = file.as_ref().and_then(|f| f.google.as_ref());
    let polling_cfg = file.as_ref().and_then(|f| f.polling.as_ref());

    let openai_api_key =
        env_override("OPENAI_API_KEY").or_else(|| openai.and_then(|o| o.api_key.clone()));
    let whisper_language = env_override("OPENAI_WHISPER_LANGUAGE")
        .or_else(|| openai.and_then(|o| o.whisper_language.clone()));

    let telegram_bot_token = env_override("TELEGRAM_BOT_TOKEN")
        .or_else(|| telegram.and_then(|t| t.bot_token.clone()));
    let telegram_gateway_url = env_override("TELEGRAM_GATEWAY_URL")
        .or_else(|| telegram.and_then(|t| t.gateway_url.clone()));

    let google_client_id = env_override("GOOGLE_CLIENT_ID")
        .or_else(|| google_cfg.and_then(|g| g.client_id.clone()));
    let google_client_secret = env_override("GOOGLE_CLIENT_SECRET")
        .or_else(|| google_cfg.and_then(|g| g.client_secret.clone()));
    let google_redirect_uri = env_override("GOOGLE_REDIRECT_URI")
        .or_else(|| google_cfg.and_then(|g| g.redirect_uri.clone()))
        .unwrap_or_else(|| "http://localhost:8085/callback".to_string());

    // Google is all-or-nothing: without both halves of the client the
    // provider stays disabled
    let google = match (google_client_id, google_client_secret) {
        (Some(client_id), Some(client_secret)) => Some(GoogleSettings {
            client_id,
            client_secret,
            redirect_uri: google_redirect_uri,
        }),
        _ => None,
    };

    let defaults = PollingSettings::default();
    let polling = PollingSettings {
        resync_interval: polling_cfg
            .and_then(|p| p.resync_interval_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.resync_interval),
        poll_interval: polling_cfg
            .and_then(|p| p.poll_interval_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval),
    };

    Ok(ResolvedConfig {
        home,
        db_path,
        config_file,
        openai_api_key,
        whisper_language,
        telegram_bot_token,
        telegram_gateway_url,
        google,
        polling,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Get the intake home directory (state and lock files).
pub fn intake_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the sqlite database path.
pub fn db_path() -> Result<PathBuf> {
    Ok(config()?.db_path.clone())
}
