//! Voice and audio transcription via the Whisper API.
//!
//! Voice notes arrive as Opus (.oga) and get converted to mono wav with
//! ffmpeg before upload. Transcription is best-effort: every failure path
//! logs and returns `None` so ingestion can skip the message.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use reqwest::multipart;
use tokio::process::Command;
use tracing::{error, info, warn};

const TRANSCRIPTIONS_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const WHISPER_MODEL: &str = "whisper-1";

/// Whisper-backed transcriber
pub struct Transcriber {
    api_key: Option<String>,
    language: Option<String>,
    http: reqwest::Client,
}

impl Transcriber {
    /// Create a transcriber. `language` is the hint applied to audio file
    /// attachments; voice notes are transcribed without one.
    pub fn new(api_key: Option<String>, language: Option<String>) -> Self {
        if api_key.is_none() {
            warn!("OpenAI API key not configured, transcription disabled");
        }
        Self {
            api_key,
            language,
            http: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Transcribe an audio file. Returns `None` on any failure.
    pub async fn transcribe_audio(&self, path: &Path, language: Option<&str>) -> Option<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            error!("transcriber has no API key");
            return None;
        };

        match self.request_transcription(api_key, path, language).await {
            Ok(text) => {
                info!(path = %path.display(), "transcribed audio file");
                Some(text)
            }
            Err(e) => {
                error!("transcription failed: {e:#}");
                None
            }
        }
    }

    /// Convert a voice note to mono wav and transcribe it.
    pub async fn transcribe_voice(&self, path: &Path) -> Option<String> {
        if self.api_key.is_none() {
            error!("transcriber has no API key");
            return None;
        }

        let temp = match tempfile::tempdir() {
            Ok(t) => t,
            Err(e) => {
                error!("failed to create temp dir: {e}");
                return None;
            }
        };

        let wav_path = temp.path().join("voice.wav");
        if let Err(e) = convert_to_wav(path, &wav_path).await {
            error!("voice conversion failed: {e:#}");
            return None;
        }

        // temp dir (and the wav) removed on drop
        self.transcribe_audio(&wav_path, None).await
    }

    /// Transcribe a downloaded voice note payload.
    pub async fn transcribe_voice_payload(&self, payload: &[u8]) -> Option<String> {
        let temp = match tempfile::tempdir() {
            Ok(t) => t,
            Err(e) => {
                error!("failed to create temp dir: {e}");
                return None;
            }
        };

        let voice_path = temp.path().join("voice.oga");
        if let Err(e) = tokio::fs::write(&voice_path, payload).await {
            error!("failed to write voice payload: {e}");
            return None;
        }

        self.transcribe_voice(&voice_path).await
    }

    /// Transcribe a downloaded audio attachment, applying the configured
    /// language hint.
    pub async fn transcribe_audio_payload(&self, payload: &[u8]) -> Option<String> {
        let temp = match tempfile::tempdir() {
            Ok(t) => t,
            Err(e) => {
                error!("failed to create temp dir: {e}");
                return None;
            }
        };

        let audio_path = temp.path().join("audio.mp3");
        if let Err(e) = tokio::fs::write(&audio_path, payload).await {
            error!("failed to write audio payload: {e}");
            return None;
        }

        self.transcribe_audio(&audio_path, self.language.as_deref())
            .await
    }

    async fn request_transcription(
        &self,
        api_key: &str,
        path: &Path,
        language: Option<&str>,
    ) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("model", WHISPER_MODEL)
            .text("response_format", "text");
        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        let response = self
            .http
            .post(TRANSCRIPTIONS_URL)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            anyhow::bail!("transcription returned {status}: {body}");
        }

        Ok(body.trim().to_string())
    }
}

/// Convert any ffmpeg-readable audio file to normalized mono wav.
async fn convert_to_wav(input: &Path, output: &Path) -> Result<()> {
    let result = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-ac", "1", "-af", "loudnorm"])
        .arg(output)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("failed to run ffmpeg")?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        anyhow::bail!("ffmpeg failed: {stderr}");
    }

    Ok(())
}
