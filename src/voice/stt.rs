//! Speech-to-text (STT) processing

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;

use crate::config::{SttBackend, SttConfig};
use crate::{Error, Result};

/// Markers whisper emits instead of text for silent input
const BLANK_MARKERS: [&str; 3] = ["[blank_audio]", "blank_audio", "no speech"];

/// `[00:00:00.000 --> 00:00:02.000]` segment prefixes on whisper stdout
static TIMESTAMP: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[\d{2}:\d{2}:\d{2}\.\d{3} --> \d{2}:\d{2}:\d{2}\.\d{3}\]").ok());

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes a WAV file; returns an empty string when nothing was said
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the WAV file at `wav`
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails or times out
    async fn transcribe(&self, wav: &Path) -> Result<String>;
}

/// Build the configured transcriber
#[must_use]
pub fn create_transcriber(config: &SttConfig) -> Box<dyn Transcriber> {
    match &config.backend {
        SttBackend::WhisperCpp {
            binary,
            model,
            threads,
            language,
        } => Box::new(WhisperCpp {
            binary: binary.clone(),
            model: model.clone(),
            threads: *threads,
            language: language.clone(),
            timeout: config.timeout,
        }),
        SttBackend::OpenAi {
            url,
            model,
            api_key,
        } => Box::new(WhisperApi {
            client: reqwest::Client::new(),
            url: url.clone(),
            model: model.clone(),
            api_key: api_key.clone(),
            timeout: config.timeout,
        }),
    }
}

/// Local whisper.cpp CLI
pub struct WhisperCpp {
    binary: PathBuf,
    model: PathBuf,
    threads: usize,
    language: String,
    timeout: Duration,
}

impl WhisperCpp {
    /// Create a whisper.cpp transcriber
    #[must_use]
    pub const fn new(binary: PathBuf, model: PathBuf, threads: usize, language: String, timeout: Duration) -> Self {
        Self {
            binary,
            model,
            threads,
            language,
            timeout,
        }
    }
}

#[async_trait]
impl Transcriber for WhisperCpp {
    async fn transcribe(&self, wav: &Path) -> Result<String> {
        tracing::debug!(wav = %wav.display(), model = %self.model.display(), "starting whisper.cpp transcription");

        let child = Command::new(&self.binary)
            .arg("-m")
            .arg(&self.model)
            .arg("-f")
            .arg(wav)
            .arg("-t")
            .arg(self.threads.to_string())
            .arg("-l")
            .arg(&self.language)
            .arg("-otxt")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Stt(format!("failed to spawn {}: {e}", self.binary.display())))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout("transcription".to_string(), self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(code = ?output.status.code(), stderr = %stderr.trim(), "whisper.cpp failed");
            return Err(Error::Stt(format!(
                "whisper.cpp exited with code {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        // -otxt writes <wav>.txt next to the input
        let mut txt = wav.as_os_str().to_owned();
        txt.push(".txt");
        let txt = PathBuf::from(txt);

        let raw = match tokio::fs::read_to_string(&txt).await {
            Ok(text) => {
                let _ = tokio::fs::remove_file(&txt).await;
                text
            }
            Err(_) => strip_timestamps(&String::from_utf8_lossy(&output.stdout)),
        };

        let text = clean_transcript(&raw);
        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }
}

/// `OpenAI`-compatible transcription API
pub struct WhisperApi {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: SecretString,
    timeout: Duration,
}

#[async_trait]
impl Transcriber for WhisperApi {
    async fn transcribe(&self, wav: &Path) -> Result<String> {
        let audio = tokio::fs::read(wav).await?;
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper API transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        let text = clean_transcript(&result.text);

        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }
}

/// Remove segment timestamps from whisper stdout
fn strip_timestamps(stdout: &str) -> String {
    match TIMESTAMP.as_ref() {
        Some(re) => re.replace_all(stdout, " ").into_owned(),
        None => stdout.to_string(),
    }
}

/// Collapse whitespace; blank-audio markers become an empty transcript
#[must_use]
pub fn clean_transcript(raw: &str) -> String {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let lower = text.to_lowercase();
    if BLANK_MARKERS.iter().any(|m| lower.contains(m)) {
        return String::new();
    }
    text
}
