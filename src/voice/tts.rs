//! Text-to-speech (TTS) output
//!
//! Piper synthesizes raw 16-bit PCM which is then played through cpal. Both
//! stages can be cut short: synthesis by the cancel signal, playback by
//! [`SpeechOutput::stop`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::barge_in::CancelSignal;
use super::playback::{PlaybackEnd, pcm16_to_f32, play_blocking};
use crate::config::TtsConfig;
use crate::{Error, Result};

/// Speech synthesis and playback
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// Speak `text` with `voice`, returning once the audio has finished or
    /// has been stopped
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&self, text: &str, voice: &str, cancel: &CancelSignal) -> Result<()>;

    /// Force the current playback to stop
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotPlaying`] if nothing is being spoken
    fn stop(&self) -> Result<()>;
}

/// Piper TTS played on the default output device
pub struct PiperOutput {
    binary: PathBuf,
    voices: BTreeMap<String, PathBuf>,
    default_sample_rate: u32,
    active: Mutex<Option<Arc<AtomicBool>>>,
}

impl PiperOutput {
    /// Create an output from the TTS settings
    #[must_use]
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            binary: config.piper_binary.clone(),
            voices: config.voices.clone(),
            default_sample_rate: config.sample_rate,
            active: Mutex::new(None),
        }
    }

    fn model_for(&self, voice: &str) -> Result<&Path> {
        self.voices
            .get(voice)
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::Tts(format!("unknown voice: {voice}")))
    }

    /// Sample rate from the voice's `.onnx.json` sidecar, if readable
    fn sample_rate_for(&self, model: &Path) -> u32 {
        let mut sidecar = model.as_os_str().to_owned();
        sidecar.push(".json");

        std::fs::read_to_string(&sidecar)
            .ok()
            .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
            .and_then(|v| v["audio"]["sample_rate"].as_u64())
            .and_then(|r| u32::try_from(r).ok())
            .unwrap_or(self.default_sample_rate)
    }

    /// Run piper and collect raw PCM
    async fn synthesize(&self, text: &str, model: &Path) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.binary)
            .arg("--model")
            .arg(model)
            .arg("--output_raw")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Tts(format!("failed to spawn {}: {e}", self.binary.display())))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::Tts(format!(
                "piper exited with code {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        Ok(output.stdout)
    }

    fn set_active(&self, flag: Option<Arc<AtomicBool>>) {
        match self.active.lock() {
            Ok(mut active) => *active = flag,
            Err(poisoned) => *poisoned.into_inner() = flag,
        }
    }
}

#[async_trait]
impl SpeechOutput for PiperOutput {
    async fn speak(&self, text: &str, voice: &str, cancel: &CancelSignal) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let model = self.model_for(voice)?;
        let sample_rate = self.sample_rate_for(model);

        let stop = Arc::new(AtomicBool::new(false));
        self.set_active(Some(Arc::clone(&stop)));

        tracing::debug!(voice, chars = text.len(), "synthesizing");

        let pcm = tokio::select! {
            pcm = self.synthesize(text, model) => pcm,
            () = cancel.cancelled() => {
                // Dropping the synthesis future kills piper
                self.set_active(None);
                tracing::debug!("synthesis cancelled");
                return Ok(());
            }
        };

        let pcm = match pcm {
            Ok(pcm) => pcm,
            Err(e) => {
                self.set_active(None);
                return Err(e);
            }
        };

        if cancel.is_raised() || stop.load(Ordering::Acquire) {
            self.set_active(None);
            return Ok(());
        }

        let samples = pcm16_to_f32(&pcm);
        let flag = Arc::clone(&stop);
        let played = tokio::task::spawn_blocking(move || play_blocking(samples, sample_rate, &flag)).await;
        self.set_active(None);

        match played {
            Ok(Ok(PlaybackEnd::Finished)) => Ok(()),
            Ok(Ok(PlaybackEnd::Stopped)) => {
                tracing::debug!("playback stopped early");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(e) => Err(Error::Audio(format!("playback task failed: {e}"))),
        }
    }

    fn stop(&self) -> Result<()> {
        let active = match self.active.lock() {
            Ok(active) => active.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        let flag = active.ok_or(Error::NotPlaying)?;
        flag.store(true, Ordering::Release);
        tracing::debug!("output stop requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(dir: &Path) -> PiperOutput {
        let mut voices = BTreeMap::new();
        voices.insert("en".to_string(), dir.join("en_US-amy.onnx"));
        PiperOutput::new(&TtsConfig {
            piper_binary: PathBuf::from("piper"),
            voice: "en".to_string(),
            reply_voice: "en".to_string(),
            answer_voice: "en".to_string(),
            sample_rate: 22050,
            voices,
        })
    }

    #[test]
    fn test_stop_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(output(dir.path()).stop(), Err(Error::NotPlaying)));
    }

    #[test]
    fn test_sample_rate_from_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let out = output(dir.path());
        let model = dir.path().join("en_US-amy.onnx");

        assert_eq!(out.sample_rate_for(&model), 22050);

        std::fs::write(dir.path().join("en_US-amy.onnx.json"), r#"{"audio": {"sample_rate": 16000}}"#)
            .unwrap();
        assert_eq!(out.sample_rate_for(&model), 16000);
    }

    #[tokio::test]
    async fn test_unknown_voice() {
        let dir = tempfile::tempdir().unwrap();
        let result = output(dir.path()).speak("hello", "fr", &CancelSignal::new()).await;
        assert!(matches!(result, Err(Error::Tts(_))));
    }

    #[tokio::test]
    async fn test_empty_text_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        output(dir.path()).speak("  ", "en", &CancelSignal::new()).await.unwrap();
    }
}
