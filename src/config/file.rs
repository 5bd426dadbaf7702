//! TOML configuration file schema
//!
//! The file lives at `~/.config/jarvis/config.toml` unless overridden.
//! Every field is optional here; required keys are enforced when the file is
//! resolved into [`Config`](super::Config).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JarvisConfigFile {
    /// Operating mode ("balanced" or "low-power")
    pub mode: Option<String>,

    /// Assistant and user names (rewritten by the rename handler)
    #[serde(default)]
    pub identity: IdentityFileConfig,

    /// Wake word configuration
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Command capture / endpointing configuration
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Barge-in configuration
    #[serde(default)]
    pub barge_in: BargeInFileConfig,

    /// Whitelist dispatch configuration
    #[serde(default)]
    pub dispatch: DispatchFileConfig,

    /// Speech-to-text configuration
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech output configuration
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Optional speaker verification
    pub speaker: Option<SpeakerFileConfig>,

    /// Ordered intent keyword table (replaces the built-in table when present)
    pub intents: Option<Vec<IntentFileConfig>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IdentityFileConfig {
    pub assistant_name: Option<String>,
    pub user_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Path to the keyword model (`.rpw`)
    pub keyword_path: Option<String>,
    /// Detection sensitivity in [0.0, 1.0]; higher is more sensitive
    pub sensitivity: Option<f32>,
    /// Seconds to listen before re-arming
    pub timeout_secs: Option<u64>,
    /// Spoken right after the wake word; empty disables it
    pub acknowledgement: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub max_duration_secs: Option<u64>,
    pub max_silence_frames: Option<u32>,
    pub frame_ms: Option<u32>,
    /// "webrtc" or "energy"
    pub vad_backend: Option<String>,
    /// WebRTC aggressiveness, 0-3
    pub vad_mode: Option<u8>,
    pub energy_threshold: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BargeInFileConfig {
    pub enabled: Option<bool>,
    pub min_speech_frames: Option<u32>,
    /// "capture" or "wake"
    pub after_interrupt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DispatchFileConfig {
    pub whitelist_path: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Spoken before a whitelisted command runs; empty disables it
    pub executing_cue: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper-cpp" or "openai"
    pub backend: Option<String>,
    pub binary: Option<String>,
    pub model: Option<String>,
    pub threads: Option<usize>,
    pub language: Option<String>,
    pub timeout_secs: Option<u64>,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// "llama-cpp" or "openai"
    pub backend: Option<String>,
    pub binary: Option<String>,
    pub model: Option<String>,
    pub threads: Option<usize>,
    pub n_predict: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    /// Spoken while the model is thinking; empty disables it
    pub thinking_cue: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    pub piper_binary: Option<String>,
    /// Default voice id
    pub voice: Option<String>,
    /// Voice for renames and apologies (defaults to `voice`)
    pub reply_voice: Option<String>,
    /// Voice for command output and model answers (defaults to `voice`)
    pub answer_voice: Option<String>,
    /// Output sample rate of the Piper voices
    pub sample_rate: Option<u32>,
    /// Voice id -> Piper `.onnx` model path
    #[serde(default)]
    pub voices: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct SpeakerFileConfig {
    /// Program and arguments; the WAV path is appended as the last argument
    pub encoder_command: Vec<String>,
    pub voiceprint_path: String,
    pub threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct IntentFileConfig {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Read and parse a config file
///
/// Unlike a best-effort overlay, a file that exists but cannot be parsed is an
/// error: the assistant must not start on a half-understood configuration.
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_config_file(path: &Path) -> Result<JarvisConfigFile> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let config: JarvisConfigFile = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the default config file path: `~/.config/jarvis/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("jarvis").join("config.toml"))
}

/// Expand a leading `~/` to the user's home directory
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}
