//! Configuration management
//!
//! The TOML file is read once at startup and resolved (env > toml > default)
//! into a validated [`Config`]. Missing required keys fail fast.

pub mod file;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

pub use file::{JarvisConfigFile, config_file_path, expand_home};

use crate::identity::Names;
use crate::intent::{IntentRule, default_intents};
use crate::{Error, Result};

/// Operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Full feature set including the language model fallback
    #[default]
    Balanced,
    /// Restricted: free-form requests get a fixed apology instead of the LLM
    LowPower,
}

impl Mode {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "balanced" => Ok(Self::Balanced),
            "low-power" | "low_power" => Ok(Self::LowPower),
            other => Err(Error::Config(format!("unknown mode: {other}"))),
        }
    }
}

/// Where the turn loop goes after the user barges in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AfterInterrupt {
    /// Resume directly into command capture (the user is already talking)
    #[default]
    Capture,
    /// Go back to waiting for the wake word
    Wake,
}

impl AfterInterrupt {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "capture" => Ok(Self::Capture),
            "wake" => Ok(Self::Wake),
            other => Err(Error::Config(format!(
                "barge_in.after_interrupt must be \"capture\" or \"wake\", got {other:?}"
            ))),
        }
    }
}

/// VAD backend choice
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadBackend {
    /// WebRTC VAD with a fixed aggressiveness mode (0-3)
    WebRtc { mode: u8 },
    /// RMS energy threshold
    Energy { threshold: f32 },
}

/// Speech-to-text backend choice
#[derive(Debug, Clone)]
pub enum SttBackend {
    /// Local whisper.cpp CLI
    WhisperCpp {
        binary: PathBuf,
        model: PathBuf,
        threads: usize,
        language: String,
    },
    /// `OpenAI`-compatible transcription API
    OpenAi {
        url: String,
        model: String,
        api_key: SecretString,
    },
}

/// Language model backend choice
#[derive(Debug, Clone)]
pub enum LlmBackend {
    /// Local llama.cpp CLI
    LlamaCpp {
        binary: PathBuf,
        model: PathBuf,
        threads: usize,
        n_predict: u32,
        temperature: f32,
    },
    /// `OpenAI`-compatible chat completion API
    OpenAi {
        url: String,
        model: String,
        api_key: SecretString,
    },
}

/// Wake word settings
#[derive(Debug, Clone)]
pub struct WakeConfig {
    pub keyword_path: PathBuf,
    pub sensitivity: f32,
    pub timeout: Duration,
    pub acknowledgement: Option<String>,
}

/// Endpointing settings
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub max_duration: Duration,
    pub max_silence_frames: u32,
    pub frame_ms: u32,
    pub vad: VadBackend,
}

impl CaptureConfig {
    /// Samples per VAD frame at the capture sample rate
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        (crate::voice::SAMPLE_RATE * self.frame_ms / 1000) as usize
    }
}

/// Barge-in settings
#[derive(Debug, Clone)]
pub struct BargeInConfig {
    pub enabled: bool,
    pub min_speech_frames: u32,
    pub after_interrupt: AfterInterrupt,
}

/// Whitelist dispatch settings
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub whitelist_path: PathBuf,
    pub timeout: Duration,
    pub executing_cue: Option<String>,
}

/// Speech-to-text settings
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub backend: SttBackend,
    pub timeout: Duration,
}

/// Language model settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub timeout: Duration,
    pub thinking_cue: Option<String>,
}

/// Speech output settings
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub piper_binary: PathBuf,
    /// Default voice (CLI `say`, fallback for the two below)
    pub voice: String,
    /// Renames, apologies and the thinking cue
    pub reply_voice: String,
    /// Greeting, command output and language model answers
    pub answer_voice: String,
    pub sample_rate: u32,
    pub voices: BTreeMap<String, PathBuf>,
}

/// Speaker verification settings
#[derive(Debug, Clone)]
pub struct SpeakerConfig {
    pub encoder_command: Vec<String>,
    pub voiceprint_path: PathBuf,
    pub threshold: f32,
}

/// Jarvis configuration, validated once at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// File the configuration was loaded from (names are persisted back here)
    pub config_path: PathBuf,
    pub mode: Mode,
    pub names: Names,
    pub wake: WakeConfig,
    pub capture: CaptureConfig,
    pub barge_in: BargeInConfig,
    pub dispatch: DispatchConfig,
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub speaker: Option<SpeakerConfig>,
    /// Ordered intent table; earlier rules win
    pub intents: Vec<IntentRule>,
}

/// Directory that holds the assistant's local tools (`~/jarvis`)
fn jarvis_home() -> PathBuf {
    directories::BaseDirs::new().map_or_else(|| PathBuf::from("jarvis"), |d| d.home_dir().join("jarvis"))
}

fn default_threads(reserve: usize) -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    cpus.saturating_sub(reserve).max(1)
}

fn optional_cue(value: Option<String>, default: &str) -> Option<String> {
    let cue = value.unwrap_or_else(|| default.to_string());
    if cue.trim().is_empty() { None } else { Some(cue) }
}

impl Config {
    /// Load configuration from `path`, or from the default location
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing, unparsable, or lacks required keys
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_file_path()
                .ok_or_else(|| Error::Config("cannot determine config directory".to_string()))?,
        };

        let fc = file::load_config_file(&path)?;
        Self::resolve(fc, path)
    }

    /// Resolve a parsed config file against the process environment
    ///
    /// # Errors
    ///
    /// Returns error if required keys are missing or values are out of range
    pub fn resolve(fc: JarvisConfigFile, config_path: PathBuf) -> Result<Self> {
        Self::resolve_with_env(fc, config_path, |key| std::env::var(key).ok())
    }

    /// Resolve a parsed config file, reading overrides through `env`
    ///
    /// # Errors
    ///
    /// Returns error if required keys are missing or values are out of range
    #[allow(clippy::too_many_lines)]
    pub fn resolve_with_env(
        fc: JarvisConfigFile,
        config_path: PathBuf,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let home = jarvis_home();
        let config_dir = config_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let mode = match env("JARVIS_MODE").or(fc.mode) {
            Some(m) => Mode::parse(&m)?,
            None => Mode::default(),
        };

        let names = Names {
            assistant: fc.identity.assistant_name.unwrap_or_else(|| "Jarvis".to_string()),
            user: fc.identity.user_name.unwrap_or_else(|| "Sir".to_string()),
        };

        // Wake word (keyword model is required)
        let keyword_path = env("JARVIS_KEYWORD_PATH")
            .or(fc.wake.keyword_path)
            .map(|p| expand_home(&p))
            .ok_or_else(|| Error::Config("wake.keyword_path is required".to_string()))?;
        let sensitivity = fc.wake.sensitivity.unwrap_or(0.75);
        if !(0.0..=1.0).contains(&sensitivity) {
            return Err(Error::Config(format!(
                "wake.sensitivity must be within 0.0..=1.0, got {sensitivity}"
            )));
        }
        let wake = WakeConfig {
            keyword_path,
            sensitivity,
            timeout: Duration::from_secs(fc.wake.timeout_secs.unwrap_or(30)),
            acknowledgement: optional_cue(fc.wake.acknowledgement, "Yes?"),
        };

        // Endpointing
        let frame_ms = fc.capture.frame_ms.unwrap_or(30);
        if !matches!(frame_ms, 10 | 20 | 30) {
            return Err(Error::Config(format!(
                "capture.frame_ms must be 10, 20 or 30, got {frame_ms}"
            )));
        }
        let vad = match fc.capture.vad_backend.as_deref().unwrap_or("webrtc") {
            "webrtc" => {
                let mode = fc.capture.vad_mode.unwrap_or(3);
                if mode > 3 {
                    return Err(Error::Config(format!("capture.vad_mode must be 0-3, got {mode}")));
                }
                VadBackend::WebRtc { mode }
            }
            "energy" => VadBackend::Energy {
                threshold: fc.capture.energy_threshold.unwrap_or(crate::voice::DEFAULT_ENERGY_THRESHOLD),
            },
            other => return Err(Error::Config(format!("unknown VAD backend: {other}"))),
        };
        let capture = CaptureConfig {
            max_duration: Duration::from_secs(fc.capture.max_duration_secs.unwrap_or(7)),
            max_silence_frames: fc.capture.max_silence_frames.unwrap_or(crate::voice::DEFAULT_MAX_SILENCE_FRAMES),
            frame_ms,
            vad,
        };

        let barge_in = BargeInConfig {
            enabled: fc.barge_in.enabled.unwrap_or(true),
            min_speech_frames: fc.barge_in.min_speech_frames.unwrap_or(1).max(1),
            after_interrupt: match fc.barge_in.after_interrupt {
                Some(s) => AfterInterrupt::parse(&s)?,
                None => AfterInterrupt::default(),
            },
        };

        let dispatch = DispatchConfig {
            whitelist_path: fc
                .dispatch
                .whitelist_path
                .map_or_else(|| config_dir.join("whitelist.yml"), |p| expand_home(&p)),
            timeout: Duration::from_secs(fc.dispatch.timeout_secs.unwrap_or(30)),
            executing_cue: optional_cue(fc.dispatch.executing_cue, "Executing."),
        };

        // Speech-to-text (env > toml > default)
        let stt_backend = match fc.stt.backend.as_deref().unwrap_or("whisper-cpp") {
            "whisper-cpp" => SttBackend::WhisperCpp {
                binary: fc.stt.binary.map_or_else(
                    || home.join("whisper.cpp").join("build").join("bin").join("whisper-cli"),
                    |p| expand_home(&p),
                ),
                model: fc.stt.model.map_or_else(
                    || home.join("whisper.cpp").join("models").join("ggml-tiny.bin"),
                    |p| expand_home(&p),
                ),
                threads: fc.stt.threads.unwrap_or_else(|| (default_threads(0) / 2).max(1)),
                language: fc.stt.language.unwrap_or_else(|| "auto".to_string()),
            },
            "openai" => SttBackend::OpenAi {
                url: fc
                    .stt
                    .api_url
                    .unwrap_or_else(|| "https://api.openai.com/v1/audio/transcriptions".to_string()),
                model: fc.stt.model.unwrap_or_else(|| "whisper-1".to_string()),
                api_key: env("OPENAI_API_KEY")
                    .or(fc.stt.api_key)
                    .map(SecretString::from)
                    .ok_or_else(|| Error::Config("stt.api_key (or OPENAI_API_KEY) is required".to_string()))?,
            },
            other => return Err(Error::Config(format!("unknown STT backend: {other}"))),
        };
        let stt = SttConfig {
            backend: stt_backend,
            timeout: Duration::from_secs(fc.stt.timeout_secs.unwrap_or(120)),
        };

        // Language model (env > toml > default)
        let llm_backend = match fc.llm.backend.as_deref().unwrap_or("llama-cpp") {
            "llama-cpp" => LlmBackend::LlamaCpp {
                binary: fc.llm.binary.map_or_else(
                    || home.join("llama.cpp").join("build").join("bin").join("llama-cli"),
                    |p| expand_home(&p),
                ),
                model: fc.llm.model.map_or_else(
                    || home.join("llama.cpp").join("models").join("mistral-7b-openhermes.Q4_K_M.gguf"),
                    |p| expand_home(&p),
                ),
                threads: fc.llm.threads.unwrap_or_else(|| default_threads(1)),
                n_predict: fc.llm.n_predict.unwrap_or(64),
                temperature: fc.llm.temperature.unwrap_or(0.7),
            },
            "openai" => LlmBackend::OpenAi {
                url: fc
                    .llm
                    .api_url
                    .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
                model: fc.llm.model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
                api_key: env("OPENAI_API_KEY")
                    .or(fc.llm.api_key)
                    .map(SecretString::from)
                    .ok_or_else(|| Error::Config("llm.api_key (or OPENAI_API_KEY) is required".to_string()))?,
            },
            other => return Err(Error::Config(format!("unknown LLM backend: {other}"))),
        };
        let llm = LlmConfig {
            backend: llm_backend,
            timeout: Duration::from_secs(fc.llm.timeout_secs.unwrap_or(30)),
            thinking_cue: optional_cue(fc.llm.thinking_cue, "Let me think."),
        };

        // Speech output
        let mut voices: BTreeMap<String, PathBuf> = fc
            .tts
            .voices
            .into_iter()
            .map(|(id, path)| (id, expand_home(&path)))
            .collect();
        if voices.is_empty() {
            voices.insert(
                "en_m".to_string(),
                home.join("piper").join("en_GB-alan-medium.onnx"),
            );
        }
        let voice = env("JARVIS_VOICE")
            .or(fc.tts.voice)
            .unwrap_or_else(|| "en_m".to_string());
        let reply_voice = env("JARVIS_REPLY_VOICE")
            .or(fc.tts.reply_voice)
            .unwrap_or_else(|| voice.clone());
        let answer_voice = env("JARVIS_ANSWER_VOICE")
            .or(fc.tts.answer_voice)
            .unwrap_or_else(|| voice.clone());
        for (key, id) in [("voice", &voice), ("reply_voice", &reply_voice), ("answer_voice", &answer_voice)] {
            if !voices.contains_key(id) {
                return Err(Error::Config(format!(
                    "tts.{key} {id:?} has no entry in [tts.voices]"
                )));
            }
        }
        let tts = TtsConfig {
            piper_binary: fc
                .tts
                .piper_binary
                .map_or_else(|| home.join("piper").join("piper"), |p| expand_home(&p)),
            voice,
            reply_voice,
            answer_voice,
            sample_rate: fc.tts.sample_rate.unwrap_or(22_050),
            voices,
        };

        let speaker = match fc.speaker {
            Some(s) => {
                if s.encoder_command.is_empty() {
                    return Err(Error::Config("speaker.encoder_command must not be empty".to_string()));
                }
                Some(SpeakerConfig {
                    encoder_command: s.encoder_command,
                    voiceprint_path: expand_home(&s.voiceprint_path),
                    threshold: s.threshold.unwrap_or(0.75),
                })
            }
            None => None,
        };

        let intents = match fc.intents {
            Some(rules) => rules
                .into_iter()
                .map(|r| IntentRule::new(r.name, r.keywords))
                .collect(),
            None => default_intents(),
        };

        Ok(Self {
            config_path,
            mode,
            names,
            wake,
            capture,
            barge_in,
            dispatch,
            stt,
            llm,
            tts,
            speaker,
            intents,
        })
    }
}
