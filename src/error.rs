//! Error types for the Jarvis core

use thiserror::Error;

/// Result type alias for Jarvis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice control core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Whitelist could not be loaded or failed validation
    #[error("whitelist error: {0}")]
    Whitelist(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Voice activity detection error
    #[error("vad error: {0}")]
    Vad(String),

    /// Wake word detection error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Language model error
    #[error("llm error: {0}")]
    Llm(String),

    /// Speaker verification error
    #[error("speaker verification error: {0}")]
    Speaker(String),

    /// Playback is not running, so there is nothing to stop
    #[error("no active playback")]
    NotPlaying,

    /// External process exceeded its time budget
    #[error("{0} timed out after {1:?}")]
    Timeout(String, std::time::Duration),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("toml write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}
