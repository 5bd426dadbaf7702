//! Jarvis Core - real-time control core for a local voice assistant
//!
//! This library provides the interaction loop of a wake-word driven,
//! fully offline voice assistant:
//! - Wake word gating and utterance endpointing
//! - Whitelisted command dispatch with speaker verification
//! - Speech output that the user can interrupt (barge-in)
//! - The turn controller tying them together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Turn Controller                     │
//! │  Idle → AwaitingWake → Capturing → Transcribing      │
//! │        → Resolving → Responding → AwaitingWake       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   Wake Gate  │  Endpointer  │  Barge-in  │ Dispatch  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │  Mic  │  VAD  │  Spotter  │  STT  │  LLM  │  TTS     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod intent;
pub mod llm;
pub mod selftest;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use dispatch::{DispatchGate, DispatchResult, Whitelist, WhitelistEntry};
pub use error::{Error, Result};
pub use identity::{MemoryNameStore, NameStore, Names, TomlNameStore};
pub use intent::{IntentResolver, IntentRule};
pub use llm::{LanguageModel, create_model};
pub use turn::{Collaborators, Response, TurnController, TurnState, VoiceRole};
