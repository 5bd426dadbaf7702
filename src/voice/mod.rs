//! Voice processing module
//!
//! Microphone capture, wake word gating, endpointing, transcription,
//! speech output with barge-in, and speaker verification.

mod barge_in;
mod capture;
mod endpoint;
mod frame;
mod playback;
mod spotter;
mod stt;
mod tts;
mod vad;
mod verify;
mod wake_word;

pub use barge_in::{BargeIn, BargeInOutcome, CancelSignal};
pub use capture::{MicCapture, SAMPLE_RATE};
pub use endpoint::{DEFAULT_MAX_SILENCE_FRAMES, Endpointer};
pub use frame::{AudioFrame, FrameSource, Utterance, samples_to_wav};
pub use playback::{PlaybackEnd, pcm16_to_f32, play_blocking};
pub use spotter::{KeywordSpotter, RustpotterSpotter};
pub use stt::{Transcriber, WhisperApi, WhisperCpp, clean_transcript, create_transcriber};
pub use tts::{PiperOutput, SpeechOutput};
pub use vad::{DEFAULT_ENERGY_THRESHOLD, EnergyVad, VoiceActivity, WebRtcVad, create_vad};
pub use verify::{CommandEncoder, SpeakerEncoder, SpeakerVerifier, cosine_similarity, enroll, load_voiceprint};
pub use wake_word::WakeGate;
