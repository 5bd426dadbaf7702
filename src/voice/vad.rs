//! Voice activity detection
//!
//! Per-frame speech/silence classification. The WebRTC detector only accepts
//! 10, 20 or 30 ms frames at 8/16/32/48 kHz.

use webrtc_vad::{SampleRate, Vad, VadMode};

use super::frame::AudioFrame;
use crate::config::VadBackend;
use crate::{Error, Result};

/// Default RMS threshold for the energy detector
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 0.03;

/// Speech/silence classifier
pub trait VoiceActivity {
    /// Classify one frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame cannot be classified (e.g. wrong length)
    fn is_speech(&mut self, frame: &AudioFrame) -> Result<bool>;
}

/// Build the configured detector
///
/// # Errors
///
/// Returns error if the mode or sample rate is unsupported
pub fn create_vad(backend: VadBackend, sample_rate: u32) -> Result<Box<dyn VoiceActivity>> {
    match backend {
        VadBackend::WebRtc { mode } => Ok(Box::new(WebRtcVad::new(mode, sample_rate)?)),
        VadBackend::Energy { threshold } => Ok(Box::new(EnergyVad::new(threshold))),
    }
}

/// WebRTC voice activity detector with a fixed aggressiveness mode
pub struct WebRtcVad {
    vad: Vad,
    sample_rate: u32,
}

impl WebRtcVad {
    /// Create a detector; `mode` 0 (least) to 3 (most aggressive)
    ///
    /// # Errors
    ///
    /// Returns error if the mode or sample rate is unsupported
    pub fn new(mode: u8, sample_rate: u32) -> Result<Self> {
        let vad_mode = match mode {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            other => return Err(Error::Vad(format!("mode must be 0-3, got {other}"))),
        };
        let rate = match sample_rate {
            8000 => SampleRate::Rate8kHz,
            16000 => SampleRate::Rate16kHz,
            32000 => SampleRate::Rate32kHz,
            48000 => SampleRate::Rate48kHz,
            other => return Err(Error::Vad(format!("unsupported sample rate {other}"))),
        };

        let mut vad = Vad::new();
        vad.set_mode(vad_mode);
        vad.set_sample_rate(rate);

        tracing::debug!(mode, sample_rate, "webrtc vad initialized");
        Ok(Self { vad, sample_rate })
    }

    fn valid_len(&self, len: usize) -> bool {
        let per_ms = (self.sample_rate / 1000) as usize;
        [10, 20, 30].iter().any(|ms| ms * per_ms == len)
    }
}

impl VoiceActivity for WebRtcVad {
    fn is_speech(&mut self, frame: &AudioFrame) -> Result<bool> {
        if !self.valid_len(frame.len()) {
            return Err(Error::Vad(format!(
                "frame of {} samples is not 10/20/30 ms at {} Hz",
                frame.len(),
                self.sample_rate
            )));
        }
        self.vad
            .is_voice_segment(&frame.to_i16())
            .map_err(|()| Error::Vad(format!("classification failed for frame {}", frame.seq)))
    }
}

/// RMS energy threshold detector
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    /// Create a detector; frames with RMS strictly above `threshold` are speech
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl VoiceActivity for EnergyVad {
    fn is_speech(&mut self, frame: &AudioFrame) -> Result<bool> {
        Ok(frame.energy() > self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_vad() {
        let mut vad = EnergyVad::new(0.1);
        assert!(!vad.is_speech(&AudioFrame::new(0, vec![0.0; 480])).unwrap());
        assert!(!vad.is_speech(&AudioFrame::new(1, vec![0.05; 480])).unwrap());
        assert!(vad.is_speech(&AudioFrame::new(2, vec![0.2; 480])).unwrap());
        assert!(!vad.is_speech(&AudioFrame::new(3, Vec::new())).unwrap());
    }

    #[test]
    fn test_webrtc_rejects_bad_config() {
        assert!(WebRtcVad::new(4, 16000).is_err());
        assert!(WebRtcVad::new(3, 44100).is_err());
    }

    #[test]
    fn test_webrtc_rejects_bad_frame_length() {
        let mut vad = WebRtcVad::new(3, 16000).unwrap();
        assert!(vad.is_speech(&AudioFrame::new(0, vec![0.0; 500])).is_err());
    }

    #[test]
    fn test_webrtc_silence() {
        let mut vad = WebRtcVad::new(3, 16000).unwrap();
        assert!(!vad.is_speech(&AudioFrame::new(0, vec![0.0; 480])).unwrap());
    }
}
