//! Keyword spotting backends

use std::path::Path;

use rustpotter::{Rustpotter, RustpotterConfig, SampleFormat};

use super::frame::AudioFrame;
use crate::{Error, Result};

/// Frame-by-frame wake phrase detector
///
/// Resources are released when the spotter is dropped.
pub trait KeywordSpotter {
    /// Feed one frame; returns the index of the detected keyword, if any
    ///
    /// # Errors
    ///
    /// Returns error if the frame cannot be processed
    fn process(&mut self, frame: &AudioFrame) -> Result<Option<usize>>;

    /// Samples per frame the spotter expects
    fn frame_length(&self) -> usize;

    /// Sample rate the spotter expects
    fn sample_rate(&self) -> u32;
}

/// Rustpotter wake word detector with a single keyword model
pub struct RustpotterSpotter {
    detector: Rustpotter,
    sample_rate: u32,
}

impl RustpotterSpotter {
    /// Load a `.rpw` keyword model
    ///
    /// `sensitivity` in [0, 1] becomes the detection threshold; higher values
    /// make detection stricter.
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot be loaded
    pub fn new(keyword_path: &Path, sensitivity: f32, sample_rate: u32) -> Result<Self> {
        let path = keyword_path
            .to_str()
            .ok_or_else(|| Error::WakeWord("keyword path is not valid UTF-8".to_string()))?;

        let mut config = RustpotterConfig::default();
        config.fmt.sample_rate = sample_rate as usize;
        config.fmt.channels = 1;
        config.fmt.sample_format = SampleFormat::F32;
        config.detector.threshold = sensitivity;

        let mut detector = Rustpotter::new(&config)
            .map_err(|e| Error::WakeWord(format!("failed to create detector: {e}")))?;
        detector
            .add_wakeword_from_file("wake", path)
            .map_err(|e| Error::WakeWord(format!("failed to load {path}: {e}")))?;

        tracing::info!(
            keyword = %keyword_path.display(),
            sensitivity,
            frame_len = detector.get_samples_per_frame(),
            "wake word detector loaded"
        );

        Ok(Self {
            detector,
            sample_rate,
        })
    }
}

impl KeywordSpotter for RustpotterSpotter {
    fn process(&mut self, frame: &AudioFrame) -> Result<Option<usize>> {
        let expected = self.detector.get_samples_per_frame();
        if frame.len() != expected {
            return Err(Error::WakeWord(format!(
                "expected {expected} samples, got {}",
                frame.len()
            )));
        }

        Ok(self.detector.process_samples(frame.samples.clone()).map(|detection| {
            tracing::debug!(name = %detection.name, "keyword detected");
            0
        }))
    }

    fn frame_length(&self) -> usize {
        self.detector.get_samples_per_frame()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = RustpotterSpotter::new(&dir.path().join("jarvis.rpw"), 0.75, 16000);
        assert!(matches!(result, Err(Error::WakeWord(_))));
    }
}
