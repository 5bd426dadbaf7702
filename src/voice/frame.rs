//! Audio frames, utterances, and the microphone seam

use std::path::Path;

use async_trait::async_trait;

use crate::{Error, Result};

/// A fixed-length block of mono PCM samples in [-1, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Sequence number assigned by the capture source, strictly increasing
    pub seq: u64,
    /// Samples
    pub samples: Vec<f32>,
}

impl AudioFrame {
    /// Create a frame
    #[must_use]
    pub const fn new(seq: u64, samples: Vec<f32>) -> Self {
        Self { seq, samples }
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame has no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples converted to 16-bit PCM
    #[must_use]
    pub fn to_i16(&self) -> Vec<i16> {
        self.samples.iter().map(|&s| to_i16(s)).collect()
    }

    /// RMS energy of the frame
    #[must_use]
    pub fn energy(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s * s).sum();
        #[allow(clippy::cast_precision_loss)]
        let len = self.samples.len() as f32;
        (sum / len).sqrt()
    }
}

/// A captured command utterance
///
/// Never empty, and always contains at least one frame classified as speech.
#[derive(Debug, Clone)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
    speech_frames: usize,
}

impl Utterance {
    /// Finalize buffered frames into an utterance
    ///
    /// Returns `None` if there are no frames or none of them was speech.
    #[must_use]
    pub fn new(frames: Vec<AudioFrame>, speech_frames: usize) -> Option<Self> {
        (!frames.is_empty() && speech_frames > 0).then_some(Self {
            frames,
            speech_frames,
        })
    }

    /// Frames in capture order
    #[must_use]
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    /// How many frames were classified as speech
    #[must_use]
    pub const fn speech_frames(&self) -> usize {
        self.speech_frames
    }

    /// Number of frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether there are no frames (never true for a finalized utterance)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// All samples concatenated
    #[must_use]
    pub fn samples(&self) -> Vec<f32> {
        self.frames.iter().flat_map(|f| f.samples.iter().copied()).collect()
    }

    /// Render as 16-bit PCM WAV bytes
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self, sample_rate: u32) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples(), sample_rate)
    }

    /// Write as a 16-bit PCM WAV file
    ///
    /// # Errors
    ///
    /// Returns error if encoding or writing fails
    pub fn write_wav(&self, path: &Path, sample_rate: u32) -> Result<()> {
        std::fs::write(path, self.to_wav(sample_rate)?)?;
        Ok(())
    }
}

/// Microphone frame stream
///
/// Frames are delivered in arrival order and never dropped. Only one consumer
/// borrows the source at a time.
#[async_trait]
pub trait FrameSource: Send {
    /// Begin streaming frames of `frame_len` samples at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    async fn start(&mut self, frame_len: usize, sample_rate: u32) -> Result<()>;

    /// Next frame, or `None` once the stream has closed
    async fn next_frame(&mut self) -> Option<AudioFrame>;

    /// Stop streaming and discard buffered audio
    async fn stop(&mut self);
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(to_i16(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[allow(clippy::cast_possible_truncation)]
fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy() {
        assert!(AudioFrame::new(0, vec![0.0; 480]).energy().abs() < f32::EPSILON);
        let loud = AudioFrame::new(1, vec![0.5; 480]);
        assert!((loud.energy() - 0.5).abs() < 1e-4);
        assert!(AudioFrame::new(2, Vec::new()).energy().abs() < f32::EPSILON);
    }

    #[test]
    fn test_to_i16_clamps() {
        let frame = AudioFrame::new(0, vec![2.0, -2.0, 0.0]);
        assert_eq!(frame.to_i16(), vec![32767, -32768, 0]);
    }

    #[test]
    fn test_utterance_requires_speech() {
        assert!(Utterance::new(Vec::new(), 0).is_none());
        assert!(Utterance::new(vec![AudioFrame::new(0, vec![0.0; 4])], 0).is_none());

        let utt = Utterance::new(vec![AudioFrame::new(0, vec![0.1; 4])], 1).unwrap();
        assert_eq!(utt.len(), 1);
        assert_eq!(utt.speech_frames(), 1);
    }

    #[test]
    fn test_utterance_wav() {
        let frames = vec![
            AudioFrame::new(0, vec![0.1; 160]),
            AudioFrame::new(1, vec![-0.1; 160]),
        ];
        let utt = Utterance::new(frames, 2).unwrap();
        let wav = utt.to_wav(16000).unwrap();

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 320);
    }
}
