//! Utterance endpointing
//!
//! Captures one spoken command: onset at the first speech frame, offset after
//! a run of silent frames, bounded by a maximum duration. Partial speech is
//! never discarded.

use std::time::Duration;

use tokio::time::{Instant, timeout_at};

use super::frame::{AudioFrame, FrameSource, Utterance};
use super::vad::VoiceActivity;
use crate::config::CaptureConfig;
use crate::{Error, Result};

/// Default number of consecutive silent frames that ends an utterance
pub const DEFAULT_MAX_SILENCE_FRAMES: u32 = 25;

/// Silence-based utterance capture
#[derive(Debug, Clone)]
pub struct Endpointer {
    frame_len: usize,
    sample_rate: u32,
    max_silence_frames: u32,
}

/// Buffer state, kept outside the deadline so a timeout can still finalize
#[derive(Default)]
struct Buffer {
    frames: Vec<AudioFrame>,
    speech_frames: usize,
    speech_started: bool,
    silence_run: u32,
}

impl Buffer {
    /// Add one classified frame; true once the silence run ends the utterance
    fn accept(&mut self, frame: AudioFrame, speech: Option<bool>, max_silence_frames: u32) -> bool {
        if self.speech_started {
            match speech {
                Some(true) => {
                    self.silence_run = 0;
                    self.speech_frames += 1;
                }
                Some(false) => self.silence_run += 1,
                None => {}
            }
            self.frames.push(frame);
            return self.silence_run > max_silence_frames;
        }

        if speech == Some(true) {
            tracing::debug!(seq = frame.seq, "speech onset");
            self.speech_started = true;
            self.speech_frames += 1;
            self.frames.push(frame);
        }
        false
    }

    fn finalize(self) -> Option<Utterance> {
        Utterance::new(self.frames, self.speech_frames)
    }
}

enum StreamEnd {
    Offset,
    Closed,
}

impl Endpointer {
    /// Create an endpointer
    #[must_use]
    pub const fn new(frame_len: usize, sample_rate: u32, max_silence_frames: u32) -> Self {
        Self {
            frame_len,
            sample_rate,
            max_silence_frames,
        }
    }

    /// Create an endpointer from the capture settings
    #[must_use]
    pub const fn from_config(config: &CaptureConfig) -> Self {
        Self::new(
            config.frame_len(),
            crate::voice::SAMPLE_RATE,
            config.max_silence_frames,
        )
    }

    /// Capture one utterance
    ///
    /// Returns `None` iff no frame was classified as speech before
    /// `max_duration` elapsed. Once speech has started, capture ends after
    /// more than `max_silence_frames` consecutive silent frames or when
    /// `max_duration` elapses, whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns error if the mic cannot be started, or its stream closes
    /// before any speech was heard
    #[allow(clippy::future_not_send)]
    pub async fn capture(
        &self,
        mic: &mut dyn FrameSource,
        vad: &mut dyn VoiceActivity,
        max_duration: Duration,
    ) -> Result<Option<Utterance>> {
        let deadline = Instant::now() + max_duration;
        mic.start(self.frame_len, self.sample_rate).await?;
        self.collect(mic, vad, deadline, Buffer::default()).await
    }

    /// Continue an utterance the user already started on a running stream
    ///
    /// `preroll` frames are classified first, so a speech frame among them
    /// is the onset; capture then reads on from `mic` without restarting it.
    /// Offset and duration rules are those of [`capture`](Self::capture).
    ///
    /// # Errors
    ///
    /// Returns error if the stream closes before any speech was heard
    #[allow(clippy::future_not_send)]
    pub async fn resume(
        &self,
        mic: &mut dyn FrameSource,
        vad: &mut dyn VoiceActivity,
        max_duration: Duration,
        preroll: Vec<AudioFrame>,
    ) -> Result<Option<Utterance>> {
        let deadline = Instant::now() + max_duration;
        let mut buffer = Buffer::default();
        for frame in preroll {
            let speech = classify(vad, &frame);
            if buffer.accept(frame, speech, self.max_silence_frames) {
                mic.stop().await;
                return Ok(buffer.finalize());
            }
        }
        tracing::debug!(frames = buffer.frames.len(), "resuming capture");
        self.collect(mic, vad, deadline, buffer).await
    }

    #[allow(clippy::future_not_send)]
    async fn collect(
        &self,
        mic: &mut dyn FrameSource,
        vad: &mut dyn VoiceActivity,
        deadline: Instant,
        mut buffer: Buffer,
    ) -> Result<Option<Utterance>> {
        let result = timeout_at(deadline, self.fill(mic, vad, &mut buffer)).await;
        mic.stop().await;

        let end = match result {
            Ok(end) => end,
            Err(_) => {
                tracing::debug!(
                    speech_started = buffer.speech_started,
                    frames = buffer.frames.len(),
                    "capture window elapsed"
                );
                StreamEnd::Offset
            }
        };

        if !buffer.speech_started {
            return match end {
                StreamEnd::Closed => Err(Error::Audio("microphone stream closed".to_string())),
                StreamEnd::Offset => Ok(None),
            };
        }

        let utterance = buffer.finalize();
        if let Some(utt) = &utterance {
            tracing::info!(
                frames = utt.len(),
                speech_frames = utt.speech_frames(),
                "utterance captured"
            );
        }
        Ok(utterance)
    }

    #[allow(clippy::future_not_send)]
    async fn fill(
        &self,
        mic: &mut dyn FrameSource,
        vad: &mut dyn VoiceActivity,
        buffer: &mut Buffer,
    ) -> StreamEnd {
        while let Some(frame) = mic.next_frame().await {
            let speech = classify(vad, &frame);
            if buffer.accept(frame, speech, self.max_silence_frames) {
                tracing::debug!(silence_run = buffer.silence_run, "end of speech");
                return StreamEnd::Offset;
            }
        }

        StreamEnd::Closed
    }
}

/// VAD decision for a frame; `None` when the detector fails on it
fn classify(vad: &mut dyn VoiceActivity, frame: &AudioFrame) -> Option<bool> {
    match vad.is_speech(frame) {
        Ok(speech) => Some(speech),
        Err(e) => {
            tracing::warn!(seq = frame.seq, error = %e, "vad failed on frame");
            None
        }
    }
}
