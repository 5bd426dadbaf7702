//! Interruptible response playback
//!
//! Speaks a response while the microphone keeps listening. The monitor owns
//! the cancellation: on speech it raises the shared signal and force-stops the
//! output. Playback only reports how it ended. An interruption hands back the
//! speech frames already heard, with the mic still streaming, so command
//! capture can pick up mid-sentence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use super::frame::{AudioFrame, FrameSource};
use super::tts::SpeechOutput;
use super::vad::VoiceActivity;
use crate::config::{BargeInConfig, CaptureConfig};
use crate::{Error, Result};

/// How long to wait for playback to wind down after a forced stop
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Shared one-shot cancellation flag with a wakeup
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<SignalInner>,
}

#[derive(Debug, Default)]
struct SignalInner {
    raised: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    /// Create a lowered signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter; idempotent
    pub fn raise(&self) {
        if !self.inner.raised.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether the signal has been raised
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// Resolve once the signal is raised
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent raise is not missed
        notified.as_mut().enable();
        if self.is_raised() {
            return;
        }
        notified.await;
    }
}

/// How a spoken response ended
#[derive(Debug, Clone, PartialEq)]
pub enum BargeInOutcome {
    /// The whole response was played; the mic is stopped
    Completed,
    /// The user spoke over the response and playback was stopped
    ///
    /// The mic is left running. `preroll` holds the frames of the speech run
    /// that triggered the interruption, in capture order.
    Interrupted { preroll: Vec<AudioFrame> },
}

/// Plays responses while monitoring the mic for user speech
#[derive(Debug, Clone)]
pub struct BargeIn {
    enabled: bool,
    frame_len: usize,
    sample_rate: u32,
    min_speech_frames: u32,
}

impl BargeIn {
    /// Create a controller
    #[must_use]
    pub const fn new(enabled: bool, frame_len: usize, sample_rate: u32, min_speech_frames: u32) -> Self {
        Self {
            enabled,
            frame_len,
            sample_rate,
            min_speech_frames,
        }
    }

    /// Create a controller from the barge-in and capture settings
    #[must_use]
    pub const fn from_config(barge_in: &BargeInConfig, capture: &CaptureConfig) -> Self {
        Self::new(
            barge_in.enabled,
            capture.frame_len(),
            crate::voice::SAMPLE_RATE,
            barge_in.min_speech_frames,
        )
    }

    /// Speak `text` and stop as soon as the user starts talking
    ///
    /// The mic is stopped before returning unless the outcome is
    /// `Interrupted`, in which case the caller owns the running stream.
    /// When the monitor cannot start, the response is still spoken, just
    /// without interruption.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    #[allow(clippy::future_not_send)]
    pub async fn play_and_monitor(
        &self,
        mic: &mut dyn FrameSource,
        vad: &mut dyn VoiceActivity,
        output: &dyn SpeechOutput,
        text: &str,
        voice: &str,
    ) -> Result<BargeInOutcome> {
        let signal = CancelSignal::new();

        if !self.enabled {
            output.speak(text, voice, &signal).await?;
            return Ok(BargeInOutcome::Completed);
        }

        if let Err(e) = mic.start(self.frame_len, self.sample_rate).await {
            tracing::warn!(error = %e, "barge-in monitor unavailable, speaking without it");
            output.speak(text, voice, &signal).await?;
            return Ok(BargeInOutcome::Completed);
        }

        let outcome = {
            let playback = output.speak(text, voice, &signal);
            let monitor = watch_for_speech(mic, vad, self.min_speech_frames);
            tokio::pin!(playback);
            tokio::pin!(monitor);

            tokio::select! {
                biased;
                result = &mut playback => result.map(|()| BargeInOutcome::Completed),
                detected = &mut monitor => match detected {
                    Some(preroll) => interrupt(&signal, output, playback, preroll).await,
                    None => {
                        tracing::warn!("mic closed during playback, no barge-in possible");
                        playback.await.map(|()| BargeInOutcome::Completed)
                    }
                },
            }
        };

        match &outcome {
            Ok(BargeInOutcome::Interrupted { preroll }) => {
                tracing::debug!(preroll = preroll.len(), "response interrupted, mic left running");
            }
            Ok(BargeInOutcome::Completed) => {
                mic.stop().await;
                tracing::debug!("response finished");
            }
            Err(_) => mic.stop().await,
        }
        outcome
    }
}

/// Raise the signal, force-stop the output, and let playback report
async fn interrupt<F>(
    signal: &CancelSignal,
    output: &dyn SpeechOutput,
    playback: std::pin::Pin<&mut F>,
    preroll: Vec<AudioFrame>,
) -> Result<BargeInOutcome>
where
    F: std::future::Future<Output = Result<()>> + ?Sized,
{
    signal.raise();

    match output.stop() {
        Ok(()) => {}
        Err(Error::NotPlaying) => {
            tracing::debug!("output already finished when barge-in fired");
            return Ok(BargeInOutcome::Completed);
        }
        Err(e) => tracing::warn!(error = %e, "failed to stop output"),
    }

    match tokio::time::timeout(STOP_GRACE, playback).await {
        Ok(Err(e)) => tracing::debug!(error = %e, "playback ended with error after stop"),
        Err(_) => tracing::warn!("playback did not wind down after stop"),
        Ok(Ok(())) => {}
    }

    tracing::info!("response interrupted by user speech");
    Ok(BargeInOutcome::Interrupted { preroll })
}

/// Wait for `min_speech_frames` consecutive speech frames
///
/// Returns the frames of that run, or `None` if the stream closed first.
/// Frames the VAD fails on inside a run are kept without counting.
#[allow(clippy::future_not_send)]
async fn watch_for_speech(
    mic: &mut dyn FrameSource,
    vad: &mut dyn VoiceActivity,
    min_speech_frames: u32,
) -> Option<Vec<AudioFrame>> {
    let mut run = 0u32;
    let mut heard = Vec::new();
    while let Some(frame) = mic.next_frame().await {
        match vad.is_speech(&frame) {
            Ok(true) => {
                run += 1;
                let seq = frame.seq;
                heard.push(frame);
                if run >= min_speech_frames.max(1) {
                    tracing::debug!(seq, run, "speech during playback");
                    return Some(heard);
                }
            }
            Ok(false) => {
                run = 0;
                heard.clear();
            }
            Err(e) => {
                tracing::warn!(seq = frame.seq, error = %e, "vad failed during playback");
                if run > 0 {
                    heard.push(frame);
                }
            }
        }
    }
    None
}
