//! Wake word gate
//!
//! Streams microphone frames through the keyword spotter until the wake
//! phrase is heard or the listening window closes.

use std::time::Duration;

use tokio::time::{Instant, timeout_at};

use super::frame::FrameSource;
use super::spotter::KeywordSpotter;
use crate::{Error, Result};

/// Gates a turn on the wake phrase
pub struct WakeGate {
    spotter: Box<dyn KeywordSpotter>,
}

impl WakeGate {
    /// Create a gate around a loaded spotter
    #[must_use]
    pub fn new(spotter: Box<dyn KeywordSpotter>) -> Self {
        Self { spotter }
    }

    /// Listen for the wake phrase
    ///
    /// Returns `true` as soon as the spotter reports a keyword (no further
    /// frames are processed) and `false` once `timeout` elapses. A failing
    /// frame is logged and skipped. The mic is stopped before returning.
    ///
    /// # Errors
    ///
    /// Returns error if the mic cannot be started or its stream closes
    #[allow(clippy::future_not_send)]
    pub async fn listen(&mut self, mic: &mut dyn FrameSource, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;

        mic.start(self.spotter.frame_length(), self.spotter.sample_rate())
            .await?;
        tracing::debug!(timeout = ?timeout, "listening for wake word");

        let result = timeout_at(deadline, scan(mic, self.spotter.as_mut())).await;
        mic.stop().await;

        match result {
            Ok(detected) => detected,
            Err(_) => {
                tracing::trace!("wake word window elapsed");
                Ok(false)
            }
        }
    }
}

#[allow(clippy::future_not_send)]
async fn scan(mic: &mut dyn FrameSource, spotter: &mut dyn KeywordSpotter) -> Result<bool> {
    loop {
        let Some(frame) = mic.next_frame().await else {
            return Err(Error::Audio("microphone stream closed".to_string()));
        };

        match spotter.process(&frame) {
            Ok(Some(index)) => {
                tracing::info!(index, seq = frame.seq, "wake word detected");
                return Ok(true);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(seq = frame.seq, error = %e, "wake word frame failed");
            }
        }
    }
}
