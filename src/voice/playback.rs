//! Audio playback to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use cpal::SampleRate;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::{Error, Result};

/// Extra wait beyond the nominal clip length before giving up on the device
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How a playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// All samples were played
    Finished,
    /// The stop flag was raised first
    Stopped,
}

/// Plays mono samples on the default output device
///
/// The output callback checks `stop` on every period, so a raised flag
/// silences the device within one callback period.
///
/// Blocks the calling thread; run it under `spawn_blocking`.
///
/// # Errors
///
/// Returns error if the device cannot be opened or the stream fails to start
pub fn play_blocking(samples: Vec<f32>, sample_rate: u32, stop: &Arc<AtomicBool>) -> Result<PlaybackEnd> {
    if samples.is_empty() {
        return Ok(PlaybackEnd::Finished);
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
        c.sample_format() == cpal::SampleFormat::F32
            && c.min_sample_rate() <= SampleRate(sample_rate)
            && c.max_sample_rate() >= SampleRate(sample_rate)
    };

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(supports_rate)
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio playback initialized"
    );

    let sample_count = samples.len();
    let (done_tx, done_rx) = mpsc::channel();
    let stop_flag = Arc::clone(stop);
    let mut position = 0usize;
    let mut signalled = false;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let stopped = stop_flag.load(Ordering::Acquire);

                for frame in data.chunks_mut(channels) {
                    let sample = if stopped {
                        0.0
                    } else {
                        samples.get(position).copied().unwrap_or(0.0)
                    };
                    frame.fill(sample);
                    if position < samples.len() {
                        position += 1;
                    }
                }

                if !signalled && (stopped || position >= samples.len()) {
                    signalled = true;
                    let _ = done_tx.send(());
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let clip = Duration::from_millis((sample_count as u64 * 1000) / u64::from(sample_rate.max(1)));
    if done_rx.recv_timeout(clip + DRAIN_GRACE).is_err() {
        tracing::warn!(samples = sample_count, "playback did not report completion");
    }
    drop(stream);

    if stop.load(Ordering::Acquire) {
        tracing::debug!(samples = sample_count, "playback stopped");
        Ok(PlaybackEnd::Stopped)
    } else {
        tracing::debug!(samples = sample_count, "playback complete");
        Ok(PlaybackEnd::Finished)
    }
}

/// Convert raw little-endian 16-bit PCM into f32 samples
#[must_use]
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_to_f32() {
        let bytes = [0x00, 0x00, 0xff, 0x7f, 0x00, 0x80, 0x01];
        let samples = pcm16_to_f32(&bytes);
        assert_eq!(samples.len(), 3);
        assert!(samples[0].abs() < f32::EPSILON);
        assert!((samples[1] - 32767.0 / 32768.0).abs() < 1e-6);
        assert!((samples[2] + 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_empty_clip_is_finished() {
        let stop = Arc::new(AtomicBool::new(false));
        assert_eq!(play_blocking(Vec::new(), 22050, &stop).unwrap(), PlaybackEnd::Finished);
    }
}
