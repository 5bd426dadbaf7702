//! Audio capture from microphone

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::{mpsc, oneshot};

use super::frame::{AudioFrame, FrameSource};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// An open input stream
///
/// The cpal stream lives on its own thread (it is not `Send` on every
/// platform); dropping `shutdown` ends that thread and closes the device.
struct Running {
    samples: mpsc::UnboundedReceiver<Vec<f32>>,
    shutdown: std_mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
    frame_len: usize,
    pending: Vec<f32>,
}

/// Captures audio from the default input device
pub struct MicCapture {
    running: Option<Running>,
    next_seq: u64,
}

impl MicCapture {
    /// Create a capture handle; the device is opened on `start`
    #[must_use]
    pub const fn new() -> Self {
        Self {
            running: None,
            next_seq: 0,
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.running.is_some()
    }
}

impl Default for MicCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        // Dropping the sender wakes the stream thread
        self.running.take();
    }
}

#[async_trait]
impl FrameSource for MicCapture {
    async fn start(&mut self, frame_len: usize, sample_rate: u32) -> Result<()> {
        if self.running.is_some() {
            self.stop().await;
        }
        if frame_len == 0 {
            return Err(Error::Audio("frame length must be non-zero".to_string()));
        }

        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(sample_rate, samples_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Blocks until the sender is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })?;

        ready_rx
            .await
            .map_err(|_| Error::Audio("capture thread exited during startup".to_string()))??;

        self.running = Some(Running {
            samples: samples_rx,
            shutdown: shutdown_tx,
            thread: Some(thread),
            frame_len,
            pending: Vec::with_capacity(frame_len * 2),
        });

        tracing::debug!(frame_len, sample_rate, "audio capture started");
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<AudioFrame> {
        let running = self.running.as_mut()?;

        while running.pending.len() < running.frame_len {
            let chunk = running.samples.recv().await?;
            running.pending.extend_from_slice(&chunk);
        }

        let samples: Vec<f32> = running.pending.drain(..running.frame_len).collect();
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(AudioFrame::new(seq, samples))
    }

    async fn stop(&mut self) {
        if let Some(mut running) = self.running.take() {
            drop(running.shutdown);
            if let Some(thread) = running.thread.take() {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
            }
            tracing::debug!("audio capture stopped");
        }
    }
}

fn open_input_stream(
    sample_rate: u32,
    samples: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| {
            c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = if channels == 1 {
                    data.to_vec()
                } else {
                    downmix(data, channels)
                };
                // Receiver gone means capture was stopped
                let _ = samples.send(mono);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Average interleaved channels into mono
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}
