//! Shared test utilities
//!
//! Scripted stand-ins for the audio devices and external engines, so the
//! loop can be driven without hardware, models or binaries.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use jarvis_core::config::JarvisConfigFile;
use jarvis_core::llm::LanguageModel;
use jarvis_core::voice::{
    AudioFrame, CancelSignal, FrameSource, KeywordSpotter, SAMPLE_RATE, SpeechOutput, Transcriber,
    VoiceActivity,
};
use jarvis_core::{Config, Error, Result};

/// Samples per 30 ms frame at the capture rate
pub const FRAME_LEN: usize = 480;

/// Amplitude of a "speech" frame
pub const LOUD: f32 = 0.5;

/// Amplitude of a "silent" frame
pub const QUIET: f32 = 0.0;

/// Energy threshold used by the fake detectors
pub const THRESHOLD: f32 = 0.1;

/// What the scripted mic does once its frames run out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    /// The stream closes (`next_frame` returns `None`)
    Close,
    /// The stream stays open without delivering anything
    Pend,
}

/// Mic activity observed by a test
#[derive(Debug, Default)]
pub struct MicLog {
    pub starts: usize,
    pub stops: usize,
    pub delivered: usize,
    pub running: bool,
}

/// Frame source that replays a fixed script across start/stop cycles
pub struct ScriptedMic {
    frames: VecDeque<Vec<f32>>,
    exhausted: Exhausted,
    next_seq: u64,
    log: Arc<Mutex<MicLog>>,
}

impl ScriptedMic {
    pub fn new(levels: &[f32], exhausted: Exhausted) -> Self {
        Self {
            frames: levels.iter().map(|&l| vec![l; FRAME_LEN]).collect(),
            exhausted,
            next_seq: 0,
            log: Arc::new(Mutex::new(MicLog::default())),
        }
    }

    /// Append a frame of the wrong length (detectors reject it)
    pub fn push_malformed(&mut self) {
        self.frames.push_back(vec![LOUD; FRAME_LEN / 2]);
    }

    /// Append frames at the given levels
    pub fn push(&mut self, levels: &[f32]) {
        self.frames.extend(levels.iter().map(|&l| vec![l; FRAME_LEN]));
    }

    pub fn log(&self) -> Arc<Mutex<MicLog>> {
        Arc::clone(&self.log)
    }

    /// Frames not yet delivered
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl FrameSource for ScriptedMic {
    async fn start(&mut self, frame_len: usize, sample_rate: u32) -> Result<()> {
        assert_eq!(frame_len, FRAME_LEN);
        assert_eq!(sample_rate, SAMPLE_RATE);
        let mut log = self.log.lock().unwrap();
        log.starts += 1;
        log.running = true;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<AudioFrame> {
        if !self.log.lock().unwrap().running {
            return None;
        }
        match self.frames.pop_front() {
            Some(samples) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.log.lock().unwrap().delivered += 1;
                Some(AudioFrame::new(seq, samples))
            }
            None => match self.exhausted {
                Exhausted::Close => None,
                Exhausted::Pend => std::future::pending().await,
            },
        }
    }

    async fn stop(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.stops += 1;
        log.running = false;
    }
}

/// Frame source whose device can never be opened
pub struct BrokenMic;

#[async_trait]
impl FrameSource for BrokenMic {
    async fn start(&mut self, _frame_len: usize, _sample_rate: u32) -> Result<()> {
        Err(Error::Audio("no input device".to_string()))
    }

    async fn next_frame(&mut self) -> Option<AudioFrame> {
        None
    }

    async fn stop(&mut self) {}
}

/// Detects the keyword on any loud frame; rejects malformed frames
pub struct FakeSpotter {
    processed: Arc<AtomicUsize>,
}

impl FakeSpotter {
    pub fn new() -> Self {
        Self {
            processed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn processed(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.processed)
    }
}

impl KeywordSpotter for FakeSpotter {
    fn process(&mut self, frame: &AudioFrame) -> Result<Option<usize>> {
        self.processed.fetch_add(1, Ordering::SeqCst);
        if frame.len() != FRAME_LEN {
            return Err(Error::WakeWord(format!("bad frame length {}", frame.len())));
        }
        Ok((frame.energy() > THRESHOLD).then_some(0))
    }

    fn frame_length(&self) -> usize {
        FRAME_LEN
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Energy detector that rejects malformed frames the way WebRTC does
pub struct StrictVad;

impl VoiceActivity for StrictVad {
    fn is_speech(&mut self, frame: &AudioFrame) -> Result<bool> {
        if frame.len() != FRAME_LEN {
            return Err(Error::Vad(format!("bad frame length {}", frame.len())));
        }
        Ok(frame.energy() > THRESHOLD)
    }
}

/// Returns queued transcripts in order, then empty strings
#[derive(Default)]
pub struct FakeTranscriber {
    transcripts: Mutex<VecDeque<String>>,
}

impl FakeTranscriber {
    pub fn new(transcripts: &[&str]) -> Self {
        Self {
            transcripts: Mutex::new(transcripts.iter().map(ToString::to_string).collect()),
        }
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, wav: &Path) -> Result<String> {
        assert!(wav.exists(), "utterance WAV was not written");
        Ok(self.transcripts.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Answers every prompt with the same text and counts calls
pub struct FakeLlm {
    answer: String,
    calls: Arc<AtomicUsize>,
}

impl FakeLlm {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn complete(&self, _prompt: &str, assistant: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.replace("{assistant}", assistant))
    }
}

/// Records everything spoken; each utterance "plays" for `duration`
pub struct FakeOutput {
    spoken: Arc<Mutex<Vec<String>>>,
    voices: Arc<Mutex<Vec<String>>>,
    duration: Duration,
    playing: Mutex<Option<Arc<Notify>>>,
    stops: Arc<AtomicUsize>,
}

impl FakeOutput {
    pub fn new(duration: Duration) -> Self {
        Self {
            spoken: Arc::new(Mutex::new(Vec::new())),
            voices: Arc::new(Mutex::new(Vec::new())),
            duration,
            playing: Mutex::new(None),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Output that finishes every utterance immediately
    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn spoken(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.spoken)
    }

    /// Voice id used for each spoken line, parallel to `spoken`
    pub fn voices(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.voices)
    }

    pub fn stops(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.stops)
    }
}

#[async_trait]
impl SpeechOutput for FakeOutput {
    async fn speak(&self, text: &str, voice: &str, cancel: &CancelSignal) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        self.voices.lock().unwrap().push(voice.to_string());
        if self.duration.is_zero() {
            return Ok(());
        }

        let stop = Arc::new(Notify::new());
        *self.playing.lock().unwrap() = Some(Arc::clone(&stop));
        tokio::select! {
            () = tokio::time::sleep(self.duration) => {}
            () = cancel.cancelled() => {}
            () = stop.notified() => {}
        }
        self.playing.lock().unwrap().take();
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        match self.playing.lock().unwrap().as_ref() {
            Some(stop) => {
                self.stops.fetch_add(1, Ordering::SeqCst);
                stop.notify_one();
                Ok(())
            }
            None => Err(Error::NotPlaying),
        }
    }
}

/// Output whose playback has always just ended by the time it is stopped
pub struct FinishedOutput {
    duration: Duration,
    stop_calls: Arc<AtomicUsize>,
}

impl FinishedOutput {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            stop_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn stop_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.stop_calls)
    }
}

#[async_trait]
impl SpeechOutput for FinishedOutput {
    async fn speak(&self, _text: &str, _voice: &str, cancel: &CancelSignal) -> Result<()> {
        tokio::select! {
            () = tokio::time::sleep(self.duration) => {}
            () = cancel.cancelled() => {}
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::NotPlaying)
    }
}

/// Resolve a config from TOML, with the required keys filled in
///
/// `extra` goes first, so it may hold top-level keys followed by tables
/// other than the ones set here. The process environment is ignored.
pub fn test_config(extra: &str) -> Config {
    let toml_str = format!(
        r#"
        {extra}

        [wake]
        keyword_path = "/models/jarvis.rpw"
        acknowledgement = ""

        [capture]
        frame_ms = 30
        max_silence_frames = 3
        max_duration_secs = 5

        [dispatch]
        executing_cue = ""

        [llm]
        thinking_cue = ""
        "#
    );
    let fc: JarvisConfigFile = toml::from_str(&toml_str).expect("invalid test config");
    Config::resolve_with_env(fc, PathBuf::from("/tmp/jarvis-test/config.toml"), |_| None)
        .expect("test config rejected")
}

/// Levels for `n` frames at `level`
pub fn frames(level: f32, n: usize) -> Vec<f32> {
    vec![level; n]
}
