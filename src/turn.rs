//! Turn controller
//!
//! The endless interaction loop: wake, capture, transcribe, resolve, respond.
//! Every collaborator is owned here and lent to one component at a time, so
//! the mic only ever has a single consumer. Per-turn failures end in a spoken
//! apology and a return to waiting for the wake word; they never stop the
//! loop.

use std::path::Path;
use std::time::Duration;

use tempfile::TempPath;

use crate::config::{AfterInterrupt, Config, Mode};
use crate::dispatch::{DispatchGate, DispatchResult};
use crate::identity::{NameStore, RenameHandler};
use crate::intent::IntentResolver;
use crate::llm::LanguageModel;
use crate::voice::{
    AudioFrame, BargeIn, BargeInOutcome, CancelSignal, Endpointer, FrameSource, KeywordSpotter,
    SAMPLE_RATE, SpeakerVerifier, SpeechOutput, Transcriber, Utterance, VoiceActivity, WakeGate,
};
use crate::Result;

const DID_NOT_CATCH: &str = "Sorry, I didn't catch that.";
const TURN_FAILED: &str = "Sorry, something went wrong.";
const LOW_POWER_APOLOGY: &str = "Sorry, I can't answer that in low-power mode.";
const NOT_TRAINED: &str = "I'm not trained for that yet.";
const CANCELLED: &str = "Okay, cancelled.";

/// Pause after a failed turn so a broken device cannot spin the loop
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Which configured voice speaks a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceRole {
    /// Renames, apologies and the thinking cue (`tts.reply_voice`)
    Reply,
    /// Greeting, command output and model answers (`tts.answer_voice`)
    Answer,
}

/// A resolved response and the voice to speak it with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub text: String,
    pub role: VoiceRole,
}

impl Response {
    fn reply(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: VoiceRole::Reply,
        }
    }

    fn answer(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: VoiceRole::Answer,
        }
    }
}

/// Where the loop is
#[derive(Debug)]
pub enum TurnState {
    /// Not started; the next step speaks the greeting
    Idle,
    /// Listening for the wake phrase
    AwaitingWake,
    /// Capturing the command utterance
    ///
    /// Non-empty frames are speech already heard during an interrupted
    /// response; the mic is then still running and capture continues on it.
    Capturing(Vec<AudioFrame>),
    /// Turning the utterance into text
    Transcribing(Utterance),
    /// Deciding how to answer
    Resolving {
        /// Transcript
        text: String,
        /// The utterance as WAV, for speaker verification
        wav: TempPath,
    },
    /// Speaking the answer
    Responding(Response),
}

impl TurnState {
    /// Short name for logs
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingWake => "awaiting_wake",
            Self::Capturing(_) => "capturing",
            Self::Transcribing(_) => "transcribing",
            Self::Resolving { .. } => "resolving",
            Self::Responding(_) => "responding",
        }
    }
}

/// External collaborators owned by the controller
pub struct Collaborators {
    pub mic: Box<dyn FrameSource>,
    pub spotter: Box<dyn KeywordSpotter>,
    pub vad: Box<dyn VoiceActivity>,
    pub transcriber: Box<dyn Transcriber>,
    pub llm: Box<dyn LanguageModel>,
    pub output: Box<dyn SpeechOutput>,
    pub verifier: Option<SpeakerVerifier>,
    pub names: Box<dyn NameStore>,
}

/// Top-level state machine
pub struct TurnController {
    state: TurnState,
    mode: Mode,
    reply_voice: String,
    answer_voice: String,
    wake_timeout: Duration,
    max_duration: Duration,
    acknowledgement: Option<String>,
    executing_cue: Option<String>,
    thinking_cue: Option<String>,
    after_interrupt: AfterInterrupt,

    mic: Box<dyn FrameSource>,
    vad: Box<dyn VoiceActivity>,
    wake: WakeGate,
    endpointer: Endpointer,
    barge_in: BargeIn,
    transcriber: Box<dyn Transcriber>,
    llm: Box<dyn LanguageModel>,
    output: Box<dyn SpeechOutput>,
    verifier: Option<SpeakerVerifier>,
    names: Box<dyn NameStore>,
    gate: DispatchGate,
    resolver: IntentResolver,
    renamer: RenameHandler,
}

impl TurnController {
    /// Assemble the controller
    ///
    /// # Errors
    ///
    /// Returns error if the rename patterns fail to compile
    pub fn new(config: &Config, parts: Collaborators, gate: DispatchGate) -> Result<Self> {
        Ok(Self {
            state: TurnState::Idle,
            mode: config.mode,
            reply_voice: config.tts.reply_voice.clone(),
            answer_voice: config.tts.answer_voice.clone(),
            wake_timeout: config.wake.timeout,
            max_duration: config.capture.max_duration,
            acknowledgement: config.wake.acknowledgement.clone(),
            executing_cue: config.dispatch.executing_cue.clone(),
            thinking_cue: config.llm.thinking_cue.clone(),
            after_interrupt: config.barge_in.after_interrupt,

            mic: parts.mic,
            vad: parts.vad,
            wake: WakeGate::new(parts.spotter),
            endpointer: Endpointer::from_config(&config.capture),
            barge_in: BargeIn::from_config(&config.barge_in, &config.capture),
            transcriber: parts.transcriber,
            llm: parts.llm,
            output: parts.output,
            verifier: parts.verifier,
            names: parts.names,
            gate,
            resolver: IntentResolver::new(&config.intents),
            renamer: RenameHandler::new()?,
        })
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> &TurnState {
        &self.state
    }

    /// Run until Ctrl-C
    #[allow(clippy::future_not_send)]
    pub async fn run(&mut self) {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = self.step() => {}
                _ = &mut shutdown => {
                    tracing::info!("shutting down");
                    self.mic.stop().await;
                    break;
                }
            }
        }
    }

    /// Advance the state machine by one state
    #[allow(clippy::future_not_send)]
    pub async fn step(&mut self) {
        let state = std::mem::replace(&mut self.state, TurnState::AwaitingWake);
        let label = state.label();

        self.state = match self.advance(state).await {
            Ok(next) => {
                tracing::trace!(from = label, to = next.label(), "state transition");
                next
            }
            Err(e) => {
                tracing::error!(state = label, error = %e, "turn failed");
                self.say(TURN_FAILED, VoiceRole::Reply).await;
                tokio::time::sleep(ERROR_BACKOFF).await;
                TurnState::AwaitingWake
            }
        };
    }

    #[allow(clippy::future_not_send)]
    async fn advance(&mut self, state: TurnState) -> Result<TurnState> {
        match state {
            TurnState::Idle => {
                let names = self.names.names();
                self.say(
                    &format!("{} is ready, {}.", names.assistant, names.user),
                    VoiceRole::Answer,
                )
                .await;
                Ok(TurnState::AwaitingWake)
            }
            TurnState::AwaitingWake => {
                if !self.wake.listen(self.mic.as_mut(), self.wake_timeout).await? {
                    return Ok(TurnState::AwaitingWake);
                }
                if let Some(ack) = self.acknowledgement.clone() {
                    self.say(&ack, VoiceRole::Answer).await;
                }
                Ok(TurnState::Capturing(Vec::new()))
            }
            TurnState::Capturing(preroll) => {
                let utterance = if preroll.is_empty() {
                    self.endpointer
                        .capture(self.mic.as_mut(), self.vad.as_mut(), self.max_duration)
                        .await?
                } else {
                    self.endpointer
                        .resume(self.mic.as_mut(), self.vad.as_mut(), self.max_duration, preroll)
                        .await?
                };
                Ok(utterance.map_or(TurnState::AwaitingWake, TurnState::Transcribing))
            }
            TurnState::Transcribing(utterance) => {
                let (text, wav) = self.transcribe(&utterance).await?;
                if text.is_empty() {
                    self.say(DID_NOT_CATCH, VoiceRole::Reply).await;
                    return Ok(TurnState::AwaitingWake);
                }
                Ok(TurnState::Resolving { text, wav })
            }
            TurnState::Resolving { text, wav } => {
                let response = self.respond_to(&text, Some(&*wav)).await?;
                Ok(TurnState::Responding(response))
            }
            TurnState::Responding(response) => {
                let voice = match response.role {
                    VoiceRole::Reply => &self.reply_voice,
                    VoiceRole::Answer => &self.answer_voice,
                };
                let outcome = self
                    .barge_in
                    .play_and_monitor(
                        self.mic.as_mut(),
                        self.vad.as_mut(),
                        self.output.as_ref(),
                        &response.text,
                        voice,
                    )
                    .await?;

                match (outcome, self.after_interrupt) {
                    (BargeInOutcome::Completed, _) => Ok(TurnState::AwaitingWake),
                    (BargeInOutcome::Interrupted { .. }, AfterInterrupt::Wake) => {
                        self.mic.stop().await;
                        Ok(TurnState::AwaitingWake)
                    }
                    (BargeInOutcome::Interrupted { preroll }, AfterInterrupt::Capture) => {
                        Ok(TurnState::Capturing(preroll))
                    }
                }
            }
        }
    }

    /// Write the utterance to a temporary WAV and transcribe it
    #[allow(clippy::future_not_send)]
    async fn transcribe(&self, utterance: &Utterance) -> Result<(String, TempPath)> {
        let wav = tempfile::Builder::new()
            .prefix("jarvis-utterance-")
            .suffix(".wav")
            .tempfile()?
            .into_temp_path();
        utterance.write_wav(&wav, SAMPLE_RATE)?;

        let text = self.transcriber.transcribe(&wav).await?;
        tracing::info!(text = %text, frames = utterance.len(), "heard");
        Ok((text, wav))
    }

    /// Produce the response for a transcript
    ///
    /// Tried in order: rename command, whitelisted intent, language model
    /// (or a fixed apology in low-power mode).
    ///
    /// # Errors
    ///
    /// Returns error if persisting a rename or the language model fails
    #[allow(clippy::future_not_send)]
    pub async fn respond_to(&mut self, text: &str, wav: Option<&Path>) -> Result<Response> {
        if let Some(reply) = self.renamer.handle(text, self.names.as_ref())? {
            tracing::info!("rename handled");
            return Ok(Response::reply(reply));
        }

        if let Some(intent) = self.resolver.resolve(text).map(str::to_string) {
            return Ok(Response::answer(self.dispatch(&intent, wav).await));
        }

        if self.mode == Mode::LowPower {
            tracing::info!("language model disabled in low-power mode");
            return Ok(Response::reply(LOW_POWER_APOLOGY));
        }

        if let Some(cue) = self.thinking_cue.clone() {
            self.say(&cue, VoiceRole::Reply).await;
        }
        let assistant = self.names.names().assistant;
        let answer = self.llm.complete(text, &assistant).await?;
        if answer.is_empty() {
            return Ok(Response::reply(NOT_TRAINED));
        }
        Ok(Response::answer(answer))
    }

    #[allow(clippy::future_not_send)]
    async fn dispatch(&mut self, intent: &str, wav: Option<&Path>) -> String {
        tracing::info!(intent, "dispatching intent");
        if let Some(cue) = self.executing_cue.clone() {
            self.say(&cue, VoiceRole::Answer).await;
        }

        let authenticated = self.authenticate(intent, wav).await;
        let result = self.gate.execute(intent, authenticated).await;
        tracing::info!(intent, result = ?result, "dispatch finished");

        match result {
            DispatchResult::ConfirmRequired(prompt) => self.confirm(intent, authenticated, &prompt).await,
            other => other.spoken(),
        }
    }

    /// Verify the speaker only when the command needs it
    #[allow(clippy::future_not_send)]
    async fn authenticate(&self, intent: &str, wav: Option<&Path>) -> bool {
        let needs_auth = self
            .gate
            .whitelist()
            .get(intent)
            .is_some_and(|entry| entry.requires_auth);
        if !needs_auth {
            return false;
        }

        let (Some(verifier), Some(wav)) = (&self.verifier, wav) else {
            tracing::debug!(intent, "no speaker verifier, treating speaker as unauthenticated");
            return false;
        };

        match verifier.verify(wav).await {
            Ok(verified) => verified,
            Err(e) => {
                tracing::warn!(error = %e, "speaker verification failed");
                false
            }
        }
    }

    /// Ask the confirmation question and run the command on a yes
    #[allow(clippy::future_not_send)]
    async fn confirm(&mut self, intent: &str, authenticated: bool, prompt: &str) -> String {
        self.say(prompt, VoiceRole::Answer).await;

        let answer = match self.listen_once().await {
            Ok(Some(answer)) => answer,
            Ok(None) => {
                tracing::info!(intent, "no confirmation heard");
                return CANCELLED.to_string();
            }
            Err(e) => {
                tracing::warn!(intent, error = %e, "confirmation capture failed");
                return CANCELLED.to_string();
            }
        };

        if !is_affirmative(&answer) {
            tracing::info!(intent, answer = %answer, "command not confirmed");
            return CANCELLED.to_string();
        }

        tracing::info!(intent, "command confirmed");
        self.gate.execute_confirmed(intent, authenticated).await.spoken()
    }

    /// Capture and transcribe a single follow-up utterance
    #[allow(clippy::future_not_send)]
    async fn listen_once(&mut self) -> Result<Option<String>> {
        let Some(utterance) = self
            .endpointer
            .capture(self.mic.as_mut(), self.vad.as_mut(), self.max_duration)
            .await?
        else {
            return Ok(None);
        };
        let (text, _wav) = self.transcribe(&utterance).await?;
        Ok((!text.is_empty()).then_some(text))
    }

    /// Speak without barge-in; failures are logged only
    #[allow(clippy::future_not_send)]
    async fn say(&self, text: &str, role: VoiceRole) {
        let voice = match role {
            VoiceRole::Reply => &self.reply_voice,
            VoiceRole::Answer => &self.answer_voice,
        };
        if let Err(e) = self.output.speak(text, voice, &CancelSignal::new()).await {
            tracing::warn!(error = %e, text, "failed to speak");
        }
    }
}

/// Whether a spoken answer means yes
#[must_use]
pub fn is_affirmative(text: &str) -> bool {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let negative = words
        .iter()
        .any(|w| matches!(*w, "no" | "nahi" | "nahin" | "mat" | "cancel" | "stop"));
    if negative {
        return false;
    }

    let yes = words
        .iter()
        .any(|w| matches!(*w, "yes" | "yeah" | "haan" | "han" | "ha" | "confirm" | "sure" | "ok" | "okay"));
    yes || words.windows(2).any(|pair| pair == ["kar", "do"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affirmative() {
        assert!(is_affirmative("Yes."));
        assert!(is_affirmative("haan kar do"));
        assert!(is_affirmative("kar do"));
        assert!(is_affirmative("Confirm"));
        assert!(!is_affirmative("no"));
        assert!(!is_affirmative("nahi mat karo"));
        assert!(!is_affirmative("yes no"));
        assert!(!is_affirmative("what"));
        assert!(!is_affirmative(""));
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(TurnState::Idle.label(), "idle");
        assert_eq!(TurnState::Capturing(Vec::new()).label(), "capturing");
        assert_eq!(TurnState::Responding(Response::reply("")).label(), "responding");
    }
}
