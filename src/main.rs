use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use jarvis_core::intent::IntentResolver;
use jarvis_core::voice::{
    CancelSignal, CommandEncoder, Endpointer, FrameSource, MicCapture, PiperOutput, RustpotterSpotter,
    SAMPLE_RATE, SpeakerVerifier, SpeechOutput, create_transcriber, create_vad, enroll, play_blocking,
};
use jarvis_core::{
    Collaborators, Config, DispatchGate, TomlNameStore, TurnController, Whitelist, create_model, selftest,
};

/// Jarvis - offline, wake-word driven voice assistant
#[derive(Parser)]
#[command(name = "jarvis", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "JARVIS_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Run the assistant loop (default)
    Run,
    /// Check configuration, models and external binaries
    SelfTest,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Speak text with the configured voice
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Show which intent a phrase resolves to, without running anything
    Intent {
        /// Phrase to resolve
        text: String,
    },
    /// Record a voiceprint for speaker verification
    Enroll,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,jarvis_core=info",
        1 => "info,jarvis_core=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config_path = cli.config.as_deref();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_assistant(config_path).await?,
        Command::SelfTest => return Ok(selftest::print_report(&selftest::run_checks(config_path))),
        Command::TestMic { duration } => test_mic(duration).await?,
        Command::TestSpeaker => test_speaker().await?,
        Command::Say { text } => say(config_path, &text).await?,
        Command::Intent { text } => show_intent(config_path, &text)?,
        Command::Enroll => enroll_voice(config_path).await?,
    }
    Ok(true)
}

/// Load everything, failing fast, then run the loop until Ctrl-C
#[allow(clippy::future_not_send)]
async fn run_assistant(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    tracing::debug!(?config, "loaded configuration");

    let whitelist = Whitelist::load(&config.dispatch.whitelist_path)?;
    let spotter = RustpotterSpotter::new(&config.wake.keyword_path, config.wake.sensitivity, SAMPLE_RATE)?;
    let vad = create_vad(config.capture.vad, SAMPLE_RATE)?;
    let verifier = config
        .speaker
        .as_ref()
        .map(SpeakerVerifier::from_config)
        .transpose()?;

    let parts = Collaborators {
        mic: Box::new(MicCapture::new()),
        spotter: Box::new(spotter),
        vad,
        transcriber: create_transcriber(&config.stt),
        llm: create_model(&config.llm),
        output: Box::new(PiperOutput::new(&config.tts)),
        verifier,
        names: Box::new(TomlNameStore::new(config.config_path.clone(), config.names.clone())),
    };
    let gate = DispatchGate::new(whitelist, config.dispatch.timeout);

    let mut controller = TurnController::new(&config, parts, gate)?;
    tracing::info!(
        assistant = %config.names.assistant,
        mode = ?config.mode,
        "jarvis ready - say the wake word"
    );
    controller.run().await;

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    // 100 ms frames, ten per printed line
    let frame_len = (SAMPLE_RATE / 10) as usize;
    let mut mic = MicCapture::new();
    mic.start(frame_len, SAMPLE_RATE).await?;
    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    for i in 0..duration {
        let mut energy = 0.0_f32;
        let mut peak = 0.0_f32;
        for _ in 0..10 {
            let Some(frame) = mic.next_frame().await else {
                anyhow::bail!("microphone stream closed");
            };
            energy = energy.max(frame.energy());
            peak = frame.samples.iter().map(|s| s.abs()).fold(peak, f32::max);
        }

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    mic.stop().await;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 22_050_u32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());
    let stop = Arc::new(AtomicBool::new(false));
    tokio::task::spawn_blocking(move || play_blocking(samples, sample_rate, &stop)).await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Speak text through piper
async fn say(config_path: Option<&Path>, text: &str) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let output = PiperOutput::new(&config.tts);

    println!("Speaking with voice {:?}: \"{text}\"", config.tts.voice);
    output.speak(text, &config.tts.voice, &CancelSignal::new()).await?;
    Ok(())
}

/// Resolve a phrase against the intent table and whitelist (nothing is run)
fn show_intent(config_path: Option<&Path>, text: &str) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let whitelist = Whitelist::load(&config.dispatch.whitelist_path)?;
    let resolver = IntentResolver::new(&config.intents);

    let Some(intent) = resolver.resolve(text) else {
        println!("No intent matched; this would go to the language model.");
        return Ok(());
    };

    println!("Intent: {intent}");
    match whitelist.get(intent) {
        Some(entry) => {
            println!("Command: {} {}", entry.script.display(), entry.args.join(" "));
            println!("Requires auth: {}", entry.requires_auth);
            if let Some(prompt) = &entry.confirm_prompt {
                println!("Confirmation: {prompt}");
            }
        }
        None => println!("Not whitelisted; the assistant would say it doesn't know how."),
    }
    Ok(())
}

/// Capture one utterance and store its embedding as the voiceprint
#[allow(clippy::future_not_send)]
async fn enroll_voice(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let Some(speaker) = &config.speaker else {
        anyhow::bail!("speaker verification is not configured (add a [speaker] table)");
    };

    let encoder = CommandEncoder::new(&speaker.encoder_command)?;
    let mut vad = create_vad(config.capture.vad, SAMPLE_RATE)?;
    let mut mic = MicCapture::new();
    let endpointer = Endpointer::from_config(&config.capture);

    println!("Say a sentence or two in your normal voice...");
    let Some(utterance) = endpointer
        .capture(&mut mic, vad.as_mut(), Duration::from_secs(10).max(config.capture.max_duration))
        .await?
    else {
        anyhow::bail!("no speech heard");
    };

    let wav = tempfile::Builder::new()
        .prefix("jarvis-enroll-")
        .suffix(".wav")
        .tempfile()?
        .into_temp_path();
    utterance.write_wav(&wav, SAMPLE_RATE)?;

    let path = enroll(&encoder, &wav, &speaker.voiceprint_path).await?;
    println!("Voiceprint saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }
}
