//! Speaker verification
//!
//! An external embedding command turns a WAV file into a voice embedding
//! which is compared against the enrolled voiceprint by cosine similarity.
//! The result feeds the authentication input of the dispatch gate.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::SpeakerConfig;
use crate::{Error, Result};

const EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// Produces a speaker embedding for a WAV file
#[async_trait]
pub trait SpeakerEncoder: Send + Sync {
    /// Embed the speech in `wav`
    ///
    /// # Errors
    ///
    /// Returns error if the embedding cannot be computed
    async fn embed(&self, wav: &Path) -> Result<Vec<f32>>;
}

/// Runs `program args... <wav>` and parses a JSON float array from stdout
pub struct CommandEncoder {
    program: String,
    args: Vec<String>,
}

impl CommandEncoder {
    /// Create an encoder from a command line (program followed by arguments)
    ///
    /// # Errors
    ///
    /// Returns error if the command is empty
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("speaker.encoder_command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl SpeakerEncoder for CommandEncoder {
    async fn embed(&self, wav: &Path) -> Result<Vec<f32>> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(wav)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Speaker(format!("failed to spawn {}: {e}", self.program)))?;

        let output = tokio::time::timeout(EMBED_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout("speaker embedding".to_string(), EMBED_TIMEOUT))??;

        if !output.status.success() {
            return Err(Error::Speaker(format!(
                "encoder exited with code {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        let embedding: Vec<f32> = serde_json::from_slice(&output.stdout)?;
        if embedding.is_empty() {
            return Err(Error::Speaker("encoder returned an empty embedding".to_string()));
        }
        Ok(embedding)
    }
}

/// Cosine similarity of two vectors; 0 when either is zero or lengths differ
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Compares utterances against an enrolled voiceprint
pub struct SpeakerVerifier {
    encoder: Box<dyn SpeakerEncoder>,
    voiceprint: Vec<f32>,
    threshold: f32,
}

impl SpeakerVerifier {
    /// Create a verifier
    #[must_use]
    pub fn new(encoder: Box<dyn SpeakerEncoder>, voiceprint: Vec<f32>, threshold: f32) -> Self {
        Self {
            encoder,
            voiceprint,
            threshold,
        }
    }

    /// Load the voiceprint and build the command encoder from settings
    ///
    /// # Errors
    ///
    /// Returns error if the voiceprint is missing or unreadable
    pub fn from_config(config: &SpeakerConfig) -> Result<Self> {
        let encoder = CommandEncoder::new(&config.encoder_command)?;
        let voiceprint = load_voiceprint(&config.voiceprint_path)?;
        tracing::info!(
            voiceprint = %config.voiceprint_path.display(),
            dims = voiceprint.len(),
            threshold = config.threshold,
            "speaker verification enabled"
        );
        Ok(Self::new(Box::new(encoder), voiceprint, config.threshold))
    }

    /// Whether the speech in `wav` matches the enrolled speaker
    ///
    /// # Errors
    ///
    /// Returns error if the embedding cannot be computed
    pub async fn verify(&self, wav: &Path) -> Result<bool> {
        let embedding = self.encoder.embed(wav).await?;
        let similarity = cosine_similarity(&self.voiceprint, &embedding);
        let verified = similarity > self.threshold;
        tracing::info!(similarity, threshold = self.threshold, verified, "speaker verification");
        Ok(verified)
    }
}

/// Read a voiceprint (JSON float array)
///
/// # Errors
///
/// Returns error if the file is missing or malformed
pub fn load_voiceprint(path: &Path) -> Result<Vec<f32>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Speaker(format!("cannot read voiceprint {}: {e}", path.display())))?;
    let voiceprint: Vec<f32> = serde_json::from_str(&content)?;
    if voiceprint.is_empty() {
        return Err(Error::Speaker("voiceprint is empty".to_string()));
    }
    Ok(voiceprint)
}

/// Embed `wav` and store it as the voiceprint at `path`
///
/// # Errors
///
/// Returns error if embedding or writing fails
pub async fn enroll(encoder: &dyn SpeakerEncoder, wav: &Path, path: &Path) -> Result<PathBuf> {
    let embedding = encoder.embed(wav).await?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string(&embedding)?)?;
    tracing::info!(path = %path.display(), dims = embedding.len(), "voiceprint saved");
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEncoder(Vec<f32>);

    #[async_trait]
    impl SpeakerEncoder for FixedEncoder {
        async fn embed(&self, _wav: &Path) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_verify_threshold() {
        let wav = Path::new("unused.wav");
        let same = SpeakerVerifier::new(Box::new(FixedEncoder(vec![0.6, 0.8])), vec![0.6, 0.8], 0.75);
        assert!(same.verify(wav).await.unwrap());

        let other = SpeakerVerifier::new(Box::new(FixedEncoder(vec![0.8, -0.6])), vec![0.6, 0.8], 0.75);
        assert!(!other.verify(wav).await.unwrap());
    }

    #[tokio::test]
    async fn test_enroll_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice").join("print.json");

        enroll(&FixedEncoder(vec![0.1, 0.2, 0.3]), Path::new("unused.wav"), &path)
            .await
            .unwrap();

        assert_eq!(load_voiceprint(&path).unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandEncoder::new(&[]).is_err());
    }
}
