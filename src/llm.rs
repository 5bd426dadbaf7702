//! Language model fallback
//!
//! Free-form requests that are neither a rename nor a whitelisted intent are
//! answered by a language model: a local llama.cpp CLI or an `OpenAI`-compatible
//! chat endpoint.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::{LlmBackend, LlmConfig};
use crate::{Error, Result};

/// Text completion
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `prompt` with a short spoken answer, in the persona of
    /// `assistant` (the current assistant name)
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails or times out
    async fn complete(&self, prompt: &str, assistant: &str) -> Result<String>;
}

/// Build the configured model
#[must_use]
pub fn create_model(config: &LlmConfig) -> Box<dyn LanguageModel> {
    match &config.backend {
        LlmBackend::LlamaCpp {
            binary,
            model,
            threads,
            n_predict,
            temperature,
        } => Box::new(LlamaCppModel {
            binary: binary.clone(),
            model: model.clone(),
            threads: *threads,
            n_predict: *n_predict,
            temperature: *temperature,
            timeout: config.timeout,
        }),
        LlmBackend::OpenAi {
            url,
            model,
            api_key,
        } => Box::new(OpenAiChatModel {
            client: reqwest::Client::new(),
            url: url.clone(),
            model: model.clone(),
            api_key: api_key.clone(),
            timeout: config.timeout,
        }),
    }
}

/// Local llama.cpp CLI
pub struct LlamaCppModel {
    binary: PathBuf,
    model: PathBuf,
    threads: usize,
    n_predict: u32,
    temperature: f32,
    timeout: Duration,
}

fn llama_prompt(text: &str, assistant: &str) -> String {
    format!("User: {text}\n{assistant}:")
}

#[async_trait]
impl LanguageModel for LlamaCppModel {
    async fn complete(&self, prompt: &str, assistant: &str) -> Result<String> {
        let full_prompt = llama_prompt(prompt, assistant);
        tracing::debug!(prompt, "running llama.cpp");

        let child = Command::new(&self.binary)
            .arg("-m")
            .arg(&self.model)
            .arg("-p")
            .arg(&full_prompt)
            .arg("-n")
            .arg(self.n_predict.to_string())
            .arg("-t")
            .arg(self.threads.to_string())
            .arg("--temp")
            .arg(self.temperature.to_string())
            .arg("-e")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Llm(format!("failed to spawn {}: {e}", self.binary.display())))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout("completion".to_string(), self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(code = ?output.status.code(), stderr = %stderr.trim(), "llama.cpp failed");
            return Err(Error::Llm(format!(
                "llama.cpp exited with code {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        let response = extract_answer(&String::from_utf8_lossy(&output.stdout), &full_prompt);
        tracing::info!(response = %response, "completion finished");
        Ok(response)
    }
}

/// The first line generated after the echoed prompt
#[must_use]
pub fn extract_answer(stdout: &str, prompt: &str) -> String {
    let generated = stdout.split_once(prompt).map_or(stdout, |(_, rest)| rest);
    generated
        .trim()
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// `OpenAI`-compatible chat completion endpoint
pub struct OpenAiChatModel {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: SecretString,
    timeout: Duration,
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, prompt: &str, assistant: &str) -> Result<String> {
        let system = format!(
            "You are {assistant}, a local voice assistant. Answer in one or two short spoken sentences."
        );
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: 128,
        };

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Llm(format!("chat API error {status}: {body}")));
        }

        let result: ChatResponse = response.json().await?;
        let answer = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .ok_or_else(|| Error::Llm("empty chat response".to_string()))?;

        tracing::info!(response = %answer, "completion finished");
        Ok(answer)
    }
}
