//! Command dispatch gate
//!
//! Resolves an intent name against the whitelist, enforces authentication and
//! confirmation policy, and runs the entry's fixed argument vector. The intent
//! name is only ever used as a lookup key; no shell is involved.

mod whitelist;

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;

pub use whitelist::{Whitelist, WhitelistEntry};

/// Default wall-clock limit for a command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const AUTH_PROMPT: &str = "Voice authentication is required for that command.";

/// Outcome of a dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// Command ran and exited zero; carries the spoken output
    Success(String),
    /// Speaker must be authenticated first
    AuthRequired(String),
    /// Caller must obtain confirmation and re-invoke via `execute_confirmed`
    ConfirmRequired(String),
    /// Intent is not whitelisted
    NotFound,
    /// Command failed to spawn, exited non-zero, or timed out
    Error(String),
}

impl DispatchResult {
    /// Text to speak for this result
    #[must_use]
    pub fn spoken(&self) -> String {
        match self {
            Self::Success(output) => output.clone(),
            Self::AuthRequired(prompt) | Self::ConfirmRequired(prompt) => prompt.clone(),
            Self::NotFound => "I don't know how to do that.".to_string(),
            Self::Error(_) => "Sorry, that command failed.".to_string(),
        }
    }
}

/// Whitelist-backed command executor
pub struct DispatchGate {
    whitelist: Whitelist,
    timeout: Duration,
}

impl DispatchGate {
    /// Create a gate over a loaded whitelist
    #[must_use]
    pub const fn new(whitelist: Whitelist, timeout: Duration) -> Self {
        Self { whitelist, timeout }
    }

    /// The underlying whitelist
    #[must_use]
    pub const fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// Dispatch an intent
    ///
    /// Short-circuits in order: unknown name, missing authentication,
    /// pending confirmation. Only then is a process spawned.
    pub async fn execute(&self, intent: &str, is_authenticated: bool) -> DispatchResult {
        self.dispatch(intent, is_authenticated, false).await
    }

    /// Dispatch an intent whose confirmation prompt was already answered
    ///
    /// Lookup and authentication are still enforced.
    pub async fn execute_confirmed(&self, intent: &str, is_authenticated: bool) -> DispatchResult {
        self.dispatch(intent, is_authenticated, true).await
    }

    async fn dispatch(&self, intent: &str, is_authenticated: bool, confirmed: bool) -> DispatchResult {
        let Some(entry) = self.whitelist.get(intent) else {
            tracing::info!(intent, "intent not whitelisted");
            return DispatchResult::NotFound;
        };

        if entry.requires_auth && !is_authenticated {
            tracing::info!(intent, "command requires authentication");
            return DispatchResult::AuthRequired(AUTH_PROMPT.to_string());
        }

        if !confirmed {
            if let Some(prompt) = &entry.confirm_prompt {
                tracing::info!(intent, "command requires confirmation");
                return DispatchResult::ConfirmRequired(prompt.clone());
            }
        }

        self.run(entry).await
    }

    async fn run(&self, entry: &WhitelistEntry) -> DispatchResult {
        tracing::info!(
            intent = %entry.name,
            script = %entry.script.display(),
            args = ?entry.args,
            "executing command"
        );

        let mut command = Command::new(&entry.script);
        command
            .args(&entry.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout also reaches anything it forked
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(intent = %entry.name, error = %e, "failed to spawn command");
                return DispatchResult::Error(format!("failed to spawn: {e}"));
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let result = timeout(self.timeout, async {
            tokio::try_join!(child.wait(), read_pipe(stdout), read_pipe(stderr))
        })
        .await;

        let (status, stdout, stderr) = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(intent = %entry.name, error = %e, "command execution failed");
                return DispatchResult::Error(format!("execution failed: {e}"));
            }
            Err(_) => {
                #[cfg(unix)]
                kill_group(&child);
                if let Err(e) = child.kill().await {
                    tracing::warn!(intent = %entry.name, error = %e, "failed to kill timed out command");
                }
                tracing::error!(intent = %entry.name, timeout = ?self.timeout, "command timed out");
                return DispatchResult::Error(format!("timed out after {:?}", self.timeout));
            }
        };

        if !stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&stderr);
            tracing::debug!(intent = %entry.name, stderr = %stderr.trim(), "command stderr");
        }

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            tracing::warn!(intent = %entry.name, code, "command exited non-zero");
            return DispatchResult::Error(format!("exited with code {code}"));
        }

        let output = single_line(&String::from_utf8_lossy(&stdout));
        DispatchResult::Success(format!("{} {output}", entry.message).trim().to_string())
    }
}

/// SIGKILL the child's process group
#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_group(child: &tokio::process::Child) {
    let Some(pgid) = child.id().and_then(|id| libc::pid_t::try_from(id).ok()) else {
        return;
    };
    // SAFETY: killpg takes plain integers and touches no memory of ours
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        tracing::warn!(
            pgid,
            error = %std::io::Error::last_os_error(),
            "failed to kill process group"
        );
    }
}

async fn read_pipe(pipe: Option<impl AsyncRead + Unpin>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Collapse multi-line output into one speakable line
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        assert_eq!(single_line("  Mem:  15Gi\n Swap: 2Gi \n"), "Mem: 15Gi Swap: 2Gi");
        assert_eq!(single_line("\n\n"), "");
    }

    #[test]
    fn test_spoken_never_leaks_error_detail() {
        let spoken = DispatchResult::Error("exited with code 2".to_string()).spoken();
        assert!(!spoken.contains("code 2"));
    }

    #[tokio::test]
    async fn test_unknown_intent() {
        let gate = DispatchGate::new(Whitelist::default(), DEFAULT_TIMEOUT);
        assert_eq!(gate.execute("rm -rf /", true).await, DispatchResult::NotFound);
        assert_eq!(gate.execute_confirmed("unknown", true).await, DispatchResult::NotFound);
    }
}
