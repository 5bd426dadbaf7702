//! Environment self-test (`jarvis self-test`)
//!
//! Checks everything the loop needs before it starts: configuration,
//! whitelist, keyword model, and the external binaries and models of each
//! configured backend.

use std::path::{Path, PathBuf};

use crate::config::{Config, LlmBackend, SttBackend};
use crate::dispatch::Whitelist;

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    /// What was checked
    pub label: String,
    /// Whether it passed
    pub ok: bool,
    /// Path or error detail
    pub detail: String,
}

impl Check {
    fn pass(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Run all checks against an explicit config path or the default one
#[must_use]
pub fn run_checks(config_path: Option<&Path>) -> Vec<Check> {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => return vec![Check::fail("config", e.to_string())],
    };

    let mut checks = vec![Check::pass("config", config.config_path.display().to_string())];
    checks.extend(check_config(&config));
    checks
}

/// Checks that only need a resolved configuration
#[must_use]
pub fn check_config(config: &Config) -> Vec<Check> {
    let mut checks = Vec::new();

    checks.push(match Whitelist::load(&config.dispatch.whitelist_path) {
        Ok(wl) => Check::pass(
            "whitelist",
            format!("{} ({} commands)", config.dispatch.whitelist_path.display(), wl.len()),
        ),
        Err(e) => Check::fail("whitelist", e.to_string()),
    });

    checks.push(file_check("keyword model", &config.wake.keyword_path));

    match &config.stt.backend {
        SttBackend::WhisperCpp { binary, model, .. } => {
            checks.push(binary_check("whisper binary", binary));
            checks.push(file_check("whisper model", model));
        }
        SttBackend::OpenAi { url, .. } => checks.push(Check::pass("whisper api", url.clone())),
    }

    match &config.llm.backend {
        LlmBackend::LlamaCpp { binary, model, .. } => {
            checks.push(binary_check("llama binary", binary));
            checks.push(file_check("llama model", model));
        }
        LlmBackend::OpenAi { url, .. } => checks.push(Check::pass("chat api", url.clone())),
    }

    checks.push(binary_check("piper binary", &config.tts.piper_binary));
    for (id, model) in &config.tts.voices {
        checks.push(file_check(&format!("voice {id}"), model));
    }

    if let Some(speaker) = &config.speaker {
        if let Some(program) = speaker.encoder_command.first() {
            checks.push(binary_check("speaker encoder", Path::new(program)));
        }
        checks.push(file_check("voiceprint", &speaker.voiceprint_path));
    }

    checks
}

/// Print the report; returns whether every check passed
pub fn print_report(checks: &[Check]) -> bool {
    println!("--- Self-test report ---");
    for check in checks {
        let status = if check.ok { "OK  " } else { "FAIL" };
        println!("{status} {:<16} {}", check.label, check.detail);
    }

    let failed = checks.iter().filter(|c| !c.ok).count();
    if failed == 0 {
        println!("\nAll checks passed.");
    } else {
        println!("\n{failed} check(s) failed.");
    }
    failed == 0
}

fn file_check(label: &str, path: &Path) -> Check {
    if path.is_file() {
        Check::pass(label, path.display().to_string())
    } else {
        Check::fail(label, format!("not found: {}", path.display()))
    }
}

/// A bare program name is looked up on `PATH`, anything else must exist
fn binary_check(label: &str, binary: &Path) -> Check {
    match resolve_binary(binary) {
        Some(found) => Check::pass(label, found.display().to_string()),
        None => Check::fail(label, format!("not found: {}", binary.display())),
    }
}

fn resolve_binary(binary: &Path) -> Option<PathBuf> {
    if binary.components().count() > 1 {
        return binary.is_file().then(|| binary.to_path_buf());
    }
    which::which(binary).ok()
}
