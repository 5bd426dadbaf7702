//! Command dispatch integration tests
//!
//! Runs real child processes through `/bin/sh`, so these only build on unix.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use jarvis_core::{DispatchGate, DispatchResult, Whitelist, WhitelistEntry};

/// Entry that appends a line to `marker` each time it runs, then prints `stdout`
fn counting_entry(name: &str, marker: &Path, stdout: &str) -> WhitelistEntry {
    WhitelistEntry {
        name: name.to_string(),
        script: PathBuf::from("/bin/sh"),
        args: vec![
            "-c".to_string(),
            format!("echo ran >> '{}'; printf '{stdout}'", marker.display()),
        ],
        requires_auth: false,
        confirm_prompt: None,
        message: "Command completed:".to_string(),
    }
}

fn runs(marker: &Path) -> usize {
    std::fs::read_to_string(marker).map_or(0, |s| s.lines().count())
}

fn gate(entries: Vec<WhitelistEntry>, timeout: Duration) -> DispatchGate {
    DispatchGate::new(Whitelist::from_entries(entries).unwrap(), timeout)
}

#[tokio::test]
async fn test_success_runs_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("runs");
    let gate = gate(
        vec![counting_entry("check_ram", &marker, "Mem: 15Gi\\nSwap: 2Gi\\n")],
        Duration::from_secs(10),
    );

    let result = gate.execute("check_ram", false).await;

    assert_eq!(
        result,
        DispatchResult::Success("Command completed: Mem: 15Gi Swap: 2Gi".to_string())
    );
    assert_eq!(runs(&marker), 1);
}

#[tokio::test]
async fn test_unknown_intent_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("runs");
    let gate = gate(vec![counting_entry("check_ram", &marker, "")], Duration::from_secs(10));

    assert_eq!(gate.execute("check_ram; rm -rf /", true).await, DispatchResult::NotFound);
    assert_eq!(gate.execute("", true).await, DispatchResult::NotFound);
    assert_eq!(runs(&marker), 0);
}

#[tokio::test]
async fn test_auth_required_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("runs");
    let mut entry = counting_entry("reboot_system", &marker, "");
    entry.requires_auth = true;
    let gate = gate(vec![entry], Duration::from_secs(10));

    let result = gate.execute("reboot_system", false).await;
    assert!(matches!(result, DispatchResult::AuthRequired(_)));

    // Confirmation does not bypass authentication
    let result = gate.execute_confirmed("reboot_system", false).await;
    assert!(matches!(result, DispatchResult::AuthRequired(_)));
    assert_eq!(runs(&marker), 0);

    let result = gate.execute("reboot_system", true).await;
    assert!(matches!(result, DispatchResult::Success(_)));
    assert_eq!(runs(&marker), 1);
}

#[tokio::test]
async fn test_confirmation_then_execute() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("runs");
    let mut entry = counting_entry("update_system", &marker, "done");
    entry.confirm_prompt = Some("Update the system now?".to_string());
    let gate = gate(vec![entry], Duration::from_secs(10));

    let result = gate.execute("update_system", false).await;
    assert_eq!(
        result,
        DispatchResult::ConfirmRequired("Update the system now?".to_string())
    );
    assert_eq!(runs(&marker), 0);

    let result = gate.execute_confirmed("update_system", false).await;
    assert_eq!(result, DispatchResult::Success("Command completed: done".to_string()));
    assert_eq!(runs(&marker), 1);
}

#[tokio::test]
async fn test_non_zero_exit_is_an_error() {
    let entry = WhitelistEntry {
        name: "check_disk".to_string(),
        script: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string(), "echo partial; exit 3".to_string()],
        requires_auth: false,
        confirm_prompt: None,
        message: "Disk:".to_string(),
    };
    let gate = gate(vec![entry], Duration::from_secs(10));

    let result = gate.execute("check_disk", false).await;
    assert!(matches!(result, DispatchResult::Error(_)));
    assert_eq!(result.spoken(), "Sorry, that command failed.");
}

#[tokio::test]
async fn test_missing_script_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let entry = WhitelistEntry {
        name: "check_date".to_string(),
        script: dir.path().join("no-such-script.sh"),
        args: Vec::new(),
        requires_auth: false,
        confirm_prompt: None,
        message: "Today is".to_string(),
    };
    let gate = gate(vec![entry], Duration::from_secs(10));

    assert!(matches!(gate.execute("check_date", false).await, DispatchResult::Error(_)));
}

#[tokio::test]
async fn test_timeout_kills_command() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("runs");
    let entry = WhitelistEntry {
        name: "update_system".to_string(),
        script: PathBuf::from("/bin/sh"),
        args: vec![
            "-c".to_string(),
            format!("sleep 1; echo ran >> '{}'", marker.display()),
        ],
        requires_auth: false,
        confirm_prompt: None,
        message: "Updated:".to_string(),
    };
    let gate = gate(vec![entry], Duration::from_millis(200));

    let started = Instant::now();
    let result = gate.execute("update_system", false).await;

    assert!(matches!(result, DispatchResult::Error(_)));
    assert!(started.elapsed() < Duration::from_secs(1));

    // The shell was killed before it got to the write
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(runs(&marker), 0);
}

#[tokio::test]
async fn test_timeout_kills_background_children() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("runs");
    let entry = WhitelistEntry {
        name: "update_system".to_string(),
        script: PathBuf::from("/bin/sh"),
        args: vec![
            "-c".to_string(),
            format!("(sleep 1; echo ran >> '{}') & sleep 5", marker.display()),
        ],
        requires_auth: false,
        confirm_prompt: None,
        message: "Updated:".to_string(),
    };
    let gate = gate(vec![entry], Duration::from_millis(200));

    let started = Instant::now();
    let result = gate.execute("update_system", false).await;

    assert!(matches!(result, DispatchResult::Error(_)));
    assert!(started.elapsed() < Duration::from_secs(1));

    // The forked subshell went down with the rest of the group
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(runs(&marker), 0);
}

#[test]
fn test_danger_commands_require_auth_by_default() {
    let whitelist = Whitelist::from_yaml(
        r#"
safe_commands:
  - name: check_date
    script: /usr/bin/date
    message: "Today is"
danger_commands:
  - name: reboot_system
    script: /usr/bin/systemctl
    args: ["reboot"]
    confirm_prompt: "Reboot now?"
  - name: update_system
    script: /usr/bin/apt
    requires_auth: false
"#,
    )
    .unwrap();

    assert!(!whitelist.get("check_date").unwrap().requires_auth);
    assert!(whitelist.get("reboot_system").unwrap().requires_auth);
    assert!(!whitelist.get("update_system").unwrap().requires_auth);
    assert_eq!(whitelist.get("reboot_system").unwrap().args, ["reboot"]);
}

#[test]
fn test_duplicate_names_across_lists_rejected() {
    let result = Whitelist::from_yaml(
        r"
safe_commands:
  - name: check_ram
    script: /usr/bin/free
danger_commands:
  - name: check_ram
    script: /usr/bin/free
",
    );
    assert!(result.is_err());
}
