//! Whitelist of permitted system commands
//!
//! Loaded once at startup from YAML with two lists, `safe_commands` and
//! `danger_commands`. Every entry carries a fixed argument vector; nothing
//! spoken by the user ever reaches the command line.
//!
//! `requires_auth` defaults to `true` under `danger_commands` and `false`
//! under `safe_commands`. A danger entry that should run for any speaker
//! must say `requires_auth: false` explicitly.
//!
//! ```yaml
//! safe_commands:
//!   - name: check_ram
//!     script: /usr/bin/free
//!     args: ["-h"]
//!     message: "Memory:"
//! danger_commands:
//!   # needs a verified speaker unless requires_auth: false is set
//!   - name: reboot_system
//!     script: /usr/bin/systemctl
//!     args: ["reboot"]
//!     confirm_prompt: "Do you really want to reboot?"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

const DEFAULT_MESSAGE: &str = "Command completed:";

/// Raw YAML schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct WhitelistFile {
    #[serde(default)]
    safe_commands: Vec<RawEntry>,
    #[serde(default)]
    danger_commands: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    name: String,
    script: String,
    #[serde(default)]
    args: Vec<String>,
    requires_auth: Option<bool>,
    confirm_prompt: Option<String>,
    message: Option<String>,
}

/// A permitted command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistEntry {
    /// Intent name used as the lookup key
    pub name: String,
    /// Program to execute
    pub script: PathBuf,
    /// Fixed argument vector
    pub args: Vec<String>,
    /// Whether the speaker must be authenticated
    pub requires_auth: bool,
    /// Question to ask before running, if any
    pub confirm_prompt: Option<String>,
    /// Prefix for the spoken result
    pub message: String,
}

/// Immutable name -> entry mapping
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    entries: HashMap<String, WhitelistEntry>,
}

impl Whitelist {
    /// Load and validate the whitelist file
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing, malformed, or contains a name
    /// more than once (across both lists)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Whitelist(format!("cannot read {}: {e}", path.display()))
        })?;
        let whitelist = Self::from_yaml(&content)?;

        tracing::info!(
            path = %path.display(),
            commands = whitelist.len(),
            "whitelist loaded"
        );
        Ok(whitelist)
    }

    /// Parse and validate whitelist YAML
    ///
    /// Entries in `danger_commands` require authentication unless they say
    /// otherwise; `safe_commands` entries do not.
    ///
    /// # Errors
    ///
    /// Returns error on malformed YAML, empty names/scripts, or duplicates
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: WhitelistFile = serde_yaml::from_str(content)?;

        let mut entries = HashMap::new();
        let lists = [(file.safe_commands, false), (file.danger_commands, true)];

        for (list, dangerous) in lists {
            for raw in list {
                let name = raw.name.trim().to_string();
                if name.is_empty() {
                    return Err(Error::Whitelist("entry with empty name".to_string()));
                }
                if raw.script.trim().is_empty() {
                    return Err(Error::Whitelist(format!("{name}: empty script")));
                }

                let entry = WhitelistEntry {
                    name: name.clone(),
                    script: PathBuf::from(raw.script.trim()),
                    args: raw.args,
                    requires_auth: raw.requires_auth.unwrap_or(dangerous),
                    confirm_prompt: raw.confirm_prompt.filter(|p| !p.trim().is_empty()),
                    message: raw.message.unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
                };

                if entries.insert(name.clone(), entry).is_some() {
                    return Err(Error::Whitelist(format!("duplicate command name: {name}")));
                }
            }
        }

        Ok(Self { entries })
    }

    /// Build a whitelist from entries (duplicates rejected)
    ///
    /// # Errors
    ///
    /// Returns error if a name appears more than once
    pub fn from_entries(list: impl IntoIterator<Item = WhitelistEntry>) -> Result<Self> {
        let mut entries = HashMap::new();
        for entry in list {
            let name = entry.name.clone();
            if entries.insert(name.clone(), entry).is_some() {
                return Err(Error::Whitelist(format!("duplicate command name: {name}")));
            }
        }
        Ok(Self { entries })
    }

    /// Look up an entry by intent name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&WhitelistEntry> {
        self.entries.get(name)
    }

    /// Whether `name` is a whitelisted command
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the whitelist has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries
    pub fn entries(&self) -> impl Iterator<Item = &WhitelistEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
safe_commands:
  - name: check_date
    script: /bin/date
    message: "Today is"
  - name: check_disk
    script: /bin/df
    args: ["-h", "/"]
danger_commands:
  - name: update_system
    script: /usr/bin/apt
    args: [upgrade, -y]
    confirm_prompt: "Should I update the system?"
"#;

    #[test]
    fn test_parse_sample() {
        let wl = Whitelist::from_yaml(SAMPLE).unwrap();
        assert_eq!(wl.len(), 3);

        let date = wl.get("check_date").unwrap();
        assert!(!date.requires_auth);
        assert_eq!(date.message, "Today is");

        let disk = wl.get("check_disk").unwrap();
        assert_eq!(disk.args, vec!["-h", "/"]);
        assert_eq!(disk.message, DEFAULT_MESSAGE);

        let update = wl.get("update_system").unwrap();
        assert!(update.requires_auth);
        assert_eq!(update.confirm_prompt.as_deref(), Some("Should I update the system?"));
    }

    #[test]
    fn test_duplicate_across_lists_rejected() {
        let yaml = r"
safe_commands:
  - name: reboot_system
    script: /bin/true
danger_commands:
  - name: reboot_system
    script: /sbin/reboot
";
        let err = Whitelist::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_danger_can_opt_out_of_auth() {
        let yaml = r"
danger_commands:
  - name: restart_audio
    script: /usr/bin/systemctl
    args: [--user, restart, pipewire]
    requires_auth: false
";
        let wl = Whitelist::from_yaml(yaml).unwrap();
        assert!(!wl.get("restart_audio").unwrap().requires_auth);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
safe_commands:
  - name: check_date
    script: /bin/date
    shell: "date | cat"
"#;
        assert!(Whitelist::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Whitelist::load(&dir.path().join("whitelist.yml")).is_err());
    }
}
