//! Assistant and user names
//!
//! The only mutable persisted state in the system. Names are loaded with the
//! configuration and written back to the `[identity]` table of the config file
//! whenever the rename handler changes them.

mod rename;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub use rename::{Rename, RenameHandler};

use crate::{Error, Result};

/// Current assistant and user names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Names {
    /// What the assistant calls itself
    pub assistant: String,
    /// How the assistant addresses the user
    pub user: String,
}

/// Persistence for the name fields
pub trait NameStore: Send + Sync {
    /// Current names
    fn names(&self) -> Names;

    /// Replace and persist the names
    ///
    /// # Errors
    ///
    /// Returns error if the names cannot be persisted; the in-memory value is
    /// left unchanged in that case
    fn save(&self, names: Names) -> Result<()>;
}

/// Names persisted into the `[identity]` table of the TOML config file
///
/// All other keys of the file are preserved.
pub struct TomlNameStore {
    path: PathBuf,
    current: Mutex<Names>,
}

impl TomlNameStore {
    /// Create a store backed by `path`, starting from `names`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, names: Names) -> Self {
        Self {
            path: path.into(),
            current: Mutex::new(names),
        }
    }

    /// Path of the backing config file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, names: &Names) -> Result<()> {
        let mut table: toml::Table = if self.path.exists() {
            toml::from_str(&std::fs::read_to_string(&self.path)?)?
        } else {
            toml::Table::new()
        };

        let identity = table
            .entry("identity")
            .or_insert(toml::Value::Table(toml::Table::new()));
        let toml::Value::Table(identity) = identity else {
            return Err(Error::Config("[identity] is not a table".to_string()));
        };
        identity.insert("assistant_name".to_string(), toml::Value::String(names.assistant.clone()));
        identity.insert("user_name".to_string(), toml::Value::String(names.user.clone()));

        let content = toml::to_string_pretty(&table)?;

        // Write to a sibling temp file and rename so a crash never truncates the config
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        Ok(())
    }
}

impl NameStore for TomlNameStore {
    fn names(&self) -> Names {
        self.current
            .lock()
            .map(|n| n.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn save(&self, names: Names) -> Result<()> {
        self.write_file(&names)?;
        tracing::info!(
            path = %self.path.display(),
            assistant = %names.assistant,
            user = %names.user,
            "names saved"
        );
        match self.current.lock() {
            Ok(mut current) => *current = names,
            Err(poisoned) => *poisoned.into_inner() = names,
        }
        Ok(())
    }
}

/// In-memory name store (no persistence)
pub struct MemoryNameStore {
    current: Mutex<Names>,
}

impl MemoryNameStore {
    /// Create a store starting from `names`
    #[must_use]
    pub const fn new(names: Names) -> Self {
        Self {
            current: Mutex::new(names),
        }
    }
}

impl NameStore for MemoryNameStore {
    fn names(&self) -> Names {
        self.current
            .lock()
            .map(|n| n.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn save(&self, names: Names) -> Result<()> {
        match self.current.lock() {
            Ok(mut current) => *current = names,
            Err(poisoned) => *poisoned.into_inner() = names,
        }
        Ok(())
    }
}
