//! Voice rename commands ("change your name to friday")

use regex::Regex;

use super::{NameStore, Names};
use crate::{Error, Result};

/// A parsed rename request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rename {
    /// Rename the assistant
    Assistant(String),
    /// Rename the user
    User(String),
}

/// Pattern-based rename handler
///
/// Matching runs on the lowercased transcript, so stored names are lowercase.
pub struct RenameHandler {
    assistant: Vec<Regex>,
    user: Vec<Regex>,
}

impl RenameHandler {
    /// Build the handler with the English and Hinglish patterns
    ///
    /// # Errors
    ///
    /// Returns error if a pattern fails to compile
    pub fn new() -> Result<Self> {
        let compile = |patterns: &[&str]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| Regex::new(p).map_err(|e| Error::Config(format!("bad rename pattern: {e}"))))
                .collect()
        };

        Ok(Self {
            assistant: compile(&[
                r"\b(?:change|badlo|set) (?:your|tumhara) name to (.+)",
                r"\btumhara naam badal kar (.+?) kar do\b",
            ])?,
            user: compile(&[
                r"\b(?:change|badlo|set) (?:my|mera) name to (.+)",
                r"\bmera naam badal kar (.+?) kar do\b",
            ])?,
        })
    }

    /// Parse a transcript into a rename request, if it is one
    #[must_use]
    pub fn parse(&self, text: &str) -> Option<Rename> {
        let lower = text.to_lowercase();

        if let Some(name) = first_capture(&self.assistant, &lower) {
            return Some(Rename::Assistant(name));
        }
        first_capture(&self.user, &lower).map(Rename::User)
    }

    /// Apply a rename found in `text` and return the spoken response
    ///
    /// Returns `Ok(None)` when the text is not a rename command.
    ///
    /// # Errors
    ///
    /// Returns error if the new name cannot be persisted
    pub fn handle(&self, text: &str, store: &dyn NameStore) -> Result<Option<String>> {
        let Some(rename) = self.parse(text) else {
            return Ok(None);
        };

        let current = store.names();
        let (names, response) = match rename {
            Rename::Assistant(name) => (
                Names {
                    assistant: name.clone(),
                    user: current.user,
                },
                format!("Okay, from now on my name is {name}."),
            ),
            Rename::User(name) => (
                Names {
                    assistant: current.assistant,
                    user: name.clone(),
                },
                format!("Noted, from now on I will call you {name}."),
            ),
        };

        store.save(names)?;
        Ok(Some(response))
    }
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        let name = re.captures(text)?.get(1)?.as_str();
        let name = name
            .trim()
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .trim();
        (!name.is_empty()).then(|| name.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryNameStore;

    fn store() -> MemoryNameStore {
        MemoryNameStore::new(Names {
            assistant: "Jarvis".to_string(),
            user: "Sir".to_string(),
        })
    }

    #[test]
    fn test_parse_assistant_rename() {
        let handler = RenameHandler::new().unwrap();
        assert_eq!(
            handler.parse("Jarvis change your name to Friday."),
            Some(Rename::Assistant("friday".to_string()))
        );
    }

    #[test]
    fn test_parse_user_rename() {
        let handler = RenameHandler::new().unwrap();
        assert_eq!(
            handler.parse("set my name to Boss"),
            Some(Rename::User("boss".to_string()))
        );
        assert_eq!(
            handler.parse("mera naam badal kar boss kar do"),
            Some(Rename::User("boss".to_string()))
        );
    }

    #[test]
    fn test_not_a_rename() {
        let handler = RenameHandler::new().unwrap();
        assert_eq!(handler.parse("aaj mausam kaisa hai"), None);
        assert_eq!(handler.parse("change your name to"), None);
    }

    #[test]
    fn test_handle_persists_and_responds() {
        let handler = RenameHandler::new().unwrap();
        let store = store();

        let response = handler
            .handle("change your name to friday", &store)
            .unwrap()
            .unwrap();

        assert!(response.contains("friday"));
        assert_eq!(store.names().assistant, "friday");
        assert_eq!(store.names().user, "Sir");
    }

    #[test]
    fn test_handle_ignores_other_text() {
        let handler = RenameHandler::new().unwrap();
        let store = store();
        assert!(handler.handle("system memory check karo", &store).unwrap().is_none());
        assert_eq!(store.names().assistant, "Jarvis");
    }
}
