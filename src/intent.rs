//! Keyword intent resolution
//!
//! Maps free-form (often Hinglish) transcripts onto whitelist command names.
//! The table is ordered: the first rule with any whole-word keyword match
//! wins, regardless of keyword length or how many keywords matched.

use regex::Regex;

/// One row of the intent table
#[derive(Debug, Clone)]
pub struct IntentRule {
    name: String,
    keywords: Vec<String>,
}

impl IntentRule {
    /// Create a rule mapping `keywords` to the intent `name`
    #[must_use]
    pub fn new(name: impl Into<String>, keywords: Vec<String>) -> Self {
        Self {
            name: name.into(),
            keywords: keywords
                .into_iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Intent (whitelist command) name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized keywords
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

/// Built-in intent table
#[must_use]
pub fn default_intents() -> Vec<IntentRule> {
    let rule = |name: &str, keywords: &[&str]| {
        IntentRule::new(name, keywords.iter().map(|k| (*k).to_string()).collect())
    };

    vec![
        rule(
            "check_date",
            &["date", "tareekh", "tarik", "dinank", "din kya hai", "aaj kya din hai"],
        ),
        rule("check_ram", &["ram", "memory", "system memory", "kitni ram"]),
        rule("check_disk", &["disk", "storage", "hard drive", "kitni jagah hai"]),
        rule("update_system", &["update", "system update", "update kardo"]),
        rule("reboot_system", &["reboot", "restart", "band karke chalu"]),
    ]
}

/// Compiled, ordered intent matcher
pub struct IntentResolver {
    rules: Vec<(String, Vec<Regex>)>,
}

impl IntentResolver {
    /// Compile the table
    ///
    /// Keywords are regex-escaped, so they always match literally.
    #[must_use]
    pub fn new(rules: &[IntentRule]) -> Self {
        let rules = rules
            .iter()
            .map(|rule| {
                let patterns = rule
                    .keywords
                    .iter()
                    .filter_map(|k| Regex::new(&format!(r"\b{}\b", regex::escape(k))).ok())
                    .collect();
                (rule.name.clone(), patterns)
            })
            .collect();

        Self { rules }
    }

    /// Resolve a transcript to an intent name
    #[must_use]
    pub fn resolve(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();

        for (name, patterns) in &self.rules {
            if let Some(re) = patterns.iter().find(|re| re.is_match(&lower)) {
                tracing::debug!(intent = %name, keyword = re.as_str(), "intent matched");
                return Some(name);
            }
        }

        tracing::debug!("no intent matched");
        None
    }

    /// Intent names in table order
    pub fn intents(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> IntentResolver {
        IntentResolver::new(&default_intents())
    }

    #[test]
    fn test_memory_check() {
        assert_eq!(resolver().resolve("system memory check karo"), Some("check_ram"));
    }

    #[test]
    fn test_date_in_hinglish() {
        assert_eq!(resolver().resolve("Jarvis aaj ki tareekh kya hai"), Some("check_date"));
    }

    #[test]
    fn test_no_match_falls_through() {
        assert_eq!(resolver().resolve("mausam kaisa hai"), None);
    }

    #[test]
    fn test_whole_word_only() {
        // "ram" must not match inside "program", "update" not inside "updated"
        assert_eq!(resolver().resolve("open the program"), None);
        assert_eq!(resolver().resolve("is it outdated"), None);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(resolver().resolve("REBOOT now"), Some("reboot_system"));
    }

    #[test]
    fn test_table_order_beats_keyword_length() {
        // "disk" (check_disk) is shorter than "system update" but its rule comes first
        let rules = vec![
            IntentRule::new("check_disk", vec!["disk".to_string()]),
            IntentRule::new("update_system", vec!["system update".to_string()]),
        ];
        let resolver = IntentResolver::new(&rules);
        assert_eq!(resolver.resolve("system update then disk"), Some("check_disk"));

        let reversed = IntentResolver::new(&[rules[1].clone(), rules[0].clone()]);
        assert_eq!(reversed.resolve("system update then disk"), Some("update_system"));
    }

    #[test]
    fn test_keywords_are_literal() {
        let resolver = IntentResolver::new(&[IntentRule::new("odd", vec!["c++".to_string()])]);
        assert_eq!(resolver.resolve("ccc"), None);
    }

    #[test]
    fn test_intents_in_order() {
        let names: Vec<_> = resolver().intents().map(ToString::to_string).collect();
        assert_eq!(names[0], "check_date");
        assert_eq!(names[4], "reboot_system");
    }
}
