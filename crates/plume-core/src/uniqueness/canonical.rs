//! Topic title -> `intent | entity | angle`

use serde::{Deserialize, Serialize};
use std::fmt;

pub const FALLBACK_INTENT: &str = "explore";
pub const FALLBACK_ENTITY: &str = "topic";
pub const FALLBACK_ANGLE: &str = "overview";

/// Dropped before content words are chosen
const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for",
    "from", "in", "into", "is", "it", "its", "my", "of", "on", "or", "our", "should", "that",
    "the", "this", "to", "vs", "we", "what", "when", "which", "who", "why", "will", "with",
    "you", "your",
];

/// Action words that name what a piece of content does for the reader.
/// These are never content words.
const INTENT_WORDS: &[&str] = &[
    "automate", "avoid", "build", "choose", "compare", "configure", "create", "debug",
    "deploy", "design", "explain", "fix", "guide", "how", "improve", "install", "learn",
    "master", "migrate", "optimize", "review", "scale", "secure", "setup", "test", "tips",
    "troubleshoot", "tutorial", "understand", "use", "write",
];

/// Adjectives that never make a good entity
const GENERIC_MODIFIERS: &[&str] = &[
    "advanced", "basic", "beginner", "beginners", "best", "better", "complete",
    "comprehensive", "easy", "effective", "essential", "intro", "introduction", "modern",
    "new", "practical", "quick", "simple", "top", "ultimate",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalForm {
    pub intent: String,
    pub entity: String,
    pub angle: String,
}

impl CanonicalForm {
    pub fn new(intent: &str, entity: &str, angle: &str) -> Self {
        Self {
            intent: intent.to_string(),
            entity: entity.to_string(),
            angle: angle.to_string(),
        }
    }

    /// Same intent and entity, different angle
    pub fn with_angle(&self, angle: &str) -> Self {
        Self::new(&self.intent, &self.entity, angle)
    }

    pub fn line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CanonicalForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {} | {}", self.intent, self.entity, self.angle)
    }
}

/// Lowercase alphanumeric words, single characters dropped
pub fn tokenize(title: &str) -> Vec<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

pub fn canonicalize(title: &str) -> CanonicalForm {
    let words = tokenize(title);

    let mut content: Vec<&str> = Vec::new();
    for word in &words {
        let word = word.as_str();
        if STOP_WORDS.contains(&word) || INTENT_WORDS.contains(&word) {
            continue;
        }
        if !content.contains(&word) {
            content.push(word);
        }
    }

    // (word, index into content when it came from there)
    let (intent, intent_idx) = match words
        .iter()
        .find(|w| INTENT_WORDS.contains(&w.as_str()))
    {
        Some(word) => (word.as_str(), None),
        None => match content.first() {
            Some(word) => (*word, Some(0)),
            None => (FALLBACK_INTENT, None),
        },
    };

    let entity_idx = content
        .iter()
        .position(|w| *w != intent && !GENERIC_MODIFIERS.contains(w))
        .or_else(|| (content.len() > 1).then_some(1));
    let entity = entity_idx.map(|i| content[i]).unwrap_or(FALLBACK_ENTITY);

    let rest: Vec<&str> = content
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != intent_idx && Some(*i) != entity_idx)
        .map(|(_, w)| *w)
        .take(2)
        .collect();
    let angle = if rest.is_empty() {
        FALLBACK_ANGLE.to_string()
    } else {
        rest.join(" ")
    };

    CanonicalForm::new(intent, entity, &angle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_is_deterministic() {
        let title = "Advanced TypeScript Patterns for Production Apps";
        let first = canonicalize(title).line();
        for _ in 0..10 {
            assert_eq!(canonicalize(title).line(), first);
        }
        assert_eq!(first, "advanced | typescript | patterns production");
    }

    #[test]
    fn test_action_word_becomes_intent() {
        let form = canonicalize("The Complete Guide to React for Beginners");
        assert_eq!(form.line(), "guide | react | complete beginners");
    }

    #[test]
    fn test_how_to_title() {
        let form = canonicalize("How to deploy Kubernetes in production");
        assert_eq!(form.intent, "how");
        assert_eq!(form.entity, "kubernetes");
        assert_eq!(form.angle, "production");
    }

    #[test]
    fn test_fallbacks() {
        assert_eq!(canonicalize("").line(), "explore | topic | overview");
        assert_eq!(canonicalize("How to?").line(), "how | topic | overview");
        assert_eq!(canonicalize("Rust").line(), "rust | topic | overview");
    }

    #[test]
    fn test_generic_only_titles_use_second_word() {
        let form = canonicalize("Best Modern Simple");
        assert_eq!(form.intent, "best");
        assert_eq!(form.entity, "modern");
        assert_eq!(form.angle, "simple");
    }

    #[test]
    fn test_angle_is_at_most_two_words() {
        let form = canonicalize("Learn Postgres indexing vacuum replication sharding");
        assert_eq!(form.line(), "learn | postgres | indexing vacuum");
    }

    #[test]
    fn test_repeated_words_count_once() {
        let form = canonicalize("Rust rust RUST async");
        assert_eq!(form.line(), "rust | async | overview");
    }

    #[test]
    fn test_with_angle_keeps_intent_and_entity() {
        let form = canonicalize("Guide to React hooks").with_angle("security");
        assert_eq!(form.line(), "guide | react | security");
    }
}
