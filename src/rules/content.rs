//! Content exclusivity lexicon.
//!
//! Decides whether two fact statements cannot both hold: either they use
//! words from opposite sides of an antonym pair ("enemy" / "ally"), or one
//! is the plain negation of the other ("X is armed" / "X is not armed").

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

struct AntonymPair {
    name: &'static str,
    left: Regex,
    right: Regex,
}

fn pair(name: &'static str, left: &str, right: &str) -> AntonymPair {
    AntonymPair {
        name,
        left: Regex::new(&format!(r"(?i)\b(?:{left})\b")).expect("static antonym pattern"),
        right: Regex::new(&format!(r"(?i)\b(?:{right})\b")).expect("static antonym pattern"),
    }
}

/// Name of the antonym pair owned by the character-state rule.
pub const LIFE_STATE: &str = "life_state";

static ANTONYMS: LazyLock<Vec<AntonymPair>> = LazyLock::new(|| {
    vec![
        pair(LIFE_STATE, "dead|died|deceased|slain|killed", "alive|living"),
        pair("allegiance", "enemy|enemies|foe|foes", "friend|friends|ally|allies"),
        pair("marital", "married|wed", "single|unmarried"),
        pair("attendance", "present", "absent|missing"),
        pair("wakefulness", "awake", "asleep|unconscious"),
        pair("captivity", "free|freed|escaped", "captured|imprisoned|captive|jailed"),
        pair("nature", "human|mortal", "vampire|undead|immortal"),
    ]
});

static NEGATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:not|never|no longer)\b|n't\b").expect("static negation pattern")
});

const STOPWORDS: &[&str] = &[
    "the", "and", "was", "were", "is", "are", "has", "had", "have", "been", "that", "this",
    "with", "from", "into", "not", "never", "longer", "now", "still", "who", "but", "for",
];

/// Why two statements were judged mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Exclusion {
    /// Opposite sides of a named antonym pair.
    Antonym { pair: String },
    /// One statement negates the other.
    Negation,
}

impl Exclusion {
    /// Returns true for the dead/alive pair.
    #[must_use]
    pub fn is_life_state(&self) -> bool {
        matches!(self, Self::Antonym { pair } if pair == LIFE_STATE)
    }
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Antonym { pair } => write!(f, "antonym({pair})"),
            Self::Negation => f.write_str("negation"),
        }
    }
}

/// Dead or alive, as asserted by a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifeState {
    Dead,
    Alive,
}

impl LifeState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dead => "dead",
            Self::Alive => "alive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

fn negated_before(text: &str, start: usize) -> bool {
    let prefix = text[..start].trim_end().to_ascii_lowercase();
    prefix.ends_with(" not")
        || prefix == "not"
        || prefix.ends_with("n't")
        || prefix.ends_with(" never")
        || prefix.ends_with("no longer")
}

/// Which side of `pair` the statement lands on, honoring a preceding negation.
/// `None` if it mentions neither side or lands on both.
fn side(text: &str, pair: &AntonymPair) -> Option<Side> {
    let mut seen: Option<Side> = None;
    let hits = pair
        .left
        .find_iter(text)
        .map(|m| (m, Side::Left))
        .chain(pair.right.find_iter(text).map(|m| (m, Side::Right)));
    for (m, raw) in hits {
        let s = match (raw, negated_before(text, m.start())) {
            (s, false) => s,
            (Side::Left, true) => Side::Right,
            (Side::Right, true) => Side::Left,
        };
        match seen {
            None => seen = Some(s),
            Some(prev) if prev != s => return None,
            Some(_) => {}
        }
    }
    seen
}

/// Life state asserted by a statement, if it asserts exactly one.
#[must_use]
pub fn life_state(text: &str) -> Option<LifeState> {
    let life = ANTONYMS.iter().find(|p| p.name == LIFE_STATE)?;
    side(text, life).map(|s| match s {
        Side::Left => LifeState::Dead,
        Side::Right => LifeState::Alive,
    })
}

fn normalize(text: &str) -> String {
    let stripped = NEGATION.replace_all(text, " ");
    stripped
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn lexicon_word(word: &str) -> bool {
    ANTONYMS
        .iter()
        .any(|p| p.left.is_match(word) || p.right.is_match(word))
}

fn topic_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_ascii_lowercase)
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(&w.as_str()) && !lexicon_word(w))
        .collect()
}

/// Returns true if the statements share at least one topic word outside the lexicon.
#[must_use]
pub fn shares_topic(a: &str, b: &str) -> bool {
    let a = topic_words(a);
    let b = topic_words(b);
    a.intersection(&b).next().is_some()
}

/// Like [`shares_topic`], but a statement with no topic words at all
/// ("dead", "is alive") is taken to be about whoever holds it.
#[must_use]
pub fn may_share_subject(a: &str, b: &str) -> bool {
    let a = topic_words(a);
    let b = topic_words(b);
    a.is_empty() || b.is_empty() || a.intersection(&b).next().is_some()
}

/// Decides whether `a` and `b` are mutually exclusive.
#[must_use]
pub fn exclusion(a: &str, b: &str) -> Option<Exclusion> {
    for p in ANTONYMS.iter() {
        if let (Some(sa), Some(sb)) = (side(a, p), side(b, p)) {
            if sa != sb {
                return Some(Exclusion::Antonym {
                    pair: p.name.to_string(),
                });
            }
        }
    }

    let a_neg = NEGATION.is_match(a);
    let b_neg = NEGATION.is_match(b);
    if a_neg != b_neg {
        let na = normalize(a);
        if !na.is_empty() && na == normalize(b) {
            return Some(Exclusion::Negation);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicon_patterns_compile() {
        assert_eq!(ANTONYMS.len(), 7);
        assert!(ANTONYMS.iter().any(|p| p.name == LIFE_STATE));
        assert!(NEGATION.is_match("Bob is no longer armed"));
    }

    #[test]
    fn antonyms_are_exclusive() {
        let ex = exclusion("Bob is Anna's enemy", "Bob is Anna's ally").unwrap();
        assert_eq!(
            ex,
            Exclusion::Antonym {
                pair: "allegiance".to_string()
            }
        );
        assert!(!ex.is_life_state());
    }

    #[test]
    fn negated_antonym_agrees() {
        // "not dead" lands on the alive side.
        assert!(exclusion("Anna is not dead", "Anna is alive").is_none());
        assert_eq!(life_state("Anna is not dead"), Some(LifeState::Alive));
        assert_eq!(life_state("Anna is no longer alive"), Some(LifeState::Dead));
    }

    #[test]
    fn life_state_detection() {
        assert_eq!(life_state("Anna was killed at dawn"), Some(LifeState::Dead));
        assert_eq!(life_state("Anna is alive and well"), Some(LifeState::Alive));
        assert_eq!(life_state("Anna is tired"), None);
        // Both sides in one statement is ambiguous.
        assert_eq!(life_state("Anna is dead but alive"), None);
        assert!(exclusion("Anna is dead", "Anna is alive")
            .unwrap()
            .is_life_state());
    }

    #[test]
    fn plain_negation_is_exclusive() {
        assert_eq!(
            exclusion("The sword is not cursed", "The sword is cursed"),
            Some(Exclusion::Negation)
        );
        assert_eq!(
            exclusion("The gate isn't locked", "the gate is locked."),
            Some(Exclusion::Negation)
        );
        assert!(exclusion("The sword is cursed", "The sword is cursed").is_none());
    }

    #[test]
    fn unrelated_statements_are_not_exclusive() {
        assert!(exclusion("Anna walks to the harbor", "Bob eats bread").is_none());
    }

    #[test]
    fn topic_overlap_ignores_lexicon_and_stopwords() {
        assert!(shares_topic("Anna is dead", "Anna is alive"));
        assert!(!shares_topic("Bob is dead", "Carl is alive"));
        assert!(!shares_topic("is dead", "is alive"));
        assert!(may_share_subject("is dead", "Anna is alive"));
        assert!(!may_share_subject("Bob is dead", "Carl is alive"));
    }
}
