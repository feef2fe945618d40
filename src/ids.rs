//! Strongly-typed identifiers.
//!
//! Graph nodes are keyed by UUID newtypes so a fact id can never be passed
//! where a character id is expected. Stories and users are identified by the
//! opaque strings the ingestion layer hands us.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::rules::RuleName;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a Knowledge Fact node.
    FactId
);
uuid_id!(
    /// Identifier of a Character node.
    CharacterId
);
uuid_id!(
    /// Identifier of a Location node.
    LocationId
);
uuid_id!(
    /// Identifier of a Scene node.
    SceneId
);
uuid_id!(
    /// Identifier of a story event (death, resurrection, ...).
    EventId
);

/// Identifier of a contradiction edge.
///
/// Derived deterministically from the unordered fact pair and the rule that
/// flagged it, so re-materializing the same finding lands on the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContradictionEdgeId(Uuid);

impl ContradictionEdgeId {
    /// Derives the edge id for `(a, b, rule)`; argument order of `a`/`b` does not matter.
    #[must_use]
    pub fn derive(a: FactId, b: FactId, rule: RuleName) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let mut hasher = blake3::Hasher::new();
        hasher.update(lo.as_uuid().as_bytes());
        hasher.update(hi.as_uuid().as_bytes());
        hasher.update(rule.as_str().as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ContradictionEdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an id, rejecting empty or whitespace-only input.
            ///
            /// # Errors
            ///
            /// Returns `ValidationError::EmptyIdentifier` for blank input.
            pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
                let value = value.into();
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(ValidationError::EmptyIdentifier { kind: $kind });
                }
                Ok(Self(trimmed.to_string()))
            }

            /// Borrow the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a story; every scan is scoped to one.
    StoryId,
    "story"
);
string_id!(
    /// Identifier of the user owning a story's facts.
    UserId,
    "user"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_id_is_order_independent() {
        let a = FactId::new();
        let b = FactId::new();
        assert_eq!(
            ContradictionEdgeId::derive(a, b, RuleName::TemporalContradiction),
            ContradictionEdgeId::derive(b, a, RuleName::TemporalContradiction)
        );
    }

    #[test]
    fn edge_id_depends_on_rule() {
        let a = FactId::new();
        let b = FactId::new();
        assert_ne!(
            ContradictionEdgeId::derive(a, b, RuleName::TemporalContradiction),
            ContradictionEdgeId::derive(a, b, RuleName::CharacterStateContradiction)
        );
    }

    #[test]
    fn story_id_rejects_blank() {
        assert!(StoryId::new("   ").is_err());
        let id = StoryId::new(" story-1 ").unwrap();
        assert_eq!(id.as_str(), "story-1");
    }

    #[test]
    fn story_id_serializes_transparently() {
        let id = StoryId::new("s1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"s1\"");
    }
}
