//! Nodes and edges of the story graph.
//!
//! Facts and their subjects are produced by ingestion and are read-only to
//! the engine; the only thing the engine ever writes is [`ContradictionEdge`].
//! Subject edges carry the id of the fact that asserted them so every finding
//! links two Knowledge Facts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ids::{
    CharacterId, ContradictionEdgeId, EventId, FactId, LocationId, SceneId, StoryId, UserId,
};
use crate::rules::RuleName;
use crate::severity::Severity;
use crate::time::{SceneSpan, TimeRange};

/// An immutable asserted statement about a story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeFact {
    pub id: FactId,
    pub story_id: StoryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub content: String,
    /// When the fact was asserted (story time).
    pub asserted_at: DateTime<Utc>,
    /// Interval in which the fact holds; defaults to `[asserted_at, ∞)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<TimeRange>,
}

impl KnowledgeFact {
    #[must_use]
    pub fn new(story_id: StoryId, content: impl Into<String>, asserted_at: DateTime<Utc>) -> Self {
        Self {
            id: FactId::new(),
            story_id,
            user_id: None,
            content: content.into(),
            asserted_at,
            validity: None,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn with_validity(mut self, validity: TimeRange) -> Self {
        self.validity = Some(validity);
        self
    }

    /// Effective validity interval.
    #[must_use]
    pub fn valid_time(&self) -> TimeRange {
        self.validity
            .unwrap_or_else(|| TimeRange::starting_at(self.asserted_at))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub story_id: StoryId,
    pub name: String,
    /// Story time at which the character comes into existence.
    pub created_at: DateTime<Utc>,
}

impl Character {
    #[must_use]
    pub fn new(story_id: StoryId, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: CharacterId::new(),
            story_id,
            name: name.into(),
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub story_id: StoryId,
    pub name: String,
}

impl Location {
    #[must_use]
    pub fn new(story_id: StoryId, name: impl Into<String>) -> Self {
        Self {
            id: LocationId::new(),
            story_id,
            name: name.into(),
        }
    }
}

/// A scene occurring in one location over a range of scene-order positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub id: SceneId,
    pub story_id: StoryId,
    pub location_id: LocationId,
    pub order: SceneSpan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeRange>,
}

impl Scene {
    #[must_use]
    pub fn new(story_id: StoryId, location_id: LocationId, order: SceneSpan) -> Self {
        Self {
            id: SceneId::new(),
            story_id,
            location_id,
            order,
            time: None,
        }
    }

    #[must_use]
    pub fn with_time(mut self, time: TimeRange) -> Self {
        self.time = Some(time);
        self
    }
}

/// Kinds of story events the state rule cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Death,
    Resurrection,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryEvent {
    pub id: EventId,
    pub story_id: StoryId,
    pub character_id: CharacterId,
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
}

impl StoryEvent {
    #[must_use]
    pub fn new(
        story_id: StoryId,
        character_id: CharacterId,
        kind: EventKind,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            story_id,
            character_id,
            kind,
            occurred_at,
        }
    }
}

/// `(Character)-[:KNOWS]->(Knowledge)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowsEdge {
    pub character_id: CharacterId,
    pub fact_id: FactId,
    pub learned_at: DateTime<Utc>,
}

/// Relationship types between two characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipKind {
    Ally,
    Friend,
    Enemy,
    Rival,
    Lover,
    Spouse,
    Sibling,
    Stranger,
}

impl RelationshipKind {
    /// Returns true if the two kinds cannot hold between the same pair at once.
    #[must_use]
    pub fn incompatible_with(self, other: Self) -> bool {
        use RelationshipKind::{Ally, Enemy, Friend, Lover, Rival, Sibling, Spouse, Stranger};

        let bond = |k: Self| matches!(k, Ally | Friend | Lover | Spouse);
        match (self, other) {
            (a, b) if a == b => false,
            (Enemy, b) | (b, Enemy) => bond(b),
            (Stranger, b) | (b, Stranger) => bond(b) || matches!(b, Sibling | Rival),
            _ => false,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ally => "ALLY",
            Self::Friend => "FRIEND",
            Self::Enemy => "ENEMY",
            Self::Rival => "RIVAL",
            Self::Lover => "LOVER",
            Self::Spouse => "SPOUSE",
            Self::Sibling => "SIBLING",
            Self::Stranger => "STRANGER",
        }
    }
}

/// `(Character)-[:RELATIONSHIP {kind}]->(Character)` active over `valid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub from: CharacterId,
    pub to: CharacterId,
    pub kind: RelationshipKind,
    pub valid: TimeRange,
    pub fact_id: FactId,
}

/// `(Character)-[:PRESENT_IN]->(Scene)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEdge {
    pub character_id: CharacterId,
    pub scene_id: SceneId,
    pub fact_id: FactId,
}

/// Engine-created link between two facts flagged as mutually inconsistent.
///
/// Never mutated after creation. At most one exists per unordered fact pair
/// per rule; the id is derived from that key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionEdge {
    pub id: ContradictionEdgeId,
    pub from_fact: FactId,
    pub to_fact: FactId,
    pub story_id: StoryId,
    pub rule: RuleName,
    pub severity: Severity,
    pub reason: String,
    pub confidence: f32,
    pub detected_at: DateTime<Utc>,
}

impl ContradictionEdge {
    /// Builds an edge, validating the confidence range.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ConfidenceOutOfRange` if confidence is outside [0, 1].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        from_fact: FactId,
        to_fact: FactId,
        story_id: StoryId,
        rule: RuleName,
        severity: Severity,
        reason: impl Into<String>,
        confidence: f32,
        detected_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        if !(0.0..=1.0).contains(&confidence) || confidence.is_nan() {
            return Err(ValidationError::ConfidenceOutOfRange { value: confidence });
        }
        Ok(Self {
            id: ContradictionEdgeId::derive(from_fact, to_fact, rule),
            from_fact,
            to_fact,
            story_id,
            rule,
            severity,
            reason: reason.into(),
            confidence,
            detected_at,
        })
    }

    /// Returns true if this edge links `a` and `b` in either direction.
    #[must_use]
    pub fn links(&self, a: FactId, b: FactId) -> bool {
        (self.from_fact == a && self.to_fact == b) || (self.from_fact == b && self.to_fact == a)
    }
}
