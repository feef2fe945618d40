//! Statements issued against the graph adapter and the rows they return.
//!
//! Statements are typed rather than free-form query text; how an adapter
//! evaluates them (Cypher, SQL, an in-process arena) is its own business.
//! Rows come back as JSON objects and are decoded into the row structs below.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ids::{CharacterId, EventId, FactId, LocationId, SceneId, StoryId, UserId};
use crate::rules::RuleName;
use crate::severity::Severity;
use crate::time::{SceneSpan, TimeRange};

use super::model::{
    Character, ContradictionEdge, EventKind, KnowledgeFact, KnowsEdge, Location, PresenceEdge,
    RelationshipEdge, RelationshipKind, Scene, StoryEvent,
};
use super::GraphError;

/// A read statement.
///
/// `user_id`, when present, restricts fact-bearing rows to facts owned by
/// that user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "statement", rename_all = "snake_case")]
pub enum GraphQuery {
    /// `(c:Character)-[:KNOWS]->(k:Knowledge)` for every character in the story.
    CharacterKnowledge {
        story_id: StoryId,
        user_id: Option<UserId>,
    },
    /// `(c1:Character)-[r:RELATIONSHIP]->(c2:Character)` in the story.
    Relationships {
        story_id: StoryId,
        user_id: Option<UserId>,
    },
    /// `(c:Character)-[:PRESENT_IN]->(s:Scene)-[:OCCURS_IN]->(l:Location)`.
    Presences {
        story_id: StoryId,
        user_id: Option<UserId>,
    },
    /// Death/resurrection/other events in the story.
    Events {
        story_id: StoryId,
    },
    /// Every Knowledge Fact in the story.
    StoryFacts {
        story_id: StoryId,
        user_id: Option<UserId>,
    },
    /// `(k1)-[c:CONTRADICTS]->(k2)`, optionally narrowed by story and rule.
    Contradictions {
        story_id: Option<StoryId>,
        rule: Option<RuleName>,
    },
}

impl GraphQuery {
    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CharacterKnowledge { .. } => "character_knowledge",
            Self::Relationships { .. } => "relationships",
            Self::Presences { .. } => "presences",
            Self::Events { .. } => "events",
            Self::StoryFacts { .. } => "story_facts",
            Self::Contradictions { .. } => "contradictions",
        }
    }
}

/// One result row: a JSON object keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(serde_json::Map<String, serde_json::Value>);

impl Row {
    /// Builds a row from any serializable record whose JSON form is an object.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Decode` if the record does not serialize to an object.
    pub fn from_record<T: Serialize>(record: &T) -> Result<Self, GraphError> {
        match serde_json::to_value(record) {
            Ok(serde_json::Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(GraphError::Decode(format!(
                "row must be an object, got {other}"
            ))),
            Err(e) => Err(GraphError::Decode(e.to_string())),
        }
    }

    /// Decodes the row into a typed record.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Decode` if a column is missing or has the wrong type.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, GraphError> {
        serde_json::from_value(serde_json::Value::Object(self.0))
            .map_err(|e| GraphError::Decode(e.to_string()))
    }

    /// Raw column access.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.0.get(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: serde_json::Value) {
        self.0.insert(column.into(), value);
    }
}

/// Decodes every row, failing on the first malformed one.
///
/// # Errors
///
/// Returns `GraphError::Decode` for the first row that does not decode.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, GraphError> {
    rows.into_iter().map(Row::decode).collect()
}

/// Row of [`GraphQuery::CharacterKnowledge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRow {
    pub character_id: CharacterId,
    pub fact_id: FactId,
    pub content: String,
    pub asserted_at: DateTime<Utc>,
    pub valid: TimeRange,
}

/// Row of [`GraphQuery::Relationships`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRow {
    pub from_character: CharacterId,
    pub to_character: CharacterId,
    pub kind: RelationshipKind,
    pub valid: TimeRange,
    pub fact_id: FactId,
}

/// Row of [`GraphQuery::Presences`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRow {
    pub character_id: CharacterId,
    pub fact_id: FactId,
    pub scene_id: SceneId,
    pub location_id: LocationId,
    pub order: SceneSpan,
    #[serde(default)]
    pub time: Option<TimeRange>,
}

/// Row of [`GraphQuery::Events`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub event_id: EventId,
    pub character_id: CharacterId,
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
}

/// Row of [`GraphQuery::StoryFacts`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub fact_id: FactId,
    pub content: String,
    pub asserted_at: DateTime<Utc>,
    pub valid: TimeRange,
}

/// Row of [`GraphQuery::Contradictions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionRow {
    pub from_fact: FactId,
    pub to_fact: FactId,
    pub story_id: StoryId,
    pub rule: RuleName,
    pub severity: Severity,
    pub reason: String,
    pub confidence: f32,
    pub detected_at: DateTime<Utc>,
}

impl From<&ContradictionEdge> for ContradictionRow {
    fn from(edge: &ContradictionEdge) -> Self {
        Self {
            from_fact: edge.from_fact,
            to_fact: edge.to_fact,
            story_id: edge.story_id.clone(),
            rule: edge.rule,
            severity: edge.severity,
            reason: edge.reason.clone(),
            confidence: edge.confidence,
            detected_at: edge.detected_at,
        }
    }
}

/// A write statement: create a node or edge, or upsert a contradiction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "statement", rename_all = "snake_case")]
pub enum GraphWrite {
    Fact(KnowledgeFact),
    Character(Character),
    Location(Location),
    Scene(Scene),
    Event(StoryEvent),
    Knows(KnowsEdge),
    Relationship(RelationshipEdge),
    Presence(PresenceEdge),
    /// Upsert keyed by `(unordered fact pair, rule)`.
    Contradiction(ContradictionEdge),
}

impl GraphWrite {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Fact(_) => "fact",
            Self::Character(_) => "character",
            Self::Location(_) => "location",
            Self::Scene(_) => "scene",
            Self::Event(_) => "event",
            Self::Knows(_) => "knows",
            Self::Relationship(_) => "relationship",
            Self::Presence(_) => "present_in",
            Self::Contradiction(_) => "contradicts",
        }
    }
}

macro_rules! impl_into_write {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for GraphWrite {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_into_write!(
    KnowledgeFact => Fact,
    Character => Character,
    Location => Location,
    Scene => Scene,
    StoryEvent => Event,
    KnowsEdge => Knows,
    RelationshipEdge => Relationship,
    PresenceEdge => Presence,
    ContradictionEdge => Contradiction,
);

/// Acknowledgement of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteAck {
    /// A new node or edge was created.
    Created,
    /// An equivalent record already existed; nothing changed.
    Unchanged,
}

impl WriteAck {
    #[must_use]
    pub const fn created(self) -> bool {
        matches!(self, Self::Created)
    }
}
