//! In-memory graph backend.
//!
//! An arena of nodes keyed by id with edges stored as id pairs, guarded by a
//! single `RwLock`. It is the reference adapter for embedded use and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::ids::{CharacterId, ContradictionEdgeId, FactId, LocationId, SceneId, StoryId, UserId};
use crate::validation::{GraphView, ValidationStats, WriteValidator};

use super::model::{
    Character, ContradictionEdge, KnowledgeFact, KnowsEdge, Location, PresenceEdge,
    RelationshipEdge, Scene, StoryEvent,
};
use super::query::{
    ContradictionRow, EventRow, FactRow, GraphQuery, GraphWrite, KnowledgeRow, PresenceRow,
    RelationshipRow, Row, WriteAck,
};
use super::{GraphError, GraphStore};

fn lock_err(context: &'static str) -> GraphError {
    GraphError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct GraphState {
    facts: HashMap<FactId, KnowledgeFact>,
    characters: HashMap<CharacterId, Character>,
    locations: HashMap<LocationId, Location>,
    scenes: HashMap<SceneId, Scene>,
    events: Vec<StoryEvent>,
    knows: Vec<KnowsEdge>,
    relationships: Vec<RelationshipEdge>,
    presences: Vec<PresenceEdge>,
    // Ordered so reports are stable across calls.
    contradictions: BTreeMap<ContradictionEdgeId, ContradictionEdge>,
}

impl GraphView for GraphState {
    fn fact(&self, id: FactId) -> Option<&KnowledgeFact> {
        self.facts.get(&id)
    }

    fn character(&self, id: CharacterId) -> Option<&Character> {
        self.characters.get(&id)
    }

    fn scene(&self, id: SceneId) -> Option<&Scene> {
        self.scenes.get(&id)
    }

    fn location(&self, id: LocationId) -> Option<&Location> {
        self.locations.get(&id)
    }
}

impl GraphState {
    /// Fact visible to a query scoped to `story_id` and optionally `user_id`.
    fn visible_fact(
        &self,
        id: FactId,
        story_id: &StoryId,
        user_id: Option<&UserId>,
    ) -> Option<&KnowledgeFact> {
        self.facts.get(&id).filter(|f| {
            &f.story_id == story_id && user_id.map_or(true, |u| f.user_id.as_ref() == Some(u))
        })
    }

    fn run(&self, query: &GraphQuery) -> Result<Vec<Row>, GraphError> {
        match query {
            GraphQuery::CharacterKnowledge { story_id, user_id } => self
                .knows
                .iter()
                .filter_map(|edge| {
                    let fact = self.visible_fact(edge.fact_id, story_id, user_id.as_ref())?;
                    Some(KnowledgeRow {
                        character_id: edge.character_id,
                        fact_id: fact.id,
                        content: fact.content.clone(),
                        asserted_at: fact.asserted_at,
                        valid: fact.valid_time(),
                    })
                })
                .map(|row| Row::from_record(&row))
                .collect(),
            GraphQuery::Relationships { story_id, user_id } => self
                .relationships
                .iter()
                .filter(|edge| {
                    self.visible_fact(edge.fact_id, story_id, user_id.as_ref())
                        .is_some()
                })
                .map(|edge| {
                    Row::from_record(&RelationshipRow {
                        from_character: edge.from,
                        to_character: edge.to,
                        kind: edge.kind,
                        valid: edge.valid,
                        fact_id: edge.fact_id,
                    })
                })
                .collect(),
            GraphQuery::Presences { story_id, user_id } => self
                .presences
                .iter()
                .filter_map(|edge| {
                    self.visible_fact(edge.fact_id, story_id, user_id.as_ref())?;
                    let scene = self.scenes.get(&edge.scene_id)?;
                    Some(PresenceRow {
                        character_id: edge.character_id,
                        fact_id: edge.fact_id,
                        scene_id: scene.id,
                        location_id: scene.location_id,
                        order: scene.order,
                        time: scene.time,
                    })
                })
                .map(|row| Row::from_record(&row))
                .collect(),
            GraphQuery::Events { story_id } => self
                .events
                .iter()
                .filter(|e| &e.story_id == story_id)
                .map(|e| {
                    Row::from_record(&EventRow {
                        event_id: e.id,
                        character_id: e.character_id,
                        kind: e.kind,
                        occurred_at: e.occurred_at,
                    })
                })
                .collect(),
            GraphQuery::StoryFacts { story_id, user_id } => {
                let mut facts: Vec<&KnowledgeFact> = self
                    .facts
                    .values()
                    .filter(|f| {
                        &f.story_id == story_id
                            && user_id
                                .as_ref()
                                .map_or(true, |u| f.user_id.as_ref() == Some(u))
                    })
                    .collect();
                facts.sort_by_key(|f| (f.asserted_at, f.id));
                facts
                    .into_iter()
                    .map(|f| {
                        Row::from_record(&FactRow {
                            fact_id: f.id,
                            content: f.content.clone(),
                            asserted_at: f.asserted_at,
                            valid: f.valid_time(),
                        })
                    })
                    .collect()
            }
            GraphQuery::Contradictions { story_id, rule } => self
                .contradictions
                .values()
                .filter(|edge| story_id.as_ref().map_or(true, |s| &edge.story_id == s))
                .filter(|edge| rule.map_or(true, |r| edge.rule == r))
                .map(|edge| Row::from_record(&ContradictionRow::from(edge)))
                .collect(),
        }
    }

    fn apply(&mut self, write: GraphWrite) -> WriteAck {
        match write {
            GraphWrite::Fact(fact) => insert_node(&mut self.facts, fact.id, fact),
            GraphWrite::Character(c) => insert_node(&mut self.characters, c.id, c),
            GraphWrite::Location(l) => insert_node(&mut self.locations, l.id, l),
            GraphWrite::Scene(s) => insert_node(&mut self.scenes, s.id, s),
            GraphWrite::Event(event) => {
                if self.events.iter().any(|e| e.id == event.id) {
                    return WriteAck::Unchanged;
                }
                self.events.push(event);
                WriteAck::Created
            }
            GraphWrite::Knows(edge) => push_edge(&mut self.knows, edge),
            GraphWrite::Relationship(edge) => push_edge(&mut self.relationships, edge),
            GraphWrite::Presence(edge) => push_edge(&mut self.presences, edge),
            GraphWrite::Contradiction(edge) => {
                // Key is (unordered pair, rule); the derived id encodes exactly that.
                let id = ContradictionEdgeId::derive(edge.from_fact, edge.to_fact, edge.rule);
                if self.contradictions.contains_key(&id) {
                    return WriteAck::Unchanged;
                }
                self.contradictions.insert(id, ContradictionEdge { id, ..edge });
                WriteAck::Created
            }
        }
    }
}

fn insert_node<K: std::hash::Hash + Eq, V>(map: &mut HashMap<K, V>, key: K, value: V) -> WriteAck {
    if map.contains_key(&key) {
        return WriteAck::Unchanged;
    }
    map.insert(key, value);
    WriteAck::Created
}

fn push_edge<E: PartialEq>(edges: &mut Vec<E>, edge: E) -> WriteAck {
    if edges.contains(&edge) {
        return WriteAck::Unchanged;
    }
    edges.push(edge);
    WriteAck::Created
}

/// Thread-safe in-memory [`GraphStore`].
///
/// Writes are validated by a [`WriteValidator`] before being committed and
/// are atomic with respect to each other.
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    state: RwLock<GraphState>,
    validator: WriteValidator,
}

impl InMemoryGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience wrapper over [`GraphStore::write`] for anything convertible to a write.
    ///
    /// # Errors
    ///
    /// Propagates validation and backend errors.
    pub fn insert(&self, item: impl Into<GraphWrite>) -> Result<WriteAck, GraphError> {
        self.write(item.into())
    }

    /// Number of contradiction edges across all stories.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Backend` if the lock is poisoned.
    pub fn contradiction_count(&self) -> Result<usize, GraphError> {
        let state = self.state.read().map_err(|_| lock_err("graph"))?;
        Ok(state.contradictions.len())
    }

    /// Snapshot of every contradiction edge, ordered by edge id.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Backend` if the lock is poisoned.
    pub fn contradictions(&self) -> Result<Vec<ContradictionEdge>, GraphError> {
        let state = self.state.read().map_err(|_| lock_err("graph"))?;
        Ok(state.contradictions.values().cloned().collect())
    }

    #[must_use]
    pub fn validation_stats(&self) -> ValidationStats {
        self.validator.stats()
    }
}

impl GraphStore for InMemoryGraph {
    fn query(&self, query: &GraphQuery) -> Result<Vec<Row>, GraphError> {
        let state = self.state.read().map_err(|_| lock_err("graph"))?;
        state.run(query)
    }

    fn write(&self, write: GraphWrite) -> Result<WriteAck, GraphError> {
        let mut state = self.state.write().map_err(|_| lock_err("graph"))?;
        self.validator.validate(&write, &*state)?;
        Ok(state.apply(write))
    }
}
