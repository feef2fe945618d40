//! Pre-write validation of ingested nodes and edges.
//!
//! Ingestion writes through the same adapter the engine uses. Before a node
//! or edge is committed, every rule in [`WriteValidator`] gets to veto it; the
//! first rejection wins and names the rule that fired.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::graph::model::{Character, KnowledgeFact, Location, Scene};
use crate::graph::{GraphError, GraphWrite};
use crate::ids::{CharacterId, FactId, LocationId, SceneId, StoryId};

/// Read access to already-committed nodes, used to validate references.
pub trait GraphView {
    fn fact(&self, id: FactId) -> Option<&KnowledgeFact>;
    fn character(&self, id: CharacterId) -> Option<&Character>;
    fn scene(&self, id: SceneId) -> Option<&Scene>;
    fn location(&self, id: LocationId) -> Option<&Location>;
}

type RuleFn = fn(&GraphWrite, &dyn GraphView) -> Result<(), Rejection>;

enum Rejection {
    Missing(String),
    Invalid(String),
}

/// Counters exposed for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total_validations: u64,
    pub failed_validations: u64,
    pub rules_enabled: usize,
    pub rule_names: Vec<String>,
}

/// Ordered table of named write-validation rules.
pub struct WriteValidator {
    rules: Vec<(&'static str, RuleFn)>,
    total: AtomicU64,
    failed: AtomicU64,
}

impl std::fmt::Debug for WriteValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteValidator")
            .field("rules", &self.rules.iter().map(|(n, _)| *n).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Default for WriteValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteValidator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: vec![
                ("validate_references", validate_references as RuleFn),
                ("prevent_invalid_knows_edges", prevent_invalid_knows_edges as RuleFn),
                ("prevent_relationship_self_loops", prevent_relationship_self_loops as RuleFn),
                ("validate_temporal_consistency", validate_temporal_consistency as RuleFn),
                ("validate_scene_order", validate_scene_order as RuleFn),
            ],
            total: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Runs every rule against `write`.
    ///
    /// # Errors
    ///
    /// `GraphError::NotFound` for dangling references, `GraphError::Rejected`
    /// for any other rule violation.
    pub fn validate(&self, write: &GraphWrite, view: &dyn GraphView) -> Result<(), GraphError> {
        self.total.fetch_add(1, Ordering::Relaxed);
        for (name, rule) in &self.rules {
            if let Err(rejection) = rule(write, view) {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(rule = name, write = write.name(), "write rejected");
                return Err(match rejection {
                    Rejection::Missing(what) => GraphError::NotFound(what),
                    Rejection::Invalid(reason) => GraphError::Rejected {
                        rule: (*name).to_string(),
                        reason,
                    },
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> ValidationStats {
        ValidationStats {
            total_validations: self.total.load(Ordering::Relaxed),
            failed_validations: self.failed.load(Ordering::Relaxed),
            rules_enabled: self.rules.len(),
            rule_names: self.rules.iter().map(|(n, _)| (*n).to_string()).collect(),
        }
    }
}

fn same_story(expected: &StoryId, actual: &StoryId, what: &str) -> Result<(), Rejection> {
    if expected == actual {
        Ok(())
    } else {
        Err(Rejection::Invalid(format!(
            "{what} belongs to story {actual}, expected {expected}"
        )))
    }
}

fn need_fact(view: &dyn GraphView, id: FactId) -> Result<&KnowledgeFact, Rejection> {
    view.fact(id)
        .ok_or_else(|| Rejection::Missing(format!("fact {id}")))
}

fn need_character(view: &dyn GraphView, id: CharacterId) -> Result<&Character, Rejection> {
    view.character(id)
        .ok_or_else(|| Rejection::Missing(format!("character {id}")))
}

fn validate_references(write: &GraphWrite, view: &dyn GraphView) -> Result<(), Rejection> {
    match write {
        GraphWrite::Scene(scene) => {
            let location = view
                .location(scene.location_id)
                .ok_or_else(|| Rejection::Missing(format!("location {}", scene.location_id)))?;
            same_story(&scene.story_id, &location.story_id, "location")
        }
        GraphWrite::Event(event) => {
            let character = need_character(view, event.character_id)?;
            same_story(&event.story_id, &character.story_id, "character")
        }
        GraphWrite::Knows(edge) => {
            let character = need_character(view, edge.character_id)?;
            let fact = need_fact(view, edge.fact_id)?;
            same_story(&character.story_id, &fact.story_id, "fact")
        }
        GraphWrite::Relationship(edge) => {
            let from = need_character(view, edge.from)?;
            let to = need_character(view, edge.to)?;
            let fact = need_fact(view, edge.fact_id)?;
            same_story(&from.story_id, &to.story_id, "character")?;
            same_story(&from.story_id, &fact.story_id, "fact")
        }
        GraphWrite::Presence(edge) => {
            let character = need_character(view, edge.character_id)?;
            let scene = view
                .scene(edge.scene_id)
                .ok_or_else(|| Rejection::Missing(format!("scene {}", edge.scene_id)))?;
            let fact = need_fact(view, edge.fact_id)?;
            same_story(&character.story_id, &scene.story_id, "scene")?;
            same_story(&character.story_id, &fact.story_id, "fact")
        }
        GraphWrite::Contradiction(edge) => {
            let from = need_fact(view, edge.from_fact)?;
            let to = need_fact(view, edge.to_fact)?;
            same_story(&edge.story_id, &from.story_id, "fact")?;
            same_story(&edge.story_id, &to.story_id, "fact")
        }
        GraphWrite::Fact(_) | GraphWrite::Character(_) | GraphWrite::Location(_) => Ok(()),
    }
}

/// A character cannot learn something that stopped being valid before they existed,
/// nor learn anything before their own creation.
fn prevent_invalid_knows_edges(write: &GraphWrite, view: &dyn GraphView) -> Result<(), Rejection> {
    let GraphWrite::Knows(edge) = write else {
        return Ok(());
    };
    let character = need_character(view, edge.character_id)?;
    let fact = need_fact(view, edge.fact_id)?;

    if edge.learned_at < character.created_at {
        return Err(Rejection::Invalid(format!(
            "knowledge learned at {} but character created at {}",
            edge.learned_at, character.created_at
        )));
    }
    if let Some(to) = fact.valid_time().to {
        if to <= character.created_at {
            return Err(Rejection::Invalid(format!(
                "knowledge valid until {to} but character created at {}",
                character.created_at
            )));
        }
    }
    Ok(())
}

fn prevent_relationship_self_loops(write: &GraphWrite, _: &dyn GraphView) -> Result<(), Rejection> {
    match write {
        GraphWrite::Relationship(edge) if edge.from == edge.to => Err(Rejection::Invalid(format!(
            "character {} cannot have a relationship with itself",
            edge.from
        ))),
        _ => Ok(()),
    }
}

fn validate_temporal_consistency(write: &GraphWrite, _: &dyn GraphView) -> Result<(), Rejection> {
    let range = match write {
        GraphWrite::Fact(fact) => fact.validity,
        GraphWrite::Relationship(edge) => Some(edge.valid),
        GraphWrite::Scene(scene) => scene.time,
        _ => None,
    };
    match range {
        Some(r) if r.to.is_some_and(|to| to <= r.from) => Err(Rejection::Invalid(format!(
            "valid_from {} must be before valid_to",
            r.from
        ))),
        _ => Ok(()),
    }
}

fn validate_scene_order(write: &GraphWrite, _: &dyn GraphView) -> Result<(), Rejection> {
    let GraphWrite::Scene(scene) = write else {
        return Ok(());
    };
    if scene.order.start < 0 {
        return Err(Rejection::Invalid("scene order must be non-negative".to_string()));
    }
    if scene.order.start > scene.order.end {
        return Err(Rejection::Invalid(format!(
            "scene order start {} exceeds end {}",
            scene.order.start, scene.order.end
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::graph::model::{KnowsEdge, RelationshipEdge, RelationshipKind};
    use crate::time::{SceneSpan, TimeRange};

    #[derive(Default)]
    struct View {
        facts: HashMap<FactId, KnowledgeFact>,
        characters: HashMap<CharacterId, Character>,
        scenes: HashMap<SceneId, Scene>,
        locations: HashMap<LocationId, Location>,
    }

    impl GraphView for View {
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

    fn story() -> StoryId {
        StoryId::new("story").unwrap()
    }

    #[test]
    fn knows_before_creation_is_rejected() {
        let t = Utc::now();
        let mut view = View::default();
        let character = Character::new(story(), "Anna", t);
        let fact = KnowledgeFact::new(story(), "the key is hidden", t);
        let edge = KnowsEdge {
            character_id: character.id,
            fact_id: fact.id,
            learned_at: t - Duration::hours(1),
        };
        view.characters.insert(character.id, character);
        view.facts.insert(fact.id, fact);

        let validator = WriteValidator::new();
        let err = validator.validate(&GraphWrite::Knows(edge), &view).unwrap_err();
        match err {
            GraphError::Rejected { rule, .. } => assert_eq!(rule, "prevent_invalid_knows_edges"),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(validator.stats().failed_validations, 1);
    }

    #[test]
    fn self_loop_relationship_is_rejected() {
        let t = Utc::now();
        let mut view = View::default();
        let character = Character::new(story(), "Anna", t);
        let fact = KnowledgeFact::new(story(), "Anna hates herself", t);
        let edge = RelationshipEdge {
            from: character.id,
            to: character.id,
            kind: RelationshipKind::Enemy,
            valid: TimeRange::starting_at(t),
            fact_id: fact.id,
        };
        view.characters.insert(character.id, character);
        view.facts.insert(fact.id, fact);

        let err = WriteValidator::new()
            .validate(&GraphWrite::Relationship(edge), &view)
            .unwrap_err();
        assert!(err.to_string().contains("prevent_relationship_self_loops"));
    }

    #[test]
    fn dangling_reference_is_not_found() {
        let edge = KnowsEdge {
            character_id: CharacterId::new(),
            fact_id: FactId::new(),
            learned_at: Utc::now(),
        };
        let err = WriteValidator::new()
            .validate(&GraphWrite::Knows(edge), &View::default())
            .unwrap_err();
        assert!(matches!(err, GraphError::NotFound(_)));
    }

    #[test]
    fn negative_scene_order_is_rejected() {
        let mut view = View::default();
        let location = Location::new(story(), "Harbor");
        let scene = Scene::new(
            story(),
            location.id,
            SceneSpan { start: -1, end: 2 },
        );
        view.locations.insert(location.id, location);

        let err = WriteValidator::new()
            .validate(&GraphWrite::Scene(scene), &view)
            .unwrap_err();
        assert!(err.to_string().contains("validate_scene_order"));
    }

    #[test]
    fn inverted_fact_validity_is_rejected() {
        let t = Utc::now();
        let mut fact = KnowledgeFact::new(story(), "x", t);
        fact.validity = Some(TimeRange {
            from: t,
            to: Some(t - Duration::seconds(5)),
        });
        let err = WriteValidator::new()
            .validate(&GraphWrite::Fact(fact), &View::default())
            .unwrap_err();
        assert!(err.to_string().contains("validate_temporal_consistency"));
    }

    #[test]
    fn stats_list_rules() {
        let stats = WriteValidator::new().stats();
        assert_eq!(stats.rules_enabled, 5);
        assert!(stats.rule_names.contains(&"validate_scene_order".to_string()));
    }
}
