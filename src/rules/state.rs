//! Character-state contradiction: a character holds both a "dead" and an
//! "alive" fact and no death or resurrection event explains the change.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::graph::query::{decode_rows, EventRow, KnowledgeRow};
use crate::graph::{EventKind, GraphError, GraphQuery, GraphStore};
use crate::ids::{CharacterId, FactId};
use crate::severity::Severity;

use super::content::{life_state, may_share_subject, LifeState};
use super::{unordered, Evidence, Finding, RuleDescriptor, RuleKind, RuleName, RuleScope};

pub(super) const DESCRIPTOR: RuleDescriptor = RuleDescriptor {
    name: RuleName::CharacterStateContradiction,
    kind: RuleKind::Detection,
    description: "dead and alive facts with no death or resurrection event in between",
    confidence: 0.99,
    execute,
    classify,
};

struct StateFact {
    fact_id: FactId,
    content: String,
    asserted_at: DateTime<Utc>,
    state: LifeState,
}

/// Event kind that legitimizes leaving the `earlier` state.
const fn bridging_event(earlier: LifeState) -> EventKind {
    match earlier {
        LifeState::Dead => EventKind::Resurrection,
        LifeState::Alive => EventKind::Death,
    }
}

fn explained(events: &[EventRow], earlier: &StateFact, later: &StateFact) -> bool {
    let needed = bridging_event(earlier.state);
    events.iter().any(|e| {
        e.kind == needed && e.occurred_at >= earlier.asserted_at && e.occurred_at <= later.asserted_at
    })
}

fn execute(graph: &dyn GraphStore, scope: &RuleScope) -> Result<Vec<Finding>, GraphError> {
    let rows: Vec<KnowledgeRow> = decode_rows(graph.query(&GraphQuery::CharacterKnowledge {
        story_id: scope.story_id.clone(),
        user_id: scope.user_id.clone(),
    })?)?;
    let events: Vec<EventRow> = decode_rows(graph.query(&GraphQuery::Events {
        story_id: scope.story_id.clone(),
    })?)?;

    let mut states: BTreeMap<CharacterId, Vec<StateFact>> = BTreeMap::new();
    for row in rows {
        let Some(state) = life_state(&row.content) else {
            continue;
        };
        let facts = states.entry(row.character_id).or_default();
        if facts.iter().all(|f| f.fact_id != row.fact_id) {
            facts.push(StateFact {
                fact_id: row.fact_id,
                content: row.content,
                asserted_at: row.asserted_at,
                state,
            });
        }
    }

    let mut seen: HashSet<(FactId, FactId)> = HashSet::new();
    let mut findings = Vec::new();
    for (character, mut facts) in states {
        let own_events: Vec<EventRow> = events
            .iter()
            .filter(|e| e.character_id == character)
            .cloned()
            .collect();
        facts.sort_by_key(|f| (f.asserted_at, f.fact_id));

        for (i, earlier) in facts.iter().enumerate() {
            for later in &facts[i + 1..] {
                if earlier.state == later.state
                    || !may_share_subject(&earlier.content, &later.content)
                    || explained(&own_events, earlier, later)
                {
                    continue;
                }
                if !seen.insert(unordered(earlier.fact_id, later.fact_id)) {
                    continue;
                }
                findings.push(Finding {
                    from_fact: earlier.fact_id,
                    to_fact: later.fact_id,
                    reason: format!(
                        "Character state contradiction ({}/{}): no {} event between assertions",
                        earlier.state.as_str(),
                        later.state.as_str(),
                        match bridging_event(earlier.state) {
                            EventKind::Resurrection => "resurrection",
                            _ => "death",
                        }
                    ),
                    evidence: Evidence::CharacterState {
                        character,
                        earlier: earlier.state,
                        later: later.state,
                        gap_secs: (later.asserted_at - earlier.asserted_at).num_seconds(),
                    },
                });
            }
        }
    }
    Ok(findings)
}

/// Always critical.
fn classify(_: &Finding) -> Severity {
    Severity::Critical
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{InMemoryGraph, StoryEvent};
    use crate::rules::test_support::{character, known_fact, story, t};

    fn scope() -> RuleScope {
        RuleScope::new(story(), None)
    }

    fn event(graph: &InMemoryGraph, who: CharacterId, kind: EventKind, at: i64) {
        graph.insert(StoryEvent::new(story(), who, kind, t(at))).unwrap();
    }

    #[test]
    fn alive_then_dead_without_death_event_is_critical() {
        let graph = InMemoryGraph::new();
        let anna = character(&graph, "Anna");
        let alive = known_fact(&graph, anna, "Anna is alive", 0);
        let dead = known_fact(&graph, anna, "Anna is dead", 10);

        let candidates = DESCRIPTOR.evaluate(&graph, &scope()).unwrap();
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!((c.from_fact, c.to_fact), (alive, dead));
        assert_eq!(c.severity, Severity::Critical);
        assert!((c.confidence - 0.99).abs() < f32::EPSILON);
    }

    #[test]
    fn death_event_explains_alive_then_dead() {
        let graph = InMemoryGraph::new();
        let anna = character(&graph, "Anna");
        known_fact(&graph, anna, "Anna is alive", 0);
        event(&graph, anna, EventKind::Death, 5);
        known_fact(&graph, anna, "Anna was slain", 10);
        assert!(DESCRIPTOR.evaluate(&graph, &scope()).unwrap().is_empty());
    }

    #[test]
    fn resurrection_explains_dead_then_alive() {
        let graph = InMemoryGraph::new();
        let anna = character(&graph, "Anna");
        known_fact(&graph, anna, "Anna is dead", 0);
        event(&graph, anna, EventKind::Resurrection, 10);
        known_fact(&graph, anna, "Anna is alive", 10);
        assert!(DESCRIPTOR.evaluate(&graph, &scope()).unwrap().is_empty());
    }

    #[test]
    fn resurrection_after_later_fact_does_not_explain_it() {
        let graph = InMemoryGraph::new();
        let anna = character(&graph, "Anna");
        known_fact(&graph, anna, "Anna is dead", 0);
        known_fact(&graph, anna, "Anna is alive", 10);
        event(&graph, anna, EventKind::Resurrection, 20);
        assert_eq!(DESCRIPTOR.evaluate(&graph, &scope()).unwrap().len(), 1);
    }

    #[test]
    fn someone_elses_event_does_not_count() {
        let graph = InMemoryGraph::new();
        let anna = character(&graph, "Anna");
        let bob = character(&graph, "Bob");
        known_fact(&graph, anna, "Anna is alive", 0);
        event(&graph, bob, EventKind::Death, 5);
        known_fact(&graph, anna, "Anna is dead", 10);
        assert_eq!(DESCRIPTOR.evaluate(&graph, &scope()).unwrap().len(), 1);
    }

    #[test]
    fn facts_about_different_people_do_not_conflict() {
        let graph = InMemoryGraph::new();
        let anna = character(&graph, "Anna");
        known_fact(&graph, anna, "Bob is dead", 0);
        known_fact(&graph, anna, "Carl is alive", 10);
        assert!(DESCRIPTOR.evaluate(&graph, &scope()).unwrap().is_empty());
    }
}
