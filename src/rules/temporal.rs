//! Temporal contradiction: two facts about the same subject that hold over
//! overlapping intervals but cannot both be true.

use std::collections::{BTreeMap, HashSet};

use crate::graph::query::{decode_rows, KnowledgeRow};
use crate::graph::{GraphError, GraphQuery, GraphStore};
use crate::ids::{CharacterId, FactId};
use crate::severity::Severity;

use super::content::{exclusion, shares_topic};
use super::{unordered, Evidence, Finding, RuleDescriptor, RuleKind, RuleName, RuleScope};

pub(super) const DESCRIPTOR: RuleDescriptor = RuleDescriptor {
    name: RuleName::TemporalContradiction,
    kind: RuleKind::Detection,
    description: "facts about one subject with overlapping validity and exclusive content",
    confidence: 0.8,
    execute,
    classify,
};

fn execute(graph: &dyn GraphStore, scope: &RuleScope) -> Result<Vec<Finding>, GraphError> {
    let rows: Vec<KnowledgeRow> = decode_rows(graph.query(&GraphQuery::CharacterKnowledge {
        story_id: scope.story_id.clone(),
        user_id: scope.user_id.clone(),
    })?)?;
    let linked = scope.linked_pairs(graph)?;

    let mut by_subject: BTreeMap<CharacterId, Vec<KnowledgeRow>> = BTreeMap::new();
    for row in rows {
        by_subject.entry(row.character_id).or_default().push(row);
    }

    let mut seen: HashSet<(FactId, FactId)> = HashSet::new();
    let mut findings = Vec::new();
    for (subject, mut facts) in by_subject {
        facts.sort_by_key(|f| (f.asserted_at, f.fact_id));
        for (i, a) in facts.iter().enumerate() {
            for b in &facts[i + 1..] {
                if a.fact_id == b.fact_id || !a.valid.overlaps(&b.valid) {
                    continue;
                }
                let pair = unordered(a.fact_id, b.fact_id);
                if linked.contains(&pair) || seen.contains(&pair) {
                    continue;
                }
                let Some(why) = exclusion(&a.content, &b.content) else {
                    continue;
                };
                // dead/alive belongs to the character-state rule
                if why.is_life_state() || !shares_topic(&a.content, &b.content) {
                    continue;
                }
                seen.insert(pair);
                findings.push(Finding {
                    from_fact: a.fact_id,
                    to_fact: b.fact_id,
                    reason: format!(
                        "Overlapping facts are mutually exclusive ({why}): '{}' vs '{}'",
                        a.content, b.content
                    ),
                    evidence: Evidence::Temporal {
                        subject,
                        exclusion: why,
                        overlap: a.valid.overlap_ratio(&b.valid),
                    },
                });
            }
        }
    }
    Ok(findings)
}

fn classify(finding: &Finding) -> Severity {
    match finding.evidence {
        Evidence::Temporal { overlap, .. } if overlap >= 0.5 => Severity::High,
        _ => Severity::Medium,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::graph::{ContradictionEdge, InMemoryGraph, KnowledgeFact, KnowsEdge};
    use crate::rules::test_support::{character, known_fact, story, t};
    use crate::time::TimeRange;

    fn scope() -> RuleScope {
        RuleScope::new(story(), None)
    }

    #[test]
    fn exclusive_overlapping_facts_are_flagged() {
        let graph = InMemoryGraph::new();
        let bob = character(&graph, "Bob");
        let a = known_fact(&graph, bob, "Carl is Bob's enemy", 0);
        let b = known_fact(&graph, bob, "Carl is Bob's ally", 10);

        let candidates = DESCRIPTOR.evaluate(&graph, &scope()).unwrap();
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!((c.from_fact, c.to_fact), (a, b));
        assert_eq!(c.severity, Severity::High);
        assert!((c.confidence - 0.8).abs() < f32::EPSILON);
        assert!(c.reason.contains("allegiance"));
    }

    #[test]
    fn life_state_pairs_are_left_to_the_state_rule() {
        let graph = InMemoryGraph::new();
        let anna = character(&graph, "Anna");
        known_fact(&graph, anna, "Anna is alive", 0);
        known_fact(&graph, anna, "Anna is dead", 10);
        assert!(DESCRIPTOR.evaluate(&graph, &scope()).unwrap().is_empty());
    }

    #[test]
    fn disjoint_validity_is_not_a_contradiction() {
        let graph = InMemoryGraph::new();
        let bob = character(&graph, "Bob");
        for (content, from, to) in [("The gate is locked", 0, 10), ("The gate is not locked", 20, 30)] {
            let fact = KnowledgeFact::new(story(), content, t(from))
                .with_validity(TimeRange::new(t(from), t(to)).unwrap());
            let id = fact.id;
            graph.insert(fact).unwrap();
            graph
                .insert(KnowsEdge {
                    character_id: bob,
                    fact_id: id,
                    learned_at: t(from),
                })
                .unwrap();
        }
        assert!(DESCRIPTOR.evaluate(&graph, &scope()).unwrap().is_empty());
    }

    #[test]
    fn partial_overlap_is_medium() {
        let graph = InMemoryGraph::new();
        let bob = character(&graph, "Bob");
        let spans = [("The gate is locked", 0, 100), ("The gate is not locked", 90, 200)];
        for (content, from, to) in spans {
            let fact = KnowledgeFact::new(story(), content, t(from))
                .with_validity(TimeRange::new(t(from), t(to)).unwrap());
            let id = fact.id;
            graph.insert(fact).unwrap();
            graph
                .insert(KnowsEdge {
                    character_id: bob,
                    fact_id: id,
                    learned_at: t(from),
                })
                .unwrap();
        }
        let candidates = DESCRIPTOR.evaluate(&graph, &scope()).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].severity, Severity::Medium);
    }

    #[test]
    fn already_linked_pair_is_skipped() {
        let graph = InMemoryGraph::new();
        let bob = character(&graph, "Bob");
        let a = known_fact(&graph, bob, "Carl is Bob's enemy", 0);
        let b = known_fact(&graph, bob, "Carl is Bob's ally", 10);
        let edge = ContradictionEdge::new(
            b,
            a,
            story(),
            RuleName::RelationshipContradiction,
            Severity::High,
            "linked elsewhere",
            0.9,
            t(20),
        )
        .unwrap();
        graph.insert(edge).unwrap();
        assert!(DESCRIPTOR.evaluate(&graph, &scope()).unwrap().is_empty());
    }

    #[test]
    fn supplied_linked_set_replaces_the_graph_read() {
        let graph = InMemoryGraph::new();
        let bob = character(&graph, "Bob");
        let a = known_fact(&graph, bob, "Carl is Bob's enemy", 0);
        let b = known_fact(&graph, bob, "Carl is Bob's ally", 10);

        let linked: HashSet<_> = [unordered(a, b)].into_iter().collect();
        let scope = scope().with_linked(linked);
        assert!(scope.is_linked(unordered(b, a)));
        assert!(DESCRIPTOR.evaluate(&graph, &scope).unwrap().is_empty());

        // An empty supplied set is trusted even though nothing was read.
        let scope = RuleScope::new(story(), None).with_linked(HashSet::new());
        assert_eq!(DESCRIPTOR.evaluate(&graph, &scope).unwrap().len(), 1);
    }

    #[test]
    fn shared_fact_known_by_two_characters_is_reported_once() {
        let graph = InMemoryGraph::new();
        let bob = character(&graph, "Bob");
        let dora = character(&graph, "Dora");
        let a = known_fact(&graph, bob, "The sword is cursed", 0);
        let b = known_fact(&graph, bob, "The sword is not cursed", 5);
        for id in [a, b] {
            graph
                .insert(KnowsEdge {
                    character_id: dora,
                    fact_id: id,
                    learned_at: t(6) + Duration::seconds(1),
                })
                .unwrap();
        }
        assert_eq!(DESCRIPTOR.evaluate(&graph, &scope()).unwrap().len(), 1);
    }
}
