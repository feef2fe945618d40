//! Location contradiction: one character placed in two different locations
//! by scenes whose scene order or timestamps overlap.

use std::collections::{BTreeMap, HashSet};

use crate::graph::query::{decode_rows, PresenceRow};
use crate::graph::{GraphError, GraphQuery, GraphStore};
use crate::ids::{CharacterId, FactId};
use crate::severity::Severity;

use super::{unordered, Evidence, Finding, RuleDescriptor, RuleKind, RuleName, RuleScope};

pub(super) const DESCRIPTOR: RuleDescriptor = RuleDescriptor {
    name: RuleName::LocationContradiction,
    kind: RuleKind::Detection,
    description: "a character present in two locations during overlapping scenes",
    confidence: 0.95,
    execute,
    classify,
};

/// Degree to which two presences coincide, the larger of the scene-order
/// and timestamp overlaps. Zero when they do not coincide at all.
fn coincidence(a: &PresenceRow, b: &PresenceRow) -> f32 {
    let by_order = a.order.overlap_ratio(&b.order);
    let by_time = match (a.time, b.time) {
        (Some(x), Some(y)) => x.overlap_ratio(&y),
        _ => 0.0,
    };
    by_order.max(by_time)
}

fn execute(graph: &dyn GraphStore, scope: &RuleScope) -> Result<Vec<Finding>, GraphError> {
    let rows: Vec<PresenceRow> = decode_rows(graph.query(&GraphQuery::Presences {
        story_id: scope.story_id.clone(),
        user_id: scope.user_id.clone(),
    })?)?;

    let mut by_character: BTreeMap<CharacterId, Vec<PresenceRow>> = BTreeMap::new();
    for row in rows {
        by_character.entry(row.character_id).or_default().push(row);
    }

    let mut seen: HashSet<(FactId, FactId)> = HashSet::new();
    let mut findings = Vec::new();
    for (character, mut presences) in by_character {
        presences.sort_by_key(|p| (p.order.start, p.order.end, p.fact_id));
        for (i, a) in presences.iter().enumerate() {
            for b in &presences[i + 1..] {
                if a.location_id == b.location_id || a.fact_id == b.fact_id {
                    continue;
                }
                let overlap = coincidence(a, b);
                if overlap <= 0.0 || !seen.insert(unordered(a.fact_id, b.fact_id)) {
                    continue;
                }
                findings.push(Finding {
                    from_fact: a.fact_id,
                    to_fact: b.fact_id,
                    reason: format!(
                        "Character {character} present in two locations at once: scenes {} and {}",
                        a.order, b.order
                    ),
                    evidence: Evidence::Location {
                        character,
                        locations: (a.location_id, b.location_id),
                        overlap,
                    },
                });
            }
        }
    }
    Ok(findings)
}

/// Severity scales with overlap; a full overlap still tops out at high.
fn classify(finding: &Finding) -> Severity {
    match finding.evidence {
        Evidence::Location { overlap, .. } => Severity::from_overlap(overlap, Severity::High),
        _ => Severity::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{InMemoryGraph, KnowledgeFact, Location, PresenceEdge, Scene};
    use crate::ids::LocationId;
    use crate::rules::test_support::{character, story, t};
    use crate::time::{SceneSpan, TimeRange};

    fn location(graph: &InMemoryGraph, name: &str) -> LocationId {
        let l = Location::new(story(), name);
        let id = l.id;
        graph.insert(l).unwrap();
        id
    }

    fn place(
        graph: &InMemoryGraph,
        who: CharacterId,
        at: LocationId,
        order: SceneSpan,
        time: Option<TimeRange>,
    ) -> FactId {
        let mut scene = Scene::new(story(), at, order);
        scene.time = time;
        let scene_id = scene.id;
        graph.insert(scene).unwrap();
        let fact = KnowledgeFact::new(story(), "present", t(order.start));
        let fact_id = fact.id;
        graph.insert(fact).unwrap();
        graph
            .insert(PresenceEdge {
                character_id: who,
                scene_id,
                fact_id,
            })
            .unwrap();
        fact_id
    }

    fn scope() -> RuleScope {
        RuleScope::new(story(), None)
    }

    #[test]
    fn overlapping_scene_order_is_flagged_once() {
        let graph = InMemoryGraph::new();
        let anna = character(&graph, "Anna");
        let x = location(&graph, "Harbor");
        let y = location(&graph, "Castle");
        let a = place(&graph, anna, x, SceneSpan::new(1, 3).unwrap(), None);
        let b = place(&graph, anna, y, SceneSpan::new(2, 4).unwrap(), None);

        let candidates = DESCRIPTOR.evaluate(&graph, &scope()).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!((candidates[0].from_fact, candidates[0].to_fact), (a, b));
        assert_eq!(candidates[0].severity, Severity::High);
    }

    #[test]
    fn adjacent_scene_ranges_are_fine() {
        let graph = InMemoryGraph::new();
        let anna = character(&graph, "Anna");
        let x = location(&graph, "Harbor");
        let y = location(&graph, "Castle");
        place(&graph, anna, x, SceneSpan::new(1, 3).unwrap(), None);
        place(&graph, anna, y, SceneSpan::new(4, 6).unwrap(), None);
        assert!(DESCRIPTOR.evaluate(&graph, &scope()).unwrap().is_empty());
    }

    #[test]
    fn same_location_is_fine() {
        let graph = InMemoryGraph::new();
        let anna = character(&graph, "Anna");
        let x = location(&graph, "Harbor");
        place(&graph, anna, x, SceneSpan::new(1, 3).unwrap(), None);
        place(&graph, anna, x, SceneSpan::new(2, 4).unwrap(), None);
        assert!(DESCRIPTOR.evaluate(&graph, &scope()).unwrap().is_empty());
    }

    #[test]
    fn timestamp_overlap_counts_when_order_does_not() {
        let graph = InMemoryGraph::new();
        let anna = character(&graph, "Anna");
        let x = location(&graph, "Harbor");
        let y = location(&graph, "Castle");
        place(
            &graph,
            anna,
            x,
            SceneSpan::at(1),
            Some(TimeRange::new(t(0), t(100)).unwrap()),
        );
        place(
            &graph,
            anna,
            y,
            SceneSpan::at(7),
            Some(TimeRange::new(t(90), t(200)).unwrap()),
        );
        let candidates = DESCRIPTOR.evaluate(&graph, &scope()).unwrap();
        assert_eq!(candidates.len(), 1);
        // 10s shared out of the shorter 100s.
        assert_eq!(candidates[0].severity, Severity::Low);
    }

    #[test]
    fn severity_scales_with_overlap() {
        let finding = |overlap| Finding {
            from_fact: FactId::new(),
            to_fact: FactId::new(),
            reason: String::new(),
            evidence: Evidence::Location {
                character: CharacterId::new(),
                locations: (LocationId::new(), LocationId::new()),
                overlap,
            },
        };
        assert_eq!(classify(&finding(0.1)), Severity::Low);
        assert_eq!(classify(&finding(0.3)), Severity::Medium);
        assert_eq!(classify(&finding(0.6)), Severity::High);
        assert_eq!(classify(&finding(1.0)), Severity::High);
    }
}
