//! Relationship contradiction: incompatible relationship kinds between the
//! same two characters at overlapping times.

use std::collections::HashSet;

use crate::graph::query::{decode_rows, RelationshipRow};
use crate::graph::{GraphError, GraphQuery, GraphStore};
use crate::ids::{CharacterId, FactId};
use crate::severity::Severity;

use super::{unordered, Evidence, Finding, RuleDescriptor, RuleKind, RuleName, RuleScope};

pub(super) const DESCRIPTOR: RuleDescriptor = RuleDescriptor {
    name: RuleName::RelationshipContradiction,
    kind: RuleKind::Detection,
    description: "incompatible relationship kinds between two characters at overlapping times",
    confidence: 0.9,
    execute,
    classify,
};

fn characters(row: &RelationshipRow) -> (CharacterId, CharacterId) {
    if row.from_character <= row.to_character {
        (row.from_character, row.to_character)
    } else {
        (row.to_character, row.from_character)
    }
}

fn execute(graph: &dyn GraphStore, scope: &RuleScope) -> Result<Vec<Finding>, GraphError> {
    let mut rows: Vec<RelationshipRow> = decode_rows(graph.query(&GraphQuery::Relationships {
        story_id: scope.story_id.clone(),
        user_id: scope.user_id.clone(),
    })?)?;
    rows.sort_by_key(|r| (characters(r), r.valid.from, r.fact_id));

    let mut seen: HashSet<(FactId, FactId)> = HashSet::new();
    let mut findings = Vec::new();
    for (i, a) in rows.iter().enumerate() {
        for b in &rows[i + 1..] {
            if characters(a) != characters(b) {
                // sorted by character pair; no later row can match
                break;
            }
            if a.fact_id == b.fact_id
                || !a.kind.incompatible_with(b.kind)
                || !a.valid.overlaps(&b.valid)
            {
                continue;
            }
            if !seen.insert(unordered(a.fact_id, b.fact_id)) {
                continue;
            }
            findings.push(Finding {
                from_fact: a.fact_id,
                to_fact: b.fact_id,
                reason: format!(
                    "Conflicting relationship types: {} vs {}",
                    a.kind.as_str(),
                    b.kind.as_str()
                ),
                evidence: Evidence::Relationship {
                    characters: characters(a),
                    kinds: (a.kind, b.kind),
                    overlap: a.valid.overlap_ratio(&b.valid),
                    both_active: a.valid.is_open_ended() && b.valid.is_open_ended(),
                },
            });
        }
    }
    Ok(findings)
}

/// Both relationships still in force is worse than a bounded overlap.
fn classify(finding: &Finding) -> Severity {
    match finding.evidence {
        Evidence::Relationship { both_active: true, .. } => Severity::High,
        _ => Severity::Medium,
    }
}
