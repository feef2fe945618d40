//! Orphaned-finding sweep: fact pairs that read like a contradiction but
//! carry no contradiction edge from any rule. Audit material only.

use std::collections::HashSet;

use crate::graph::query::{decode_rows, FactRow};
use crate::graph::{GraphError, GraphQuery, GraphStore};
use crate::ids::FactId;
use crate::severity::Severity;

use super::content::{exclusion, shares_topic, Exclusion};
use super::{unordered, Evidence, Finding, RuleDescriptor, RuleKind, RuleName, RuleScope};

pub(super) const DESCRIPTOR: RuleDescriptor = RuleDescriptor {
    name: RuleName::OrphanedFindingSweep,
    kind: RuleKind::Maintenance,
    description: "contradiction-shaped fact pairs with no contradiction edge",
    confidence: 0.7,
    execute,
    classify,
};

fn execute(graph: &dyn GraphStore, scope: &RuleScope) -> Result<Vec<Finding>, GraphError> {
    let mut facts: Vec<FactRow> = decode_rows(graph.query(&GraphQuery::StoryFacts {
        story_id: scope.story_id.clone(),
        user_id: scope.user_id.clone(),
    })?)?;
    facts.sort_by_key(|f| (f.asserted_at, f.fact_id));
    let linked = scope.linked_pairs(graph)?;

    let mut seen: HashSet<(FactId, FactId)> = HashSet::new();
    let mut findings = Vec::new();
    for (i, a) in facts.iter().enumerate() {
        for b in &facts[i + 1..] {
            let pair = unordered(a.fact_id, b.fact_id);
            if a.fact_id == b.fact_id || linked.contains(&pair) || seen.contains(&pair) {
                continue;
            }
            let Some(why) = exclusion(&a.content, &b.content) else {
                continue;
            };
            if why.is_life_state() || !shares_topic(&a.content, &b.content) {
                continue;
            }
            seen.insert(pair);
            findings.push(Finding {
                from_fact: a.fact_id,
                to_fact: b.fact_id,
                reason: format!("Content contradiction detected ({why})"),
                evidence: Evidence::Orphan { exclusion: why },
            });
        }
    }
    Ok(findings)
}

fn classify(finding: &Finding) -> Severity {
    match &finding.evidence {
        Evidence::Orphan {
            exclusion: Exclusion::Negation,
        } => Severity::Low,
        _ => Severity::Medium,
    }
}
