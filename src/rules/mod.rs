//! Rule catalog.
//!
//! Each rule is a descriptor: a name, a kind, an `execute` step that reads
//! the graph for one story scope and yields raw [`Finding`]s, and a
//! `classify` step that assigns a [`Severity`] to each finding. Rules are
//! deterministic and never write.

pub mod content;
mod location;
mod orphan;
mod relationship;
mod state;
mod temporal;

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConsistencyError, ConsistencyResult, ValidationError};
use crate::graph::query::{decode_rows, ContradictionRow};
use crate::graph::{GraphError, GraphQuery, GraphStore, RelationshipKind};
use crate::ids::{CharacterId, FactId, LocationId, StoryId, UserId};
use crate::severity::Severity;

use content::{Exclusion, LifeState};

/// Names of the rules in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleName {
    TemporalContradiction,
    RelationshipContradiction,
    LocationContradiction,
    CharacterStateContradiction,
    OrphanedFindingSweep,
}

impl RuleName {
    pub const ALL: [Self; 5] = [
        Self::TemporalContradiction,
        Self::RelationshipContradiction,
        Self::LocationContradiction,
        Self::CharacterStateContradiction,
        Self::OrphanedFindingSweep,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TemporalContradiction => "temporal_contradiction",
            Self::RelationshipContradiction => "relationship_contradiction",
            Self::LocationContradiction => "location_contradiction",
            Self::CharacterStateContradiction => "character_state_contradiction",
            Self::OrphanedFindingSweep => "orphaned_finding_sweep",
        }
    }
}

impl fmt::Display for RuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == needle)
            .ok_or_else(|| ValidationError::UnknownRule {
                value: needle.to_string(),
            })
    }
}

/// Whether a rule's findings represent live contradictions or audit material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Findings are contradictions and may alert.
    Detection,
    /// Backfill/audit findings; never alert, never displace a detection finding.
    Maintenance,
}

/// The story (and optionally user) a rule runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleScope {
    pub story_id: StoryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Pairs already linked by a contradiction edge, when the caller has
    /// read them once for the whole pass. `None` makes each rule that needs
    /// them read them itself.
    #[serde(skip)]
    pub linked: Option<HashSet<(FactId, FactId)>>,
}

impl RuleScope {
    #[must_use]
    pub const fn new(story_id: StoryId, user_id: Option<UserId>) -> Self {
        Self {
            story_id,
            user_id,
            linked: None,
        }
    }

    #[must_use]
    pub fn with_linked(mut self, linked: HashSet<(FactId, FactId)>) -> Self {
        self.linked = Some(linked);
        self
    }

    /// Returns true if the supplied linked set contains `pair`.
    #[must_use]
    pub fn is_linked(&self, pair: (FactId, FactId)) -> bool {
        self.linked.as_ref().is_some_and(|l| l.contains(&pair))
    }

    fn linked_pairs(
        &self,
        graph: &dyn GraphStore,
    ) -> Result<Cow<'_, HashSet<(FactId, FactId)>>, GraphError> {
        match &self.linked {
            Some(linked) => Ok(Cow::Borrowed(linked)),
            None => read_linked_pairs(graph, &self.story_id).map(Cow::Owned),
        }
    }
}

/// Supporting evidence carried by a finding; drives classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Evidence {
    Temporal {
        subject: CharacterId,
        exclusion: Exclusion,
        overlap: f32,
    },
    Relationship {
        characters: (CharacterId, CharacterId),
        kinds: (RelationshipKind, RelationshipKind),
        overlap: f32,
        both_active: bool,
    },
    Location {
        character: CharacterId,
        locations: (LocationId, LocationId),
        overlap: f32,
    },
    CharacterState {
        character: CharacterId,
        earlier: LifeState,
        later: LifeState,
        gap_secs: i64,
    },
    Orphan {
        exclusion: Exclusion,
    },
}

/// Unclassified output of a rule's `execute` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub from_fact: FactId,
    pub to_fact: FactId,
    pub reason: String,
    pub evidence: Evidence,
}

/// A classified contradiction candidate, ready to materialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub rule: RuleName,
    pub kind: RuleKind,
    pub from_fact: FactId,
    pub to_fact: FactId,
    pub severity: Severity,
    pub reason: String,
    pub confidence: f32,
    pub evidence: Evidence,
}

impl Candidate {
    /// The unordered fact pair, smaller id first.
    #[must_use]
    pub fn pair(&self) -> (FactId, FactId) {
        unordered(self.from_fact, self.to_fact)
    }
}

/// Orders a fact pair so `(a, b)` and `(b, a)` compare equal.
#[must_use]
pub fn unordered(a: FactId, b: FactId) -> (FactId, FactId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

type ExecuteFn = fn(&dyn GraphStore, &RuleScope) -> Result<Vec<Finding>, GraphError>;
type ClassifyFn = fn(&Finding) -> Severity;

/// A named rule: query step plus severity classifier.
#[derive(Clone, Copy)]
pub struct RuleDescriptor {
    pub name: RuleName,
    pub kind: RuleKind,
    pub description: &'static str,
    pub confidence: f32,
    execute: ExecuteFn,
    classify: ClassifyFn,
}

impl fmt::Debug for RuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("confidence", &self.confidence)
            .finish_non_exhaustive()
    }
}

impl RuleDescriptor {
    /// Runs the rule and classifies every finding.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the adapter is unreachable, `RuleExecution` for
    /// any other read or decode failure.
    pub fn evaluate(
        &self,
        graph: &dyn GraphStore,
        scope: &RuleScope,
    ) -> ConsistencyResult<Vec<Candidate>> {
        let findings = (self.execute)(graph, scope)
            .map_err(|e| ConsistencyError::from_rule_read(self.name.as_str(), e))?;
        Ok(findings
            .into_iter()
            .map(|finding| Candidate {
                rule: self.name,
                kind: self.kind,
                severity: (self.classify)(&finding),
                confidence: self.confidence,
                from_fact: finding.from_fact,
                to_fact: finding.to_fact,
                reason: finding.reason,
                evidence: finding.evidence,
            })
            .collect())
    }

    /// Classifies a single finding with this rule's classifier.
    #[must_use]
    pub fn classify(&self, finding: &Finding) -> Severity {
        (self.classify)(finding)
    }
}

/// The fixed, ordered set of rules a scan runs.
#[derive(Debug, Clone)]
pub struct RuleCatalog {
    rules: Vec<RuleDescriptor>,
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl RuleCatalog {
    /// All five rules, in evaluation order.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            rules: vec![
                temporal::DESCRIPTOR,
                relationship::DESCRIPTOR,
                location::DESCRIPTOR,
                state::DESCRIPTOR,
                orphan::DESCRIPTOR,
            ],
        }
    }

    /// The standard catalog minus `disabled`.
    #[must_use]
    pub fn without(disabled: &[RuleName]) -> Self {
        let mut catalog = Self::standard();
        catalog.rules.retain(|r| !disabled.contains(&r.name));
        catalog
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleDescriptor> {
        self.rules.iter()
    }

    #[must_use]
    pub fn get(&self, name: RuleName) -> Option<&RuleDescriptor> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Position in evaluation order; used as the final merge tie-breaker.
    #[must_use]
    pub fn position(&self, name: RuleName) -> usize {
        self.rules
            .iter()
            .position(|r| r.name == name)
            .unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Unordered fact pairs already linked by any contradiction edge in the story.
///
/// # Errors
///
/// Propagates the adapter error, or `GraphError::Decode` for malformed rows.
pub fn read_linked_pairs(
    graph: &dyn GraphStore,
    story_id: &StoryId,
) -> Result<HashSet<(FactId, FactId)>, GraphError> {
    let rows = graph.query(&GraphQuery::Contradictions {
        story_id: Some(story_id.clone()),
        rule: None,
    })?;
    let edges: Vec<ContradictionRow> = decode_rows(rows)?;
    Ok(edges
        .into_iter()
        .map(|e| unordered(e.from_fact, e.to_fact))
        .collect())
}
