//! Consistency engine.
//!
//! Runs the rule catalog for a story, merges and filters the candidates,
//! materializes them as contradiction edges through the graph adapter, and
//! emits alerts for new findings at or above the configured threshold. The
//! engine keeps no per-call state; mutual exclusion between scans of one
//! story is the scheduler's job.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::{AlertPublisher, ContradictionAlert};
use crate::config::EngineConfig;
use crate::error::{ConsistencyError, ConsistencyResult};
use crate::graph::query::{decode_rows, ContradictionRow};
use crate::graph::{ContradictionEdge, GraphQuery, GraphStore, GraphWrite};
use crate::ids::{FactId, StoryId, UserId};
use crate::rules::{read_linked_pairs, Candidate, RuleCatalog, RuleKind, RuleName, RuleScope};

/// Name reported for a failed read of the already-linked pairs.
const LINKED_PAIRS_READ: &str = "linked_pairs";
use crate::severity::Severity;

/// Output of [`ConsistencyEngine::detect_contradictions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub story_id: StoryId,
    /// One candidate per unordered fact pair, in rule order.
    pub candidates: Vec<Candidate>,
    pub total: usize,
    /// Candidates dropped because their pair already carries an edge.
    pub already_linked: usize,
    /// Rules that failed this pass and were skipped.
    pub failed_rules: Vec<RuleName>,
    /// Recovered read failures, rule or linked-pair, in the order they happened.
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Output of [`ConsistencyEngine::run_consistency_scan`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSummary {
    pub story_id: StoryId,
    pub candidates: usize,
    pub edges_created: usize,
    pub alerts_published: usize,
    pub failed_rules: Vec<RuleName>,
    pub errors: Vec<String>,
    pub duration: Duration,
}

/// Aggregate over the contradiction edges of one story or of every story.
///
/// Computed on request; never cached or persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionReport {
    pub story_id: Option<StoryId>,
    pub total: usize,
    /// Always carries every severity, zero counts included.
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_rule: BTreeMap<RuleName, usize>,
    /// Edges grouped by severity, most confident first.
    pub edges: BTreeMap<Severity, Vec<ContradictionRow>>,
    pub generated_at: DateTime<Utc>,
}

impl ContradictionReport {
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }
}

/// Orchestrates rule execution, deduplication and edge materialization.
#[derive(Clone)]
pub struct ConsistencyEngine {
    graph: Arc<dyn GraphStore>,
    catalog: RuleCatalog,
    config: EngineConfig,
    alerts: Option<Arc<dyn AlertPublisher>>,
}

impl std::fmt::Debug for ConsistencyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistencyEngine")
            .field("catalog", &self.catalog)
            .field("config", &self.config)
            .field("alerts", &self.alerts.is_some())
            .finish_non_exhaustive()
    }
}

impl ConsistencyEngine {
    /// Creates an engine over `graph` with the standard catalog minus the
    /// configured disabled rules, and no alert sink.
    #[must_use]
    pub fn new(graph: Arc<dyn GraphStore>, config: EngineConfig) -> Self {
        Self {
            graph,
            catalog: RuleCatalog::without(&config.disabled_rules),
            config,
            alerts: None,
        }
    }

    /// Routes alerts for new findings to `publisher`.
    #[must_use]
    pub fn with_alerts(mut self, publisher: Arc<dyn AlertPublisher>) -> Self {
        self.alerts = Some(publisher);
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs every rule for the story and returns the deduplicated candidates.
    /// Never writes.
    ///
    /// A failing rule is logged, listed in `failed_rules`, and skipped.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the graph cannot be reached; the pass is abandoned.
    pub fn detect_contradictions(
        &self,
        story_id: &StoryId,
        user_id: Option<&UserId>,
    ) -> ConsistencyResult<DetectionResult> {
        let mut errors = Vec::new();
        let linked = match read_linked_pairs(self.graph.as_ref(), story_id) {
            Ok(linked) => linked,
            Err(e) => {
                let err = ConsistencyError::from_rule_read(LINKED_PAIRS_READ, e);
                if err.is_store_unavailable() {
                    tracing::error!(story_id = %story_id, error = %err, "detection aborted");
                    return Err(err);
                }
                // Degraded pass: edge upserts stay idempotent per rule.
                tracing::warn!(story_id = %story_id, error = %err, "linked-pair read failed; continuing without it");
                errors.push(err.to_string());
                HashSet::new()
            }
        };
        let scope = RuleScope::new(story_id.clone(), user_id.cloned()).with_linked(linked);

        let mut raw: Vec<Candidate> = Vec::new();
        let mut failed_rules = Vec::new();
        for rule in self.catalog.iter() {
            match rule.evaluate(self.graph.as_ref(), &scope) {
                Ok(found) => {
                    tracing::debug!(
                        rule = %rule.name,
                        story_id = %story_id,
                        candidates = found.len(),
                        "rule evaluated"
                    );
                    raw.extend(found);
                }
                Err(e) if e.is_store_unavailable() => {
                    tracing::error!(rule = %rule.name, story_id = %story_id, error = %e, "detection aborted");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(rule = %rule.name, story_id = %story_id, error = %e, "rule failed; skipped");
                    failed_rules.push(rule.name);
                    errors.push(e.to_string());
                }
            }
        }

        let before = raw.len();
        raw.retain(|c| !scope.is_linked(c.pair()));
        let already_linked = before - raw.len();
        let candidates = self.merge(raw);

        Ok(DetectionResult {
            story_id: story_id.clone(),
            total: candidates.len(),
            candidates,
            already_linked,
            failed_rules,
            errors,
        })
    }

    /// Writes one contradiction edge per candidate and returns how many were
    /// new. Re-running with the same candidates creates nothing.
    ///
    /// # Errors
    ///
    /// `WriteFailure` or `StoreUnavailable` on the first failing write; edges
    /// written before it remain.
    pub fn create_contradiction_edges(
        &self,
        candidates: &[Candidate],
        story_id: &StoryId,
    ) -> ConsistencyResult<usize> {
        Ok(self.materialize(candidates, story_id)?.len())
    }

    /// Detect, materialize, then alert on new edges at or above the threshold.
    ///
    /// # Errors
    ///
    /// Propagates `StoreUnavailable` from detection and any write error.
    pub fn run_consistency_scan(
        &self,
        story_id: &StoryId,
        user_id: Option<&UserId>,
    ) -> ConsistencyResult<ScanSummary> {
        let started = Instant::now();
        let detection = self.detect_contradictions(story_id, user_id)?;
        let created = self.materialize(&detection.candidates, story_id)?;

        let mut alerts_published = 0;
        if let Some(publisher) = &self.alerts {
            for (edge, kind) in &created {
                if *kind == RuleKind::Detection && edge.severity >= self.config.alert_threshold {
                    publisher.publish(ContradictionAlert::from(edge));
                    alerts_published += 1;
                }
            }
        }

        let summary = ScanSummary {
            story_id: story_id.clone(),
            candidates: detection.total,
            edges_created: created.len(),
            alerts_published,
            failed_rules: detection.failed_rules,
            errors: detection.errors,
            duration: started.elapsed(),
        };
        tracing::info!(
            story_id = %story_id,
            candidates = summary.candidates,
            edges_created = summary.edges_created,
            alerts = summary.alerts_published,
            failed_rules = summary.failed_rules.len(),
            elapsed_ms = u64::try_from(summary.duration.as_millis()).unwrap_or(u64::MAX),
            "consistency scan finished"
        );
        Ok(summary)
    }

    /// Runs only the orphaned-finding sweep, for audit. Never writes or alerts.
    ///
    /// # Errors
    ///
    /// `RuleExecution` or `StoreUnavailable` if the sweep cannot read the graph.
    pub fn sweep_orphans(
        &self,
        story_id: &StoryId,
        user_id: Option<&UserId>,
    ) -> ConsistencyResult<Vec<Candidate>> {
        let standard = RuleCatalog::standard();
        let Some(rule) = standard.get(RuleName::OrphanedFindingSweep) else {
            return Ok(Vec::new());
        };
        rule.evaluate(
            self.graph.as_ref(),
            &RuleScope::new(story_id.clone(), user_id.cloned()),
        )
    }

    /// Aggregates the current contradiction edges, optionally for one story.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the graph cannot be reached, `Internal` on decode failure.
    pub fn get_contradiction_report(
        &self,
        story_id: Option<&StoryId>,
    ) -> ConsistencyResult<ContradictionReport> {
        let rows = self.graph.query(&GraphQuery::Contradictions {
            story_id: story_id.cloned(),
            rule: None,
        })?;
        let mut edges: Vec<ContradictionRow> = decode_rows(rows)?;
        edges.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.detected_at.cmp(&a.detected_at))
        });

        let mut by_severity: BTreeMap<Severity, usize> =
            Severity::ALL.into_iter().map(|s| (s, 0)).collect();
        let mut by_rule: BTreeMap<RuleName, usize> = BTreeMap::new();
        let mut grouped: BTreeMap<Severity, Vec<ContradictionRow>> = BTreeMap::new();
        let total = edges.len();
        for edge in edges {
            *by_severity.entry(edge.severity).or_default() += 1;
            *by_rule.entry(edge.rule).or_default() += 1;
            grouped.entry(edge.severity).or_default().push(edge);
        }

        Ok(ContradictionReport {
            story_id: story_id.cloned(),
            total,
            by_severity,
            by_rule,
            edges: grouped,
            generated_at: Utc::now(),
        })
    }

    /// Keeps one candidate per unordered pair: detection over maintenance,
    /// then higher severity, then higher confidence, then catalog order.
    fn merge(&self, raw: Vec<Candidate>) -> Vec<Candidate> {
        let mut order: Vec<(FactId, FactId)> = Vec::new();
        let mut best: HashMap<(FactId, FactId), Candidate> = HashMap::new();
        for candidate in raw {
            let pair = candidate.pair();
            match best.get(&pair) {
                None => {
                    order.push(pair);
                    best.insert(pair, candidate);
                }
                Some(current) if self.outranks(&candidate, current) => {
                    best.insert(pair, candidate);
                }
                Some(_) => {}
            }
        }
        order
            .into_iter()
            .filter_map(|pair| best.remove(&pair))
            .collect()
    }

    fn outranks(&self, a: &Candidate, b: &Candidate) -> bool {
        let kind_rank = |c: &Candidate| u8::from(c.kind == RuleKind::Detection);
        kind_rank(a)
            .cmp(&kind_rank(b))
            .then(a.severity.cmp(&b.severity))
            .then(a.confidence.total_cmp(&b.confidence))
            .then(self.catalog.position(b.rule).cmp(&self.catalog.position(a.rule)))
            == Ordering::Greater
    }

    fn materialize(
        &self,
        candidates: &[Candidate],
        story_id: &StoryId,
    ) -> ConsistencyResult<Vec<(ContradictionEdge, RuleKind)>> {
        let detected_at = Utc::now();
        let mut created = Vec::new();
        for c in candidates {
            let edge = ContradictionEdge::new(
                c.from_fact,
                c.to_fact,
                story_id.clone(),
                c.rule,
                c.severity,
                c.reason.clone(),
                c.confidence,
                detected_at,
            )?;
            let ack = self
                .graph
                .write(GraphWrite::Contradiction(edge.clone()))
                .map_err(|e| {
                    let err = ConsistencyError::from_write(e);
                    tracing::error!(story_id = %story_id, rule = %c.rule, error = %err, "edge write failed");
                    err
                })?;
            if ack.created() {
                created.push((edge, c.kind));
            }
        }
        Ok(created)
    }
}
