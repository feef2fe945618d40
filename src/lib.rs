//! # plotguard - temporal consistency checks for story graphs
//!
//! plotguard watches a story knowledge graph (characters, knowledge facts,
//! relationships, locations, events) for facts that cannot all hold at once,
//! records each finding as a contradiction edge, and notifies subscribers.
//!
//! ## Core Concepts
//!
//! - **Rule**: a deterministic read of the graph that yields contradiction
//!   candidates for one story, each with a severity
//! - **Engine**: runs the rule catalog, merges overlapping findings, and
//!   upserts contradiction edges idempotently
//! - **Job**: a background loop that scans enrolled stories on an interval
//! - **Alert bus**: fans contradiction alerts out to subscribers and handlers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use plotguard::{AlertBus, ConsistencyEngine, InMemoryGraph, PlotguardConfig, StoryId};
//!
//! let config = PlotguardConfig::load("plotguard.toml")?;
//! let bus = Arc::new(AlertBus::new(&config.alerts));
//! bus.start_listening()?;
//!
//! let engine = ConsistencyEngine::new(Arc::new(InMemoryGraph::new()), config.engine)
//!     .with_alerts(bus.clone());
//! let summary = engine.run_consistency_scan(&StoryId::new("story-1")?, None)?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod ids;
pub mod severity;
pub mod time;

// Graph adapter and write-side checks
pub mod graph;
pub mod validation;

// Detection
pub mod engine;
pub mod rules;

// Scheduling, notification, configuration
pub mod alerts;
pub mod config;
pub mod job;

pub use alerts::{
    AlertBus, AlertHandler, AlertMessage, AlertPublisher, AlertStats, ContradictionAlert,
    LoggingHandler,
};
pub use config::{AlertConfig, EngineConfig, JobConfig, PlotguardConfig};
pub use engine::{ConsistencyEngine, ContradictionReport, DetectionResult, ScanSummary};
pub use error::{ConsistencyError, ConsistencyResult, ValidationError};
pub use graph::{GraphError, GraphQuery, GraphStore, GraphWrite, InMemoryGraph, Row, WriteAck};
pub use ids::{
    CharacterId, ContradictionEdgeId, EventId, FactId, LocationId, SceneId, StoryId, UserId,
};
pub use job::{ConsistencyJob, JobStatus, ScanOutcome, StoryStatus};
pub use rules::{Candidate, Evidence, RuleCatalog, RuleDescriptor, RuleKind, RuleName, RuleScope};
pub use severity::Severity;
pub use time::{SceneSpan, TimeRange};
pub use validation::{ValidationStats, WriteValidator};
