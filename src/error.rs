//! Error types for plotguard.
//!
//! Errors are strongly typed using thiserror so callers can tell a single
//! failed rule (recoverable, the scan continues) apart from a failure that
//! aborts a whole story scan.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::graph::GraphError;

/// Validation errors raised while constructing domain values or loading config.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Confidence value {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        value: f32,
    },

    #[error("Invalid time range: from ({from}) must be before to ({to})")]
    InvalidTimeRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },

    #[error("Invalid scene span: start ({start}) must not exceed end ({end})")]
    InvalidSceneSpan {
        start: i64,
        end: i64,
    },

    #[error("Identifier for {kind} cannot be empty")]
    EmptyIdentifier {
        kind: &'static str,
    },

    #[error("Unknown severity '{value}'")]
    UnknownSeverity {
        value: String,
    },

    #[error("Unknown rule '{value}'")]
    UnknownRule {
        value: String,
    },

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

/// Top-level error type for the consistency engine, job and alert bus.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    /// A single rule failed; the rest of the pass continues without it.
    #[error("Rule '{rule}' failed: {message}")]
    RuleExecution {
        rule: String,
        message: String,
    },

    /// Contradiction edge materialization failed; the story is retried next tick.
    #[error("Failed to write contradiction edge: {message}")]
    WriteFailure {
        message: String,
    },

    /// The graph capability cannot be reached; the current scan aborts.
    #[error("Graph store unavailable: {message}")]
    StoreUnavailable {
        message: String,
    },

    /// An alert handler failed or panicked.
    #[error("Alert handler '{handler}' failed: {message}")]
    Handler {
        handler: String,
        message: String,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ConsistencyError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Maps an adapter error raised while a rule was reading the graph.
    #[must_use]
    pub fn from_rule_read(rule: &str, err: GraphError) -> Self {
        match err {
            GraphError::Unavailable(message) => Self::StoreUnavailable { message },
            other => Self::RuleExecution {
                rule: rule.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Maps an adapter error raised while writing contradiction edges.
    #[must_use]
    pub fn from_write(err: GraphError) -> Self {
        match err {
            GraphError::Unavailable(message) => Self::StoreUnavailable { message },
            other => Self::WriteFailure {
                message: other.to_string(),
            },
        }
    }

    /// Returns true if the failure is isolated and the surrounding work continues.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::RuleExecution { .. } | Self::Handler { .. })
    }

    /// Returns true if this error ends the current story scan.
    #[must_use]
    pub const fn aborts_scan(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::WriteFailure { .. })
    }

    /// Returns true if the store could not be reached.
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

impl From<GraphError> for ConsistencyError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Unavailable(message) => Self::StoreUnavailable { message },
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias for plotguard operations.
pub type ConsistencyResult<T> = Result<T, ConsistencyError>;
