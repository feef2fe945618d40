//! Contradiction severity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Ordered severity of a contradiction: `Low < Medium < High < Critical`.
///
/// Only findings at or above the configured alert threshold (critical by
/// default) are published to the alert bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities, lowest first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Bucket an overlap ratio in [0, 1] into a severity, capped at `max`.
    #[must_use]
    pub fn from_overlap(ratio: f32, max: Self) -> Self {
        let raw = if ratio >= 0.999 {
            Self::Critical
        } else if ratio >= 0.5 {
            Self::High
        } else if ratio >= 0.25 {
            Self::Medium
        } else {
            Self::Low
        };
        raw.min(max)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(ValidationError::UnknownSeverity {
                value: other.to_string(),
            }),
        }
    }
}
