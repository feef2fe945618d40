//! Temporal types used by the rule catalog.
//!
//! Two notions of "when" exist in a story graph:
//! - **Validity**: the wall-clock interval in which a fact holds ([`TimeRange`]).
//! - **Scene order**: the narrative position of a scene ([`SceneSpan`]), which
//!   is what location rules compare when scenes carry no timestamps.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A range of time (half-open interval: [from, to)).
///
/// # Examples
///
/// ```
/// use plotguard::TimeRange;
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// let a = TimeRange::new(now, now + Duration::hours(2)).unwrap();
/// let b = TimeRange::starting_at(now + Duration::hours(1));
/// assert!(a.overlaps(&b));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start of the range (inclusive).
    pub from: DateTime<Utc>,

    /// End of the range (exclusive). None means open-ended.
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Creates a time range from two timestamps.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidTimeRange` if `from >= to`.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, ValidationError> {
        if from >= to {
            return Err(ValidationError::InvalidTimeRange { from, to });
        }
        Ok(Self { from, to: Some(to) })
    }

    /// Creates an open-ended time range starting at the given time.
    #[must_use]
    pub const fn starting_at(from: DateTime<Utc>) -> Self {
        Self { from, to: None }
    }

    /// Creates a time range for a specific instant (1 microsecond duration).
    #[must_use]
    pub fn instant(at: DateTime<Utc>) -> Self {
        Self {
            from: at,
            to: Some(at + Duration::microseconds(1)),
        }
    }

    #[must_use]
    pub const fn is_open_ended(&self) -> bool {
        self.to.is_none()
    }

    /// Check if a timestamp falls within this range [from, to).
    #[must_use]
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.from && self.to.map_or(true, |to| time < to)
    }

    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let self_end = self.to.unwrap_or(DateTime::<Utc>::MAX_UTC);
        let other_end = other.to.unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.from < other_end && other.from < self_end
    }

    /// Returns the intersection of two ranges, if any.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        if !self.overlaps(other) {
            return None;
        }

        let from = self.from.max(other.from);
        let to = match (self.to, other.to) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };

        Some(Self { from, to })
    }

    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.to.map(|to| to - self.from)
    }

    /// Fraction of the shorter range covered by the intersection, in [0, 1].
    ///
    /// Open-ended ranges count as longer than any bounded one; two open-ended
    /// ranges that overlap cover each other fully.
    #[must_use]
    pub fn overlap_ratio(&self, other: &Self) -> f32 {
        let Some(shared) = self.intersection(other) else {
            return 0.0;
        };
        let shorter = match (self.duration(), other.duration()) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return 1.0,
        };
        let Some(shared) = shared.duration() else {
            return 1.0;
        };
        let shorter_ms = shorter.num_milliseconds().max(1);
        #[allow(clippy::cast_precision_loss)]
        let ratio = shared.num_milliseconds() as f64 / shorter_ms as f64;
        #[allow(clippy::cast_possible_truncation)]
        let ratio = ratio.clamp(0.0, 1.0) as f32;
        ratio
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to {
            Some(to) => write!(f, "[{} → {})", self.from, to),
            None => write!(f, "[{} → ∞)", self.from),
        }
    }
}

/// Inclusive range of scene-order positions, `[start, end]`.
///
/// A single scene at position 4 is `SceneSpan::at(4)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SceneSpan {
    /// First scene-order position (inclusive).
    pub start: i64,
    /// Last scene-order position (inclusive).
    pub end: i64,
}

impl SceneSpan {
    /// Creates a span.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidSceneSpan` if `start > end`.
    pub fn new(start: i64, end: i64) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidSceneSpan { start, end });
        }
        Ok(Self { start, end })
    }

    /// A span covering exactly one scene position.
    #[must_use]
    pub const fn at(position: i64) -> Self {
        Self {
            start: position,
            end: position,
        }
    }

    /// Number of scene positions covered, saturating at `u64::MAX`.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.abs_diff(self.start).saturating_add(1)
    }

    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Number of positions shared by both spans (0 when disjoint).
    #[must_use]
    pub fn shared_len(&self, other: &Self) -> u64 {
        if !self.overlaps(other) {
            return 0;
        }
        self.end
            .min(other.end)
            .abs_diff(self.start.max(other.start))
            .saturating_add(1)
    }

    /// Fraction of the shorter span covered by the shared positions, in [0, 1].
    #[must_use]
    pub fn overlap_ratio(&self, other: &Self) -> f32 {
        let shared = self.shared_len(other);
        if shared == 0 {
            return 0.0;
        }
        let shorter = self.len().min(other.len()).max(1);
        #[allow(clippy::cast_precision_loss)]
        let ratio = shared as f32 / shorter as f32;
        ratio.clamp(0.0, 1.0)
    }
}

impl std::fmt::Display for SceneSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
