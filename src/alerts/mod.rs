//! Alert fan-out.
//!
//! Critical findings leave the scan through [`AlertPublisher::publish`], are
//! serialized onto a named [`AlertChannel`], and are picked up by the
//! [`AlertBus`] listener thread, which runs every registered handler in turn.
//! Publishing never blocks on handlers and never fails the caller.

mod bus;
mod channel;
mod handlers;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::ContradictionEdge;
use crate::ids::{FactId, StoryId};
use crate::severity::Severity;

pub use bus::{AlertBus, AlertStats};
pub use channel::{AlertChannel, AlertSubscription, Fanout};
pub use handlers::{AlertHandler, LoggingHandler, LOGGING_HANDLER};

/// Fixed tag stamped on every published contradiction alert.
pub const ALERT_TYPE: &str = "contradiction_detected";

/// A contradiction worth telling someone about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionAlert {
    pub story_id: StoryId,
    pub from_fact_id: FactId,
    pub to_fact_id: FactId,
    pub severity: Severity,
    pub reason: String,
    pub detected_at: DateTime<Utc>,
}

impl From<&ContradictionEdge> for ContradictionAlert {
    fn from(edge: &ContradictionEdge) -> Self {
        Self {
            story_id: edge.story_id.clone(),
            from_fact_id: edge.from_fact,
            to_fact_id: edge.to_fact,
            severity: edge.severity,
            reason: edge.reason.clone(),
            detected_at: edge.detected_at,
        }
    }
}

/// Wire form of an alert: the alert plus its type tag and publish timestamp.
///
/// Serializes flat, e.g.
/// `{"story_id":..,"from_fact_id":..,"to_fact_id":..,"severity":"critical",
/// "reason":..,"detected_at":"2026-..Z","alert_type":"contradiction_detected","timestamp":..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    #[serde(flatten)]
    pub alert: ContradictionAlert,
    pub alert_type: String,
    pub timestamp: DateTime<Utc>,
}

impl AlertMessage {
    #[must_use]
    pub fn stamp(alert: ContradictionAlert) -> Self {
        Self {
            alert,
            alert_type: ALERT_TYPE.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Sink the engine emits alerts into.
///
/// Implementations must not block for long and must not fail the caller.
pub trait AlertPublisher: Send + Sync {
    fn publish(&self, alert: ContradictionAlert);
}

impl<T: AlertPublisher + ?Sized> AlertPublisher for std::sync::Arc<T> {
    fn publish(&self, alert: ContradictionAlert) {
        (**self).publish(alert);
    }
}
