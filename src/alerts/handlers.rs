//! Alert handlers.

use crate::error::ConsistencyResult;
use crate::severity::Severity;

use super::AlertMessage;

/// Name the default logging handler registers under.
pub const LOGGING_HANDLER: &str = "log_critical_contradictions";

/// Callback run by the bus listener for every received alert.
///
/// A returned error (or a panic) is logged and isolated; it never stops the
/// listener or the other handlers.
pub trait AlertHandler: Send + Sync {
    fn handle(&self, message: &AlertMessage) -> ConsistencyResult<()>;
}

impl<F> AlertHandler for F
where
    F: Fn(&AlertMessage) -> ConsistencyResult<()> + Send + Sync,
{
    fn handle(&self, message: &AlertMessage) -> ConsistencyResult<()> {
        self(message)
    }
}

/// Logs alerts at or above `min_severity` through `tracing`.
#[derive(Debug, Clone, Copy)]
pub struct LoggingHandler {
    min_severity: Severity,
}

impl Default for LoggingHandler {
    fn default() -> Self {
        Self {
            min_severity: Severity::Critical,
        }
    }
}

impl LoggingHandler {
    #[must_use]
    pub const fn new(min_severity: Severity) -> Self {
        Self { min_severity }
    }
}

impl AlertHandler for LoggingHandler {
    fn handle(&self, message: &AlertMessage) -> ConsistencyResult<()> {
        let alert = &message.alert;
        if alert.severity >= self.min_severity {
            tracing::warn!(
                story_id = %alert.story_id,
                from_fact = %alert.from_fact_id,
                to_fact = %alert.to_fact_id,
                severity = %alert.severity,
                reason = %alert.reason,
                "contradiction detected"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::alerts::ContradictionAlert;
    use crate::ids::{FactId, StoryId};

    fn message(severity: Severity) -> AlertMessage {
        AlertMessage::stamp(ContradictionAlert {
            story_id: StoryId::new("s").unwrap(),
            from_fact_id: FactId::new(),
            to_fact_id: FactId::new(),
            severity,
            reason: "r".to_string(),
            detected_at: Utc::now(),
        })
    }

    #[test]
    fn closures_are_handlers() {
        let handler = |m: &AlertMessage| -> ConsistencyResult<()> {
            assert_eq!(m.alert_type, crate::alerts::ALERT_TYPE);
            Ok(())
        };
        handler.handle(&message(Severity::High)).unwrap();
    }

    #[test]
    fn logging_handler_never_fails() {
        let handler = LoggingHandler::default();
        assert!(handler.handle(&message(Severity::Critical)).is_ok());
        assert!(handler.handle(&message(Severity::Low)).is_ok());
    }
}
