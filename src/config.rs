//! Runtime configuration.
//!
//! Every section has compiled defaults and `#[serde(default)]`, so a TOML
//! file only needs the keys it changes:
//!
//! ```toml
//! [engine]
//! alert_threshold = "high"
//! disabled_rules = ["orphaned_finding_sweep"]
//!
//! [job]
//! run_interval_secs = 60
//!
//! [alerts]
//! channel = "story-alerts"
//! ```
//!
//! Resolution order: compiled defaults, then the file, then `PLOTGUARD_*`
//! environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConsistencyError, ConsistencyResult, ValidationError};
use crate::rules::RuleName;
use crate::severity::Severity;

/// Longest backoff after a failed pass when none is configured.
const MAX_DEFAULT_BACKOFF_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rules left out of the catalog.
    pub disabled_rules: Vec<RuleName>,
    /// Minimum severity that is published to the alert bus.
    pub alert_threshold: Severity,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            disabled_rules: Vec::new(),
            alert_threshold: Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Seconds between passes over the enrolled stories.
    pub run_interval_secs: u64,
    /// Upper bound on story scans running at once within a pass.
    pub max_concurrent_scans: usize,
    /// Wait after a pass with failures; defaults to `min(300, interval / 12)`, at least 1s.
    pub failure_backoff_secs: Option<u64>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            run_interval_secs: 30,
            max_concurrent_scans: 4,
            failure_backoff_secs: None,
        }
    }
}

impl JobConfig {
    #[must_use]
    pub const fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_secs)
    }

    #[must_use]
    pub fn failure_backoff(&self) -> Duration {
        let secs = self.failure_backoff_secs.unwrap_or_else(|| {
            (self.run_interval_secs / 12).min(MAX_DEFAULT_BACKOFF_SECS)
        });
        Duration::from_secs(secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Name of the pub/sub topic.
    pub channel: String,
    /// Per-subscriber queue bound; publishes beyond it are dropped for that subscriber.
    pub subscriber_capacity: usize,
    /// Register the logging handler at construction.
    pub install_default_handlers: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            channel: "alerts".to_string(),
            subscriber_capacity: 1024,
            install_default_handlers: true,
        }
    }
}

/// Top-level configuration aggregating all sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotguardConfig {
    pub engine: EngineConfig,
    pub job: JobConfig,
    pub alerts: AlertConfig,
}

impl PlotguardConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// `ConsistencyError::Config` for malformed TOML, `Validation` for bad values.
    pub fn from_toml_str(text: &str) -> ConsistencyResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ConsistencyError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file, applies `PLOTGUARD_*` overrides, and validates.
    ///
    /// # Errors
    ///
    /// `ConsistencyError::Config` if the file cannot be read or parsed,
    /// `Validation` for bad values.
    pub fn load(path: impl AsRef<Path>) -> ConsistencyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConsistencyError::Config {
            message: format!("{}: {e}", path.display()),
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|e| ConsistencyError::Config {
            message: format!("{}: {e}", path.display()),
        })?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Applies overrides from `lookup`, keyed by environment variable name:
    /// `PLOTGUARD_RUN_INTERVAL_SECS`, `PLOTGUARD_MAX_CONCURRENT_SCANS`,
    /// `PLOTGUARD_ALERT_THRESHOLD`, `PLOTGUARD_ALERT_CHANNEL`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for unparseable values.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ValidationError> {
        if let Some(v) = lookup("PLOTGUARD_RUN_INTERVAL_SECS") {
            self.job.run_interval_secs = parse_field("job.run_interval_secs", &v)?;
        }
        if let Some(v) = lookup("PLOTGUARD_MAX_CONCURRENT_SCANS") {
            self.job.max_concurrent_scans = parse_field("job.max_concurrent_scans", &v)?;
        }
        if let Some(v) = lookup("PLOTGUARD_ALERT_THRESHOLD") {
            self.engine.alert_threshold = v.parse()?;
        }
        if let Some(v) = lookup("PLOTGUARD_ALERT_CHANNEL") {
            self.alerts.channel = v;
        }
        Ok(())
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` naming the offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.job.run_interval_secs == 0 {
            return Err(invalid("job.run_interval_secs", "must be greater than 0"));
        }
        if self.job.max_concurrent_scans == 0 {
            return Err(invalid("job.max_concurrent_scans", "must be greater than 0"));
        }
        if self.job.failure_backoff_secs == Some(0) {
            return Err(invalid("job.failure_backoff_secs", "must be greater than 0"));
        }
        if self.alerts.channel.trim().is_empty() {
            return Err(invalid("alerts.channel", "must not be empty"));
        }
        if self.alerts.subscriber_capacity == 0 {
            return Err(invalid("alerts.subscriber_capacity", "must be greater than 0"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ValidationError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(field, &e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PlotguardConfig::default();
        assert_eq!(cfg.engine.alert_threshold, Severity::Critical);
        assert_eq!(cfg.job.run_interval(), Duration::from_secs(30));
        assert_eq!(cfg.job.failure_backoff(), Duration::from_secs(2));
        assert_eq!(cfg.alerts.channel, "alerts");
        assert!(cfg.alerts.install_default_handlers);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn backoff_is_capped_and_floored() {
        let long = JobConfig {
            run_interval_secs: 86_400,
            ..JobConfig::default()
        };
        assert_eq!(long.failure_backoff(), Duration::from_secs(300));
        let short = JobConfig {
            run_interval_secs: 1,
            ..JobConfig::default()
        };
        assert_eq!(short.failure_backoff(), Duration::from_secs(1));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg = PlotguardConfig::from_toml_str(
            r#"
            [engine]
            alert_threshold = "high"
            disabled_rules = ["orphaned_finding_sweep"]

            [job]
            run_interval_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(cfg.engine.alert_threshold, Severity::High);
        assert_eq!(cfg.engine.disabled_rules, vec![RuleName::OrphanedFindingSweep]);
        assert_eq!(cfg.job.run_interval_secs, 60);
        assert_eq!(cfg.job.max_concurrent_scans, 4);
        assert_eq!(cfg.alerts, AlertConfig::default());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = PlotguardConfig::from_toml_str("[job]\nrun_interval_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("job.run_interval_secs"));
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = PlotguardConfig::from_toml_str("[job\n").unwrap_err();
        assert!(matches!(err, ConsistencyError::Config { .. }));
    }

    #[test]
    fn overrides_apply_on_top() {
        let vars: HashMap<&str, &str> = [
            ("PLOTGUARD_RUN_INTERVAL_SECS", "5"),
            ("PLOTGUARD_ALERT_THRESHOLD", "medium"),
            ("PLOTGUARD_ALERT_CHANNEL", "ops"),
        ]
        .into_iter()
        .collect();
        let mut cfg = PlotguardConfig::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(cfg.job.run_interval_secs, 5);
        assert_eq!(cfg.engine.alert_threshold, Severity::Medium);
        assert_eq!(cfg.alerts.channel, "ops");

        let err = cfg
            .apply_overrides(|k| (k == "PLOTGUARD_MAX_CONCURRENT_SCANS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("job.max_concurrent_scans"));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[alerts]\nchannel = \"story-alerts\"\nsubscriber_capacity = 8").unwrap();
        let cfg = PlotguardConfig::load(file.path()).unwrap();
        assert_eq!(cfg.alerts.subscriber_capacity, 8);
        assert!(!cfg.alerts.channel.is_empty());
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = PlotguardConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConsistencyError::Config { .. }));
    }
}
