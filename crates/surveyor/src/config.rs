//! Engine Configuration
//!
//! Every wait budget the engine uses, in one typed structure. Loaded from
//! YAML (durations in milliseconds) or built in code; missing keys fall
//! back to the named [`PollPolicy`] presets.
//!
//! ```yaml
//! refresh: reload
//! inbox:
//!   max_attempts: 12
//!   interval_ms: 5000
//!   per_attempt_timeout_ms: 30000
//! log:
//!   filter: surveyor=debug
//!   json: true
//! ```

use crate::poll::PollPolicy;
use crate::result::{SurveyorError, SurveyorResult};
use crate::surface::RefreshMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "surveyor=info";

/// Logging settings consumed by [`crate::telemetry::init_tracing`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence when set
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Set the filter
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Enable or disable JSON output
    #[must_use]
    pub const fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Wait budgets and refresh behaviour for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Element and question lookup
    pub existence: PollPolicy,
    /// Wait after every mutation
    pub post_condition: PollPolicy,
    /// Stepper stage transitions
    pub stepper: PollPolicy,
    /// Review / approval status
    pub review: PollPolicy,
    /// External inbox delivery
    pub inbox: PollPolicy,
    /// Embedded widget handshake, per trigger click
    pub handshake: PollPolicy,
    /// Loading indicator disappearance
    pub loading_mask: PollPolicy,
    /// Text cell convergence
    pub text_convergence: PollPolicy,
    /// How polls observe backend changes
    pub refresh: RefreshMode,
    /// Logging
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            existence: PollPolicy::existence(),
            post_condition: PollPolicy::post_condition(),
            stepper: PollPolicy::stepper(),
            review: PollPolicy::review(),
            inbox: PollPolicy::inbox(),
            handshake: PollPolicy::handshake(),
            loading_mask: PollPolicy::loading_mask(),
            text_convergence: PollPolicy::text_convergence(),
            refresh: RefreshMode::default(),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate YAML
    ///
    /// # Errors
    ///
    /// [`SurveyorError::Yaml`] for malformed input,
    /// [`SurveyorError::Config`] for invalid values.
    pub fn from_yaml_str(yaml: &str) -> SurveyorResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    ///
    /// # Errors
    ///
    /// I/O, parse and validation errors.
    pub fn from_file(path: impl AsRef<Path>) -> SurveyorResult<Self> {
        let yaml = fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&yaml)
    }

    /// Serialize to YAML
    ///
    /// # Errors
    ///
    /// [`SurveyorError::Yaml`] on serialization failure.
    pub fn to_yaml(&self) -> SurveyorResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Named policies, in declaration order
    #[must_use]
    pub fn policies(&self) -> [(&'static str, &PollPolicy); 8] {
        [
            ("existence", &self.existence),
            ("post_condition", &self.post_condition),
            ("stepper", &self.stepper),
            ("review", &self.review),
            ("inbox", &self.inbox),
            ("handshake", &self.handshake),
            ("loading_mask", &self.loading_mask),
            ("text_convergence", &self.text_convergence),
        ]
    }

    /// Check every policy and the log filter
    ///
    /// # Errors
    ///
    /// [`SurveyorError::Config`] naming the offending key.
    pub fn validate(&self) -> SurveyorResult<()> {
        for (name, policy) in self.policies() {
            policy
                .validate()
                .map_err(|e| SurveyorError::config(format!("{name}: {e}")))?;
        }
        if self.log.filter.trim().is_empty() {
            return Err(SurveyorError::config("log.filter must not be empty"));
        }
        Ok(())
    }

    /// Set the refresh mode
    #[must_use]
    pub const fn with_refresh(mut self, refresh: RefreshMode) -> Self {
        self.refresh = refresh;
        self
    }

    /// Set the inbox policy
    #[must_use]
    pub const fn with_inbox(mut self, policy: PollPolicy) -> Self {
        self.inbox = policy;
        self
    }

    /// Set the stepper policy
    #[must_use]
    pub const fn with_stepper(mut self, policy: PollPolicy) -> Self {
        self.stepper = policy;
        self
    }

    /// Set the existence policy
    #[must_use]
    pub const fn with_existence(mut self, policy: PollPolicy) -> Self {
        self.existence = policy;
        self
    }

    /// Set the logging settings
    #[must_use]
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    mod load_tests {
        use super::*;

        #[test]
        fn test_empty_document_yields_defaults() {
            let config = EngineConfig::from_yaml_str("{}").unwrap();
            assert_eq!(config, EngineConfig::default());
            assert_eq!(config.inbox.max_attempts, 10);
            assert_eq!(config.refresh, RefreshMode::Reload);
        }

        #[test]
        fn test_partial_override_in_milliseconds() {
            let yaml = "refresh: in_place\ninbox:\n  max_attempts: 12\n  interval_ms: 5000\n  per_attempt_timeout_ms: 30000\nlog:\n  json: true\n";
            let config = EngineConfig::from_yaml_str(yaml).unwrap();
            assert_eq!(config.refresh, RefreshMode::InPlace);
            assert_eq!(config.inbox.max_attempts, 12);
            assert_eq!(config.inbox.interval, Duration::from_secs(5));
            assert!(config.log.json);
            assert_eq!(config.log.filter, DEFAULT_LOG_FILTER);
            assert_eq!(config.stepper, PollPolicy::stepper());
        }

        #[test]
        fn test_invalid_policy_is_rejected_with_key() {
            let yaml = "review:\n  max_attempts: 0\n  interval_ms: 100\n  per_attempt_timeout_ms: 100\n";
            let err = EngineConfig::from_yaml_str(yaml).unwrap_err();
            assert!(matches!(err, SurveyorError::Config { .. }));
            assert!(err.to_string().contains("review"));
        }

        #[test]
        fn test_malformed_yaml() {
            let err = EngineConfig::from_yaml_str("inbox: [1, 2").unwrap_err();
            assert!(matches!(err, SurveyorError::Yaml(_)));
        }

        #[test]
        fn test_from_file_and_back() {
            let config = EngineConfig::default().with_inbox(PollPolicy::inbox().with_max_attempts(3));
            let mut file = tempfile::NamedTempFile::new().unwrap();
            file.write_all(config.to_yaml().unwrap().as_bytes()).unwrap();
            let loaded = EngineConfig::from_file(file.path()).unwrap();
            assert_eq!(loaded, config);
            assert!(matches!(
                EngineConfig::from_file("/nonexistent/surveyor.yaml"),
                Err(SurveyorError::Io(_))
            ));
        }
    }

    mod validate_tests {
        use super::*;

        #[test]
        fn test_blank_filter_rejected() {
            let config = EngineConfig::default().with_log(LogConfig::default().with_filter("  "));
            assert!(config.validate().is_err());
        }

        #[test]
        fn test_policies_are_named_in_order() {
            let config = EngineConfig::default();
            let names: Vec<_> = config.policies().iter().map(|(n, _)| *n).collect();
            assert_eq!(names.first(), Some(&"existence"));
            assert_eq!(names.len(), 8);
        }
    }
}
