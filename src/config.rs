//! Configuration management for specloop.
//!
//! Settings live in `<project>/.specloop/settings.json`. Every field has a
//! default, so a missing file or a partial file is fine.
//!
//! ```json
//! {
//!   "retry": { "baseDelaySeconds": 60, "maxDelaySeconds": 300, "jitterFraction": 0.25 },
//!   "scheduler": { "maxRetries": 3, "retryDelayMinutes": 30, "batchSize": 1 },
//!   "health": { "failureRateThreshold": 50, "minSamples": 5 },
//!   "cooldown": { "standardMinutes": 30 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::health::HealthThresholds;
use crate::retry::{CooldownConfig, RetryConfig};
use crate::scheduler::SchedulerConfig;
use crate::state_machine::MAX_RETRIES;

/// Directory holding specloop's project files.
pub const PROJECT_DIR_NAME: &str = ".specloop";

/// Settings filename inside [`PROJECT_DIR_NAME`].
pub const SETTINGS_FILENAME: &str = "settings.json";

/// Project configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
    pub health: HealthThresholds,
    pub cooldown: CooldownConfig,
}

impl PipelineConfig {
    /// Load configuration from a project directory.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the file exists but cannot be
    /// read or parsed.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let settings_path = Self::settings_path(project_dir);

        if !settings_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&settings_path).map_err(|e| {
            PipelineError::config_with_path(
                format!("Failed to read settings: {}", e),
                settings_path.clone(),
            )
        })?;
        serde_json::from_str(&content).map_err(|e| {
            PipelineError::config_with_path(format!("Invalid settings JSON: {}", e), settings_path)
        })
    }

    /// Write configuration to a project directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, project_dir: &Path) -> Result<()> {
        let settings_path = Self::settings_path(project_dir);
        if let Some(parent) = settings_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&settings_path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Get the settings.json path for a project
    pub fn settings_path(project_dir: &Path) -> PathBuf {
        project_dir.join(PROJECT_DIR_NAME).join(SETTINGS_FILENAME)
    }

    /// Check the configuration for values the pipeline cannot work with.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::new();

        let retry = &self.retry;
        if !(0.0..=1.0).contains(&retry.jitter_fraction) || retry.jitter_fraction.is_nan() {
            report.error(
                "retry.jitterFraction",
                format!("must be within [0, 1], got {}", retry.jitter_fraction),
            );
        }
        if retry.base_delay_seconds == 0 {
            report.error("retry.baseDelaySeconds", "must be greater than 0");
        }
        if retry.base_delay_seconds > retry.max_delay_seconds {
            report.error(
                "retry.maxDelaySeconds",
                format!(
                    "must be at least baseDelaySeconds ({} < {})",
                    retry.max_delay_seconds, retry.base_delay_seconds
                ),
            );
        }

        let scheduler = &self.scheduler;
        if scheduler.max_retries == 0 {
            report.error("scheduler.maxRetries", "must be greater than 0");
        } else if scheduler.max_retries > MAX_RETRIES + 1 {
            report.warning(
                "scheduler.maxRetries",
                format!(
                    "retry labels saturate at {}; items will never reach {} attempts",
                    MAX_RETRIES, scheduler.max_retries
                ),
            );
        }
        if scheduler.batch_size == 0 {
            report.error("scheduler.batchSize", "must be greater than 0");
        }

        let health = &self.health;
        if health.failure_rate_threshold == 0 || health.failure_rate_threshold > 100 {
            report.error(
                "health.failureRateThreshold",
                format!("must be within 1..=100, got {}", health.failure_rate_threshold),
            );
        }
        if health.min_samples == 0 {
            report.error("health.minSamples", "must be greater than 0");
        }
        if health.retry_percentage_threshold == 0 || health.retry_percentage_threshold > 100 {
            report.error(
                "health.retryPercentageThreshold",
                format!("must be within 1..=100, got {}", health.retry_percentage_threshold),
            );
        }
        if health.min_retry_issues == 0 {
            report.error("health.minRetryIssues", "must be greater than 0");
        }
        if health.window_hours == 0 {
            report.error("health.windowHours", "must be greater than 0");
        }

        let cooldown = &self.cooldown;
        if cooldown.stuck_escalation_minutes == 0 {
            report.error("cooldown.stuckEscalationMinutes", "must be greater than 0");
        }
        if cooldown.infra_error_minutes > cooldown.standard_minutes {
            report.warning(
                "cooldown.infraErrorMinutes",
                "infrastructure cooldown is longer than the standard window",
            );
        }

        report
    }

    /// Validate and turn the first error into a typed error.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for the first problem found.
    pub fn validated(self) -> Result<Self> {
        match self.validate().problems.into_iter().find(|p| p.is_error) {
            Some(problem) => Err(PipelineError::InvalidConfig {
                field: problem.field,
                reason: problem.message,
            }),
            None => Ok(self),
        }
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigProblem {
    /// Dotted JSON path of the field
    pub field: String,
    pub message: String,
    /// Errors make the configuration unusable; warnings do not
    pub is_error: bool,
}

/// Result of configuration validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub problems: Vec<ConfigProblem>,
}

impl ValidationReport {
    /// Create a new empty validation report.
    ///
    /// An empty report is considered valid.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.problems.push(ConfigProblem {
            field: field.to_string(),
            message: message.into(),
            is_error: true,
        });
    }

    fn warning(&mut self, field: &str, message: impl Into<String>) {
        self.problems.push(ConfigProblem {
            field: field.to_string(),
            message: message.into(),
            is_error: false,
        });
    }

    /// Returns true if there are no errors. Warnings do not affect validity.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.problems.iter().any(|p| p.is_error)
    }

    /// Errors only.
    pub fn errors(&self) -> impl Iterator<Item = &ConfigProblem> {
        self.problems.iter().filter(|p| p.is_error)
    }

    /// Warnings only.
    pub fn warnings(&self) -> impl Iterator<Item = &ConfigProblem> {
        self.problems.iter().filter(|p| !p.is_error)
    }

    /// Generate a human-readable summary of the validation result.
    #[must_use]
    pub fn summary(&self) -> String {
        let errors = self.errors().count();
        let warnings = self.warnings().count();
        match (errors, warnings) {
            (0, 0) => "Configuration is valid.".to_string(),
            (0, w) => format!("Configuration is valid with {} warning(s).", w),
            (e, _) => format!("Configuration is invalid with {} error(s).", e),
        }
    }
}
