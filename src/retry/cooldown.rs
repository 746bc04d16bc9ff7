//! Cooldown windows.
//!
//! An item (or the whole queue) stays ineligible until its last activity is
//! older than the window that applies to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::testing::{minutes_between, Clock};
use crate::Result;

/// Named cooldown windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CooldownWindow {
    /// Default wait between attempts
    Standard,
    /// Wait after a published change was rejected
    FailedPr,
    /// Short wait after an environment failure
    InfraError,
    /// How long an in-progress item may sit idle before escalation
    StuckEscalation,
}

impl CooldownWindow {
    /// Built-in length of the window in minutes.
    #[must_use]
    pub fn default_minutes(&self) -> u32 {
        match self {
            Self::Standard => 30,
            Self::FailedPr => 90,
            Self::InfraError => 10,
            Self::StuckEscalation => 15,
        }
    }
}

impl fmt::Display for CooldownWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Standard => "standard",
            Self::FailedPr => "failed-pr",
            Self::InfraError => "infra-error",
            Self::StuckEscalation => "stuck-escalation",
        };
        write!(f, "{}", s)
    }
}

/// Configured window lengths, in minutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CooldownConfig {
    pub standard_minutes: u32,
    pub failed_pr_minutes: u32,
    pub infra_error_minutes: u32,
    pub stuck_escalation_minutes: u32,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            standard_minutes: CooldownWindow::Standard.default_minutes(),
            failed_pr_minutes: CooldownWindow::FailedPr.default_minutes(),
            infra_error_minutes: CooldownWindow::InfraError.default_minutes(),
            stuck_escalation_minutes: CooldownWindow::StuckEscalation.default_minutes(),
        }
    }
}

impl CooldownConfig {
    /// Configured length of a window.
    #[must_use]
    pub fn minutes(&self, window: CooldownWindow) -> u32 {
        match window {
            CooldownWindow::Standard => self.standard_minutes,
            CooldownWindow::FailedPr => self.failed_pr_minutes,
            CooldownWindow::InfraError => self.infra_error_minutes,
            CooldownWindow::StuckEscalation => self.stuck_escalation_minutes,
        }
    }
}

/// Result of a cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownStatus {
    /// Still inside the window
    pub is_in_cooldown: bool,
    /// Whole minutes left, rounded up; 0 once the window has passed
    pub remaining_minutes: u64,
    /// Minutes since the last activity
    pub age_minutes: f64,
}

/// Check a window against the time since `last_activity`.
#[must_use]
pub fn check_cooldown(
    last_activity: DateTime<Utc>,
    window_minutes: f64,
    now: DateTime<Utc>,
) -> CooldownStatus {
    status_for_age(minutes_between(last_activity, now), window_minutes)
}

/// Check a window against an ISO-8601 activity timestamp.
///
/// # Errors
///
/// Returns [`crate::PipelineError::MalformedTimestamp`] if the timestamp
/// does not parse.
pub fn check_cooldown_at(
    clock: &impl Clock,
    last_activity: &str,
    window_minutes: f64,
) -> Result<CooldownStatus> {
    Ok(status_for_age(clock.age_minutes(last_activity)?, window_minutes))
}

fn status_for_age(age_minutes: f64, window_minutes: f64) -> CooldownStatus {
    let remaining = (window_minutes - age_minutes).ceil().max(0.0);
    CooldownStatus {
        is_in_cooldown: age_minutes < window_minutes,
        remaining_minutes: remaining as u64,
        age_minutes,
    }
}
