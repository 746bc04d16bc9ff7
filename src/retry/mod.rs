//! Retry decisions, backoff and retry side effects.
//!
//! The manager turns a [`ClassificationResult`] plus the item's current
//! retry counters into a [`RetryDecision`]. Applying the decision to the
//! label store is a separate, explicit step ([`RetryManager::execute_retry`]
//! or [`RetryManager::mark_as_failed`]).
//!
//! # Architecture
//!
//! ```text
//! ClassificationResult ──┐
//!                        ├──should_retry──> RetryDecision
//! LabelAnalysis ─────────┘                      │
//!                                               ▼
//!                        execute_retry / mark_as_failed ──> SpecStateMachine
//! ```
//!
//! # Example
//!
//! ```
//! use specloop::retry::calculate_exponential_backoff;
//!
//! let delays: Vec<u64> = (1..=5).map(|n| calculate_exponential_backoff(n, 60, 300)).collect();
//! assert_eq!(delays, vec![60, 120, 240, 300, 300]);
//! ```

pub mod cooldown;

pub use cooldown::{
    check_cooldown, check_cooldown_at, CooldownConfig, CooldownStatus, CooldownWindow,
};

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::classifier::ClassificationResult;
use crate::error::{PipelineError, Result};
use crate::state_machine::{
    failure_label, retry_label, FailureType, LabelAnalysis, RetryCategory, SpecState,
    SpecStateMachine, StateTransition, MAX_RETRIES,
};
use crate::testing::LabelStore;

// ============================================================================
// Backoff Constants and Calculation
// ============================================================================

/// Default delay before the first retry, in seconds.
pub const DEFAULT_BASE_DELAY_SECS: u64 = 60;

/// Default upper bound on the backoff delay, in seconds.
pub const DEFAULT_MAX_DELAY_SECS: u64 = 300;

/// Default fraction of the delay added as random jitter.
pub const DEFAULT_JITTER_FRACTION: f64 = 0.25;

/// Exponential backoff for the `retry_count`-th retry (1-indexed).
///
/// `min(base × 2^(n−1), max)`. A count of 0 is treated as 1.
#[must_use]
pub fn calculate_exponential_backoff(retry_count: u32, base_secs: u64, max_secs: u64) -> u64 {
    let exponent = retry_count.saturating_sub(1);
    let multiplier = 2u64.checked_pow(exponent).unwrap_or(u64::MAX);
    base_secs.saturating_mul(multiplier).min(max_secs)
}

// ============================================================================
// Configuration
// ============================================================================

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Delay before the first retry, in seconds
    pub base_delay_seconds: u64,
    /// Upper bound on the exponential delay, in seconds
    pub max_delay_seconds: u64,
    /// Jitter added on top of the delay, as a fraction of it. 0 disables jitter.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: DEFAULT_BASE_DELAY_SECS,
            max_delay_seconds: DEFAULT_MAX_DELAY_SECS,
            jitter_fraction: DEFAULT_JITTER_FRACTION,
        }
    }
}

impl RetryConfig {
    /// Set the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, seconds: u64) -> Self {
        self.base_delay_seconds = seconds;
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, seconds: u64) -> Self {
        self.max_delay_seconds = seconds;
        self
    }

    /// Set the jitter fraction.
    #[must_use]
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    /// Backoff delay without jitter.
    #[must_use]
    pub fn backoff(&self, retry_count: u32) -> u64 {
        calculate_exponential_backoff(retry_count, self.base_delay_seconds, self.max_delay_seconds)
    }
}

// ============================================================================
// Decision Types
// ============================================================================

/// Input to a retry decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryContext {
    /// Work item identifier
    pub item: String,
    /// Classification of the failed run
    pub classification: ClassificationResult,
    /// Current spec retry counter
    pub spec_retry_count: u32,
    /// Current infra retry counter
    pub infra_retry_count: u32,
}

impl RetryContext {
    /// Build a context with zeroed counters.
    pub fn new(item: impl Into<String>, classification: ClassificationResult) -> Self {
        Self {
            item: item.into(),
            classification,
            spec_retry_count: 0,
            infra_retry_count: 0,
        }
    }

    /// Take the counters from a label analysis.
    #[must_use]
    pub fn with_analysis(mut self, analysis: &LabelAnalysis) -> Self {
        self.spec_retry_count = analysis.spec_retry_count;
        self.infra_retry_count = analysis.infra_retry_count;
        self
    }

    /// Set one counter.
    #[must_use]
    pub fn with_retry_count(mut self, category: RetryCategory, count: u32) -> Self {
        match category {
            RetryCategory::Spec => self.spec_retry_count = count,
            RetryCategory::Infra => self.infra_retry_count = count,
        }
        self
    }

    /// Counter of the category this failure is charged to.
    #[must_use]
    pub fn current_count(&self) -> u32 {
        match self.classification.retry_category() {
            RetryCategory::Spec => self.spec_retry_count,
            RetryCategory::Infra => self.infra_retry_count,
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryDecision {
    /// Whether to schedule another attempt
    pub should_retry: bool,
    /// Budget the failure is charged to
    pub category: RetryCategory,
    /// Counter value after this decision
    pub new_retry_count: u32,
    /// Wait before the next attempt, in seconds (0 when not retrying)
    pub delay_seconds: u64,
    /// Human-readable explanation
    pub reason: String,
    /// The budget was already spent
    pub max_retries_reached: bool,
}

impl RetryDecision {
    fn no_retry(category: RetryCategory, count: u32, reason: String, max_reached: bool) -> Self {
        Self {
            should_retry: false,
            category,
            new_retry_count: count,
            delay_seconds: 0,
            reason,
            max_retries_reached: max_reached,
        }
    }
}

// ============================================================================
// Retry Manager
// ============================================================================

/// Decides whether and when a failed item is retried.
///
/// Jitter comes from an owned, seedable [`fastrand::Rng`].
#[derive(Debug)]
pub struct RetryManager {
    config: RetryConfig,
    rng: Mutex<fastrand::Rng>,
}

impl RetryManager {
    /// Create a manager with an entropy-seeded jitter source.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    /// Use a fixed jitter seed.
    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
            ..self
        }
    }

    /// The backoff configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide whether to retry.
    #[must_use]
    pub fn should_retry(&self, context: &RetryContext) -> RetryDecision {
        let classification = &context.classification;
        let category = classification.retry_category();
        let count = context.current_count();

        if !classification.is_retryable {
            let decision = RetryDecision::no_retry(
                category,
                count,
                format!(
                    "{} is not retryable: {}",
                    classification.error_type, classification.message
                ),
                false,
            );
            debug!(item = %context.item, error_type = %classification.error_type, "Not retrying");
            return decision;
        }

        if count >= MAX_RETRIES {
            let decision = RetryDecision::no_retry(
                category,
                count,
                format!("Max retries reached ({}/{} {} retries)", count, MAX_RETRIES, category),
                true,
            );
            info!(item = %context.item, category = %category, count, "Retry budget exhausted");
            return decision;
        }

        let new_count = count + 1;
        let base = self.config.backoff(new_count);
        let delay = base + self.jitter(base);

        debug!(
            item = %context.item,
            category = %category,
            retry = new_count,
            delay_seconds = delay,
            "Scheduling retry"
        );

        RetryDecision {
            should_retry: true,
            category,
            new_retry_count: new_count,
            delay_seconds: delay,
            reason: format!(
                "{} ({} retry {}/{}), retrying in {}s",
                classification.error_type, category, new_count, MAX_RETRIES, delay
            ),
            max_retries_reached: false,
        }
    }

    /// Random jitter in `[0, delay × fraction]`, whole seconds.
    fn jitter(&self, delay: u64) -> u64 {
        let fraction = self.config.jitter_fraction;
        if fraction <= 0.0 || delay == 0 {
            return 0;
        }
        let sample = self.rng.lock().unwrap_or_else(|e| e.into_inner()).f64();
        (delay as f64 * fraction * sample).round() as u64
    }

    /// Charge a retry and put the item back in the queue.
    ///
    /// Increments the category counter, then transitions to `Queued`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PartialMutation`] if the counter was bumped
    /// but the transition failed; the item can be recovered with
    /// [`SpecStateMachine::force_transition_to`].
    pub async fn execute_retry<S: LabelStore>(
        &self,
        machine: &SpecStateMachine<S>,
        item: &str,
        category: RetryCategory,
    ) -> Result<StateTransition> {
        let count = machine.increment_retry(item, category).await?;

        let transition = machine
            .transition_to(item, SpecState::Queued)
            .await
            .map_err(|e| partial(item, retry_label(category, count), SpecState::Queued, e))?;

        info!(item, category = %category, count, "Retry queued");
        Ok(transition)
    }

    /// Record the failure type and move the item to `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PartialMutation`] if the failure label was
    /// written but the transition failed.
    pub async fn mark_as_failed<S: LabelStore>(
        &self,
        machine: &SpecStateMachine<S>,
        item: &str,
        failure_type: FailureType,
    ) -> Result<StateTransition> {
        machine.set_failure_type(item, failure_type).await?;

        let transition = machine
            .transition_to(item, SpecState::Failed)
            .await
            .map_err(|e| partial(item, failure_label(failure_type), SpecState::Failed, e))?;

        warn!(item, failure_type = %failure_type, "Spec marked as failed");
        Ok(transition)
    }
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

fn partial(item: &str, completed: String, to: SpecState, source: PipelineError) -> PipelineError {
    warn!(
        item,
        completed = %completed,
        to = %to,
        error = %source,
        "Second step of label mutation failed"
    );
    PipelineError::PartialMutation {
        item: item.to_string(),
        completed,
        failed: format!("transition to {}", to),
        message: source.to_string(),
    }
}
