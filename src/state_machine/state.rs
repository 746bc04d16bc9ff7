//! Lifecycle state types and the transition table.
//!
//! This module contains the core state machine types for work items:
//! - [`SpecState`] - Lifecycle state carried by a state label
//! - [`RetryCategory`] - Which retry budget a failure draws from
//! - [`FailureType`] - Terminal failure classification
//! - [`StateTransition`] - Record of an applied transition

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Spec State
// ============================================================================

/// Lifecycle state of a work item.
///
/// A record with no state label has not entered the pipeline yet; that case
/// is modelled as `Option<SpecState>::None` rather than a fifth variant.
///
/// # State Transitions
///
/// - none -> `Queued`: item discovered as pending work
/// - `Queued` -> `InProgress`: item dispatched to the agent
/// - `InProgress` -> `Completed`: agent produced the implementation
/// - `InProgress` -> `Failed`: retry budget exhausted or fatal error
/// - `InProgress` -> `Queued`: retry scheduled
/// - `Failed` -> `Queued`: operator requeued the item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpecState {
    /// Waiting to be selected
    Queued,
    /// Dispatched to the agent
    InProgress,
    /// Implementation landed
    Completed,
    /// Terminally failed
    Failed,
}

impl SpecState {
    /// All states, in lifecycle order.
    pub const ALL: [SpecState; 4] = [
        SpecState::Queued,
        SpecState::InProgress,
        SpecState::Completed,
        SpecState::Failed,
    ];

    /// Tag suffix used in the state label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecState::Queued => "queued",
            SpecState::InProgress => "in-progress",
            SpecState::Completed => "completed",
            SpecState::Failed => "failed",
        }
    }

    /// Check if this state can transition to the target state.
    ///
    /// # Example
    ///
    /// ```
    /// use specloop::state_machine::SpecState;
    ///
    /// assert!(SpecState::Queued.can_transition_to(SpecState::InProgress));
    /// assert!(!SpecState::Completed.can_transition_to(SpecState::Queued));
    /// ```
    #[must_use]
    pub fn can_transition_to(&self, target: SpecState) -> bool {
        use SpecState::*;
        matches!(
            (self, target),
            (Queued, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Queued)
                | (Failed, Queued)
        )
    }

    /// Check if this state represents work currently held by an agent.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, SpecState::InProgress)
    }

    /// Check if this state is terminal for the automated pipeline.
    ///
    /// `Failed` counts as terminal even though an operator may requeue it.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SpecState::Completed | SpecState::Failed)
    }
}

impl fmt::Display for SpecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SpecState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Ok(SpecState::Queued),
            "in-progress" | "in_progress" | "inprogress" => Ok(SpecState::InProgress),
            "completed" => Ok(SpecState::Completed),
            "failed" => Ok(SpecState::Failed),
            other => Err(format!(
                "unknown state '{}' (expected queued, in-progress, completed or failed)",
                other
            )),
        }
    }
}

/// Check a transition against the fixed transition table.
///
/// `from = None` (no state label yet) only permits entering `Queued`.
///
/// # Example
///
/// ```
/// use specloop::state_machine::{is_valid_transition, SpecState};
///
/// assert!(is_valid_transition(None, SpecState::Queued));
/// assert!(!is_valid_transition(None, SpecState::InProgress));
/// assert!(is_valid_transition(Some(SpecState::Failed), SpecState::Queued));
/// ```
#[must_use]
pub fn is_valid_transition(from: Option<SpecState>, to: SpecState) -> bool {
    match from {
        None => to == SpecState::Queued,
        Some(from) => from.can_transition_to(to),
    }
}

// ============================================================================
// Retry Category
// ============================================================================

/// Independent retry budget a failure is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryCategory {
    /// The implementation itself needs another attempt
    Spec,
    /// The environment failed; the implementation may be fine
    Infra,
}

impl RetryCategory {
    /// Pick the budget from the classifier's infrastructure flag.
    #[must_use]
    pub fn from_infrastructure(is_infrastructure: bool) -> Self {
        if is_infrastructure {
            RetryCategory::Infra
        } else {
            RetryCategory::Spec
        }
    }

    /// Tag segment used in the retry label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryCategory::Spec => "spec",
            RetryCategory::Infra => "infra",
        }
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Failure Type
// ============================================================================

/// Why a work item ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureType {
    /// The spec could not be implemented
    Spec,
    /// The implementation broke previously passing behavior
    Regression,
    /// The environment kept failing
    Infra,
}

impl FailureType {
    /// All failure types.
    pub const ALL: [FailureType; 3] = [
        FailureType::Spec,
        FailureType::Regression,
        FailureType::Infra,
    ];

    /// Tag suffix used in the failure label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::Spec => "spec",
            FailureType::Regression => "regression",
            FailureType::Infra => "infra",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// State Transition
// ============================================================================

/// Record of an applied lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Work item the transition applied to
    pub item: String,
    /// State before the transition (`None` if the item had no state label)
    pub from: Option<SpecState>,
    /// State after the transition
    pub to: SpecState,
    /// Whether the transition table was bypassed
    pub forced: bool,
    /// When the transition was applied
    pub timestamp: DateTime<Utc>,
}

impl StateTransition {
    /// Create a validated transition record.
    #[must_use]
    pub fn new(item: impl Into<String>, from: Option<SpecState>, to: SpecState) -> Self {
        Self {
            item: item.into(),
            from,
            to,
            forced: false,
            timestamp: Utc::now(),
        }
    }

    /// Create a forced transition record.
    #[must_use]
    pub fn forced(item: impl Into<String>, from: Option<SpecState>, to: SpecState) -> Self {
        Self {
            forced: true,
            ..Self::new(item, from, to)
        }
    }

    /// Whether the transition left the state unchanged.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.from == Some(self.to)
    }
}

// ============================================================================
// Tests
// ============================================================================
