//! Decisions returned by the pipeline driver.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::classifier::ClassificationResult;
use crate::retry::RetryDecision;
use crate::scheduler::WorkItem;
use crate::state_machine::FailureType;

/// Circuit breaker gate for one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "state")]
pub enum Admission {
    /// Circuit closed; work may be admitted
    Closed,
    /// Circuit open and staying open
    Open { reason: String },
    /// Circuit closed but should open now; no work this cycle
    OpenCircuit { reason: String },
    /// Circuit open but healthy enough to close; work may resume
    CloseCircuit,
}

impl Admission {
    /// Whether new work may be dispatched.
    #[must_use]
    pub fn admits_work(&self) -> bool {
        matches!(self, Self::Closed | Self::CloseCircuit)
    }

    /// Whether the sentinel has to be written or removed.
    #[must_use]
    pub fn changes_sentinel(&self) -> bool {
        matches!(self, Self::OpenCircuit { .. } | Self::CloseCircuit)
    }
}

impl fmt::Display for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open { reason } => write!(f, "OPEN: {}", reason),
            Self::OpenCircuit { reason } => write!(f, "OPENING: {}", reason),
            Self::CloseCircuit => write!(f, "CLOSING"),
        }
    }
}

/// What to do in one scheduling cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "action")]
pub enum CycleAction {
    /// The circuit is open
    Paused { reason: String },
    /// Nothing is admissible
    Idle,
    /// Dispatch these items
    Dispatch { items: Vec<WorkItem> },
}

/// What happened to an item after its run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "action")]
pub enum OutcomeAction {
    /// Item moved to `Completed`
    Completed {
        classification: ClassificationResult,
        /// The run did not report success but its work is considered done
        treated_as_done: bool,
    },
    /// Item re-queued; the whole queue should cool down
    PauseQueue {
        classification: ClassificationResult,
        decision: RetryDecision,
        cooldown_minutes: u32,
    },
    /// Item re-queued with backoff
    Retried {
        classification: ClassificationResult,
        decision: RetryDecision,
    },
    /// Item moved to `Failed`
    Failed {
        classification: ClassificationResult,
        failure_type: FailureType,
        reason: String,
    },
}

impl OutcomeAction {
    /// Classification behind the action.
    #[must_use]
    pub fn classification(&self) -> &ClassificationResult {
        match self {
            Self::Completed { classification, .. }
            | Self::PauseQueue { classification, .. }
            | Self::Retried { classification, .. }
            | Self::Failed { classification, .. } => classification,
        }
    }

    /// Human-readable explanation, suitable for a tracker comment.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Completed { treated_as_done: false, .. } => "Completed".to_string(),
            Self::Completed { classification, .. } => {
                format!("Treated as done: {}", classification.message)
            }
            Self::PauseQueue { decision, cooldown_minutes, .. } => {
                format!("{}; pausing queue for {}m", decision.reason, cooldown_minutes)
            }
            Self::Retried { decision, .. } => decision.reason.clone(),
            Self::Failed { failure_type, reason, .. } => {
                format!("Failed ({}): {}", failure_type, reason)
            }
        }
    }
}

/// An in-progress item that has been idle too long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckItem {
    pub item_id: String,
    pub title: String,
    /// Minutes since the record was last touched
    pub idle_minutes: f64,
}
