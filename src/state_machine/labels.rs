//! Label formats and snapshot analysis.
//!
//! Labels on the external record are the only persistence for lifecycle
//! state, retry counters and failure type:
//!
//! ```text
//! tdd-spec:{queued|in-progress|completed|failed}
//! retry:{spec|infra}:{1..3}
//! failure:{spec|regression|infra}
//! tdd-queue:disabled
//! ```
//!
//! Mutations are never applied in place. Callers build the next label set
//! from a snapshot and send only the [`LabelDiff`] between the two.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::state::{FailureType, RetryCategory, SpecState};

/// Maximum value of either retry counter.
pub const MAX_RETRIES: u32 = 3;

/// Prefix of lifecycle state labels.
pub const STATE_LABEL_PREFIX: &str = "tdd-spec:";

/// Prefix of retry counter labels.
pub const RETRY_LABEL_PREFIX: &str = "retry:";

/// Prefix of failure type labels.
pub const FAILURE_LABEL_PREFIX: &str = "failure:";

/// Sentinel label that disables the queue (circuit breaker open).
pub const QUEUE_DISABLED_LABEL: &str = "tdd-queue:disabled";

/// Build the state label for a lifecycle state.
#[must_use]
pub fn state_label(state: SpecState) -> String {
    format!("{}{}", STATE_LABEL_PREFIX, state.as_str())
}

/// Build the retry label for a category and count.
#[must_use]
pub fn retry_label(category: RetryCategory, count: u32) -> String {
    format!("{}{}:{}", RETRY_LABEL_PREFIX, category.as_str(), count)
}

/// Build the failure label for a failure type.
#[must_use]
pub fn failure_label(failure_type: FailureType) -> String {
    format!("{}{}", FAILURE_LABEL_PREFIX, failure_type.as_str())
}

/// Parsed meaning of a single label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedLabel {
    /// A lifecycle state label
    State(SpecState),
    /// A retry counter label
    Retry(RetryCategory, u32),
    /// A failure type label
    Failure(FailureType),
    /// The queue-disabled sentinel
    QueueDisabled,
}

/// Parse one label. Unrecognized labels yield `None`.
///
/// A retry count of 0 is not a retry label; counts above [`MAX_RETRIES`]
/// read as [`MAX_RETRIES`].
#[must_use]
pub fn parse_label(label: &str) -> Option<ParsedLabel> {
    if label == QUEUE_DISABLED_LABEL {
        return Some(ParsedLabel::QueueDisabled);
    }

    if let Some(rest) = label.strip_prefix(STATE_LABEL_PREFIX) {
        return SpecState::ALL
            .into_iter()
            .find(|s| s.as_str() == rest)
            .map(ParsedLabel::State);
    }

    if let Some(rest) = label.strip_prefix(RETRY_LABEL_PREFIX) {
        let (category, count) = rest.split_once(':')?;
        let category = match category {
            "spec" => RetryCategory::Spec,
            "infra" => RetryCategory::Infra,
            _ => return None,
        };
        // Counts are 1..=MAX_RETRIES; larger values saturate at the cap.
        let count: u32 = count.parse().ok()?;
        if count == 0 {
            return None;
        }
        return Some(ParsedLabel::Retry(category, count.min(MAX_RETRIES)));
    }

    if let Some(rest) = label.strip_prefix(FAILURE_LABEL_PREFIX) {
        return FailureType::ALL
            .into_iter()
            .find(|f| f.as_str() == rest)
            .map(ParsedLabel::Failure);
    }

    None
}

/// Lifecycle facts recovered from a label snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelAnalysis {
    /// Current lifecycle state, `None` if the item has not entered the pipeline
    pub current_state: Option<SpecState>,
    /// Spec retry counter
    pub spec_retry_count: u32,
    /// Infrastructure retry counter
    pub infra_retry_count: u32,
    /// Failure type, only meaningful once `Failed`
    pub failure_type: Option<FailureType>,
    /// Whether the queue-disabled sentinel is present
    pub queue_disabled: bool,
}

impl LabelAnalysis {
    /// Retry counter for a category.
    #[must_use]
    pub fn retry_count(&self, category: RetryCategory) -> u32 {
        match category {
            RetryCategory::Spec => self.spec_retry_count,
            RetryCategory::Infra => self.infra_retry_count,
        }
    }

    /// Sum of both retry counters.
    #[must_use]
    pub fn total_retries(&self) -> u32 {
        self.spec_retry_count.saturating_add(self.infra_retry_count)
    }

    /// Whether a category's budget is spent.
    #[must_use]
    pub fn has_max_retries(&self, category: RetryCategory) -> bool {
        self.retry_count(category) >= MAX_RETRIES
    }
}

/// Derive lifecycle facts from a label set in a single scan.
///
/// Retry labels keep the highest count seen per category. If the record
/// carries more than one state label, the last one wins; the next validated
/// transition removes the stale ones.
///
/// # Example
///
/// ```
/// use specloop::state_machine::{analyze_labels, SpecState};
///
/// let labels = vec!["tdd-spec:queued".to_string(), "retry:infra:2".to_string()];
/// let analysis = analyze_labels(&labels);
/// assert_eq!(analysis.current_state, Some(SpecState::Queued));
/// assert_eq!(analysis.infra_retry_count, 2);
/// ```
#[must_use]
pub fn analyze_labels<S: AsRef<str>>(labels: &[S]) -> LabelAnalysis {
    let mut analysis = LabelAnalysis::default();

    for label in labels {
        match parse_label(label.as_ref()) {
            Some(ParsedLabel::State(state)) => analysis.current_state = Some(state),
            Some(ParsedLabel::Retry(RetryCategory::Spec, n)) => {
                analysis.spec_retry_count = analysis.spec_retry_count.max(n);
            }
            Some(ParsedLabel::Retry(RetryCategory::Infra, n)) => {
                analysis.infra_retry_count = analysis.infra_retry_count.max(n);
            }
            Some(ParsedLabel::Failure(f)) => analysis.failure_type = Some(f),
            Some(ParsedLabel::QueueDisabled) => analysis.queue_disabled = true,
            None => {}
        }
    }

    analysis
}

// ============================================================================
// Label Diff
// ============================================================================

/// Minimal set of label operations turning one snapshot into another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelDiff {
    /// Labels to add
    pub add: Vec<String>,
    /// Labels to remove
    pub remove: Vec<String>,
}

impl LabelDiff {
    /// Diff a current snapshot against the desired next label set.
    #[must_use]
    pub fn between<S: AsRef<str>>(current: &[S], next: &BTreeSet<String>) -> Self {
        let current: BTreeSet<String> = current.iter().map(|l| l.as_ref().to_string()).collect();
        Self {
            add: next.difference(&current).cloned().collect(),
            remove: current.difference(next).cloned().collect(),
        }
    }

    /// Whether the diff changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Next label set with every state label replaced by `to`.
#[must_use]
pub fn with_state<S: AsRef<str>>(current: &[S], to: SpecState) -> BTreeSet<String> {
    let mut next: BTreeSet<String> = current
        .iter()
        .map(|l| l.as_ref().to_string())
        .filter(|l| !matches!(parse_label(l), Some(ParsedLabel::State(_))))
        .collect();
    next.insert(state_label(to));
    next
}

/// Next label set with a category's retry labels replaced by `count`.
#[must_use]
pub fn with_retry_count<S: AsRef<str>>(
    current: &[S],
    category: RetryCategory,
    count: u32,
) -> BTreeSet<String> {
    // Prefix match so malformed counters of this category are dropped too.
    let prefix = format!("{}{}:", RETRY_LABEL_PREFIX, category.as_str());
    let mut next: BTreeSet<String> = current
        .iter()
        .map(|l| l.as_ref().to_string())
        .filter(|l| !l.starts_with(&prefix))
        .collect();
    next.insert(retry_label(category, count));
    next
}

/// Next label set carrying exactly one failure label.
#[must_use]
pub fn with_failure_type<S: AsRef<str>>(
    current: &[S],
    failure_type: FailureType,
) -> BTreeSet<String> {
    let mut next: BTreeSet<String> = current
        .iter()
        .map(|l| l.as_ref().to_string())
        .filter(|l| !matches!(parse_label(l), Some(ParsedLabel::Failure(_))))
        .collect();
    next.insert(failure_label(failure_type));
    next
}
