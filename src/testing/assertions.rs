//! Custom assertions for domain-specific testing.
//!
//! These helpers produce clearer failure messages than raw `assert!` calls
//! on label vectors and selections.

use std::collections::HashSet;

use crate::scheduler::WorkItem;
use crate::state_machine::labels::STATE_LABEL_PREFIX;
use crate::state_machine::{analyze_labels, state_label, SpecState};

/// Assert that a label set carries exactly one state label, for `expected`.
///
/// # Panics
///
/// Panics if the labels carry no state label, several, or the wrong one.
pub fn assert_state<S: AsRef<str>>(labels: &[S], expected: SpecState) {
    let expected_label = state_label(expected);
    let states: Vec<&str> = labels
        .iter()
        .map(|l| l.as_ref())
        .filter(|l| l.starts_with(STATE_LABEL_PREFIX))
        .collect();
    assert_eq!(
        states,
        vec![expected_label.as_str()],
        "Expected exactly one state label for {}",
        expected
    );
}

/// Assert that each retry category appears at most once.
///
/// # Panics
///
/// Panics if a category has more than one retry label.
pub fn assert_single_retry_label_per_category<S: AsRef<str>>(labels: &[S]) {
    for category in ["retry:spec:", "retry:infra:"] {
        let count = labels
            .iter()
            .filter(|l| l.as_ref().starts_with(category))
            .count();
        assert!(
            count <= 1,
            "Expected at most one {}* label, found {}",
            category,
            count
        );
    }
}

/// Assert the retry counters recovered from a label set.
///
/// # Panics
///
/// Panics if either counter differs.
pub fn assert_retry_counts<S: AsRef<str>>(labels: &[S], spec: u32, infra: u32) {
    let analysis = analyze_labels(labels);
    assert_eq!(
        (analysis.spec_retry_count, analysis.infra_retry_count),
        (spec, infra),
        "Unexpected (spec, infra) retry counts"
    );
}

/// Assert that no two selected items share a grouping path.
///
/// # Panics
///
/// Panics if a grouping path appears twice.
pub fn assert_distinct_paths(items: &[WorkItem]) {
    let mut seen = HashSet::new();
    for item in items {
        assert!(
            seen.insert(item.lock_key()),
            "Grouping path {} selected twice (second: {})",
            item.lock_key(),
            item.spec_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_assert_state_passes() {
        assert_state(&["bug", "tdd-spec:queued"], SpecState::Queued);
    }

    #[test]
    #[should_panic(expected = "Expected exactly one state label")]
    fn test_assert_state_rejects_duplicates() {
        assert_state(&["tdd-spec:queued", "tdd-spec:failed"], SpecState::Queued);
    }

    #[test]
    #[should_panic(expected = "at most one retry:spec:")]
    fn test_assert_single_retry_label() {
        assert_single_retry_label_per_category(&["retry:spec:1", "retry:spec:2"]);
    }

    #[test]
    fn test_assert_retry_counts() {
        assert_retry_counts(&["retry:spec:2", "retry:infra:1"], 2, 1);
    }

    #[test]
    #[should_panic(expected = "selected twice")]
    fn test_assert_distinct_paths() {
        let now = Utc::now();
        assert_distinct_paths(&[
            WorkItem::new("A-A-001", "src/a.ts", now),
            WorkItem::new("A-A-002", "/src/a.ts", now),
        ]);
    }
}
