//! Label-backed state machine driver.
//!
//! Every operation follows the same shape: read a snapshot, compute the next
//! label set, diff, and apply the diff through the [`LabelStore`].

use tracing::{debug, info, warn};

use super::labels::{
    analyze_labels, with_failure_type, with_retry_count, with_state, LabelAnalysis, LabelDiff,
    MAX_RETRIES,
};
use super::state::{is_valid_transition, FailureType, RetryCategory, SpecState, StateTransition};
use crate::error::{IntoPipelineError, PipelineError, Result};
use crate::testing::LabelStore;

/// Drives work item lifecycles through a [`LabelStore`].
///
/// # Example
///
/// ```rust,ignore
/// use specloop::state_machine::{SpecState, SpecStateMachine};
/// use specloop::testing::MockLabelStore;
///
/// let machine = SpecStateMachine::new(MockLabelStore::new());
/// machine.transition_to("17", SpecState::Queued).await?;
/// ```
#[derive(Debug)]
pub struct SpecStateMachine<S> {
    store: S,
}

impl<S: LabelStore> SpecStateMachine<S> {
    /// Create a state machine over a label store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetch the label snapshot of an item.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::LabelStore`] if the read fails.
    pub async fn labels(&self, item: &str) -> Result<Vec<String>> {
        self.store.get_labels(item).await.into_label_store("get", item)
    }

    /// Fetch and analyze the labels of an item.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::LabelStore`] if the read fails.
    pub async fn analyze(&self, item: &str) -> Result<LabelAnalysis> {
        Ok(analyze_labels(&self.labels(item).await?))
    }

    /// Current lifecycle state of an item.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::LabelStore`] if the read fails.
    pub async fn current_state(&self, item: &str) -> Result<Option<SpecState>> {
        Ok(self.analyze(item).await?.current_state)
    }

    /// Move an item to `to` if the transition table allows it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidTransition`] if the move is not in the
    /// table. Nothing is written in that case.
    pub async fn transition_to(&self, item: &str, to: SpecState) -> Result<StateTransition> {
        let current = self.labels(item).await?;
        let from = analyze_labels(&current).current_state;

        if !is_valid_transition(from, to) {
            return Err(PipelineError::InvalidTransition {
                item: item.to_string(),
                from,
                to,
            });
        }

        self.apply(item, &LabelDiff::between(&current, &with_state(&current, to)))
            .await?;

        info!(item, from = ?from, to = %to, "Spec transitioned");
        Ok(StateTransition::new(item, from, to))
    }

    /// Move an item to `to` without consulting the transition table.
    ///
    /// Reserved for administrative recovery such as resetting a stuck item.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::LabelStore`] if the write fails.
    pub async fn force_transition_to(&self, item: &str, to: SpecState) -> Result<StateTransition> {
        let current = self.labels(item).await?;
        let from = analyze_labels(&current).current_state;

        if !is_valid_transition(from, to) {
            warn!(item, from = ?from, to = %to, "Forcing transition outside the transition table");
        }

        self.apply(item, &LabelDiff::between(&current, &with_state(&current, to)))
            .await?;

        warn!(item, from = ?from, to = %to, "Spec force-transitioned");
        Ok(StateTransition::forced(item, from, to))
    }

    /// Bump a retry counter, saturating at [`MAX_RETRIES`].
    ///
    /// Returns the stored count. Callers that must block a retry at the cap
    /// check [`Self::has_max_retries`] first.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::LabelStore`] if the read or write fails.
    pub async fn increment_retry(&self, item: &str, category: RetryCategory) -> Result<u32> {
        let current = self.labels(item).await?;
        let count = analyze_labels(&current).retry_count(category);
        let next = count.saturating_add(1).min(MAX_RETRIES);

        self.apply(
            item,
            &LabelDiff::between(&current, &with_retry_count(&current, category, next)),
        )
        .await?;

        debug!(item, category = %category, count = next, "Retry counter incremented");
        Ok(next)
    }

    /// Whether a category's retry budget is spent.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::LabelStore`] if the read fails.
    pub async fn has_max_retries(&self, item: &str, category: RetryCategory) -> Result<bool> {
        Ok(self.analyze(item).await?.has_max_retries(category))
    }

    /// Replace any failure label with `failure_type`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::LabelStore`] if the read or write fails.
    pub async fn set_failure_type(&self, item: &str, failure_type: FailureType) -> Result<()> {
        let current = self.labels(item).await?;
        self.apply(
            item,
            &LabelDiff::between(&current, &with_failure_type(&current, failure_type)),
        )
        .await?;
        debug!(item, failure_type = %failure_type, "Failure type set");
        Ok(())
    }

    /// Apply a diff: removals first, then additions.
    async fn apply(&self, item: &str, diff: &LabelDiff) -> Result<()> {
        if diff.is_empty() {
            return Ok(());
        }
        if !diff.remove.is_empty() {
            self.store
                .remove_labels(item, &diff.remove)
                .await
                .into_label_store("remove", item)?;
        }
        if !diff.add.is_empty() {
            self.store
                .add_labels(item, &diff.add)
                .await
                .into_label_store("add", item)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::labels::{retry_label, state_label};
    use crate::testing::MockLabelStore;

    fn machine_with(item: &str, labels: &[&str]) -> SpecStateMachine<MockLabelStore> {
        SpecStateMachine::new(MockLabelStore::new().with_labels(item, labels))
    }

    #[tokio::test]
    async fn test_enter_pipeline_from_none() {
        let machine = machine_with("1", &["bug"]);
        let t = machine.transition_to("1", SpecState::Queued).await.unwrap();
        assert_eq!(t.from, None);
        assert_eq!(t.to, SpecState::Queued);
        assert!(!t.forced);
        assert_eq!(
            machine.current_state("1").await.unwrap(),
            Some(SpecState::Queued)
        );
        assert!(machine.labels("1").await.unwrap().contains(&"bug".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_transition_writes_nothing() {
        let machine = machine_with("1", &["tdd-spec:completed"]);
        let err = machine
            .transition_to("1", SpecState::Queued)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
        assert_eq!(machine.store().write_count(), 0);
        assert_eq!(
            machine.current_state("1").await.unwrap(),
            Some(SpecState::Completed)
        );
    }

    #[tokio::test]
    async fn test_force_transition_bypasses_table() {
        let machine = machine_with("1", &["tdd-spec:completed"]);
        let t = machine
            .force_transition_to("1", SpecState::Queued)
            .await
            .unwrap();
        assert!(t.forced);
        assert_eq!(
            machine.current_state("1").await.unwrap(),
            Some(SpecState::Queued)
        );
    }

    #[tokio::test]
    async fn test_full_lifecycle_keeps_single_state_label() {
        let machine = machine_with("9", &[]);
        for to in [
            SpecState::Queued,
            SpecState::InProgress,
            SpecState::Queued,
            SpecState::InProgress,
            SpecState::Failed,
            SpecState::Queued,
            SpecState::InProgress,
            SpecState::Completed,
        ] {
            machine.transition_to("9", to).await.unwrap();
            let labels = machine.labels("9").await.unwrap();
            let states = labels.iter().filter(|l| l.starts_with("tdd-spec:")).count();
            assert_eq!(states, 1);
            assert!(labels.contains(&state_label(to)));
        }
    }

    #[tokio::test]
    async fn test_increment_retry_saturates() {
        let machine = machine_with("3", &["tdd-spec:in-progress"]);
        for k in 1..=5u32 {
            let count = machine
                .increment_retry("3", RetryCategory::Spec)
                .await
                .unwrap();
            assert_eq!(count, k.min(MAX_RETRIES));

            let labels = machine.labels("3").await.unwrap();
            let spec_labels: Vec<_> = labels
                .iter()
                .filter(|l| l.starts_with("retry:spec:"))
                .collect();
            assert_eq!(spec_labels, vec![&retry_label(RetryCategory::Spec, k.min(MAX_RETRIES))]);
        }
        assert!(machine
            .has_max_retries("3", RetryCategory::Spec)
            .await
            .unwrap());
        assert!(!machine
            .has_max_retries("3", RetryCategory::Infra)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_increment_retry_never_lowers_out_of_range_counter() {
        let machine = machine_with("8", &["tdd-spec:in-progress", "retry:spec:99"]);
        let before = machine.analyze("8").await.unwrap().spec_retry_count;
        let after = machine
            .increment_retry("8", RetryCategory::Spec)
            .await
            .unwrap();
        assert_eq!(before, MAX_RETRIES);
        assert_eq!(after, MAX_RETRIES);

        let machine = machine_with("9", &["retry:spec:4294967295"]);
        let count = machine
            .increment_retry("9", RetryCategory::Spec)
            .await
            .unwrap();
        assert_eq!(count, MAX_RETRIES);
        let labels = machine.labels("9").await.unwrap();
        assert_eq!(labels, vec![retry_label(RetryCategory::Spec, MAX_RETRIES)]);
    }

    #[tokio::test]
    async fn test_increment_retry_from_zero_label() {
        let machine = machine_with("10", &["retry:spec:0"]);
        let count = machine
            .increment_retry("10", RetryCategory::Spec)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            machine.labels("10").await.unwrap(),
            vec![retry_label(RetryCategory::Spec, 1)]
        );
    }

    #[tokio::test]
    async fn test_increment_retry_categories_are_independent() {
        let machine = machine_with("4", &["retry:spec:2"]);
        machine.increment_retry("4", RetryCategory::Infra).await.unwrap();
        let analysis = machine.analyze("4").await.unwrap();
        assert_eq!(analysis.spec_retry_count, 2);
        assert_eq!(analysis.infra_retry_count, 1);
    }

    #[tokio::test]
    async fn test_set_failure_type_is_exclusive() {
        let machine = machine_with("5", &["failure:infra"]);
        machine
            .set_failure_type("5", FailureType::Spec)
            .await
            .unwrap();
        let labels = machine.labels("5").await.unwrap();
        assert!(labels.contains(&"failure:spec".to_string()));
        assert!(!labels.contains(&"failure:infra".to_string()));
    }

    #[tokio::test]
    async fn test_store_failure_is_typed() {
        let store = MockLabelStore::new()
            .with_labels("6", &["tdd-spec:queued"])
            .with_add_error("tracker unavailable");
        let machine = SpecStateMachine::new(store);
        let err = machine
            .transition_to("6", SpecState::InProgress)
            .await
            .unwrap_err();
        match err {
            PipelineError::LabelStore { operation, item, .. } => {
                assert_eq!(operation, "add");
                assert_eq!(item, "6");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
