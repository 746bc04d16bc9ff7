//! Pipeline cycle driver.
//!
//! Composes the components into one scheduling cycle:
//!
//! ```text
//! control labels + HealthAssessment ──admission──> Admission
//!                                                     │
//! SchedulerState ──────────────plan_cycle─────────────┤
//!                                                     ▼
//!                                          Paused / Idle / Dispatch
//!                                                     │
//!                                  start ──> (external agent run)
//!                                                     │
//! ExecutionOutcome ───────────handle_outcome──────────┘
//!        │
//!        └──> Completed / PauseQueue / Retried / Failed
//! ```
//!
//! The driver never spawns work. It only decides and applies label
//! mutations; dispatching the agent is the caller's job.

pub mod actions;

pub use actions::{Admission, CycleAction, OutcomeAction, StuckItem};

use tracing::{debug, info, warn};

use crate::classifier::{ClassificationResult, ErrorCategory, ErrorClassifier, ExecutionOutcome};
use crate::config::PipelineConfig;
use crate::error::{IntoPipelineError, Result};
use crate::health::{
    circuit_is_open, HealthAssessment, HealthMonitor, QueueMetrics, WorkflowMetrics,
};
use crate::retry::{CooldownConfig, CooldownWindow, RetryContext, RetryDecision, RetryManager};
use crate::scheduler::{ErrorKind, ErrorRecord, SchedulerState, SpecSelector, WorkItem};
use crate::state_machine::{
    analyze_labels, state_label, FailureType, SpecState, SpecStateMachine, StateTransition,
    QUEUE_DISABLED_LABEL,
};
use crate::testing::{minutes_between, Clock, LabelStore, WorkItemRecord, WorkItemSource};

/// The decision core wired to a label store and a clock.
#[derive(Debug)]
pub struct Pipeline<S, C> {
    machine: SpecStateMachine<S>,
    clock: C,
    classifier: ErrorClassifier,
    retry: RetryManager,
    selector: SpecSelector,
    health: HealthMonitor,
    cooldown: CooldownConfig,
}

impl<S: LabelStore, C: Clock> Pipeline<S, C> {
    /// Build a pipeline from configuration.
    pub fn new(store: S, clock: C, config: &PipelineConfig) -> Self {
        Self {
            machine: SpecStateMachine::new(store),
            clock,
            classifier: ErrorClassifier::new(),
            retry: RetryManager::new(config.retry.clone()),
            selector: SpecSelector::new(config.scheduler.clone()),
            health: HealthMonitor::new(config.health.clone()),
            cooldown: config.cooldown.clone(),
        }
    }

    /// Use a fixed jitter seed.
    #[must_use]
    pub fn with_retry_seed(mut self, seed: u64) -> Self {
        self.retry = self.retry.with_seed(seed);
        self
    }

    /// The underlying state machine.
    pub fn machine(&self) -> &SpecStateMachine<S> {
        &self.machine
    }

    /// The clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Assess health at the current time.
    #[must_use]
    pub fn assess(
        &self,
        queue: QueueMetrics,
        workflow: WorkflowMetrics,
        circuit_open: bool,
    ) -> HealthAssessment {
        self.health.assess(queue, workflow, circuit_open, self.clock.now())
    }

    /// Gate a cycle on the sentinel and the latest assessment.
    #[must_use]
    pub fn admission<L: AsRef<str>>(
        &self,
        control_labels: &[L],
        assessment: &HealthAssessment,
    ) -> Admission {
        let open = circuit_is_open(control_labels);
        let should_open = self
            .health
            .should_open_circuit(&assessment.queue_metrics, &assessment.workflow_metrics);
        let can_close = self
            .health
            .can_close_circuit(&assessment.queue_metrics, &assessment.workflow_metrics);

        let reason = || {
            if assessment.issues.is_empty() {
                format!("pipeline health is {}", assessment.level)
            } else {
                assessment.issues.join("; ")
            }
        };

        match (open, should_open, can_close) {
            (false, false, _) => Admission::Closed,
            (false, true, _) => Admission::OpenCircuit { reason: reason() },
            (true, _, true) => Admission::CloseCircuit,
            (true, _, false) => Admission::Open {
                reason: format!("circuit open: {}", reason()),
            },
        }
    }

    /// Write or remove the sentinel on the control record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PipelineError::LabelStore`] if the write fails.
    pub async fn persist_admission(&self, control_item: &str, admission: &Admission) -> Result<()> {
        let sentinel = [QUEUE_DISABLED_LABEL.to_string()];
        let store = self.machine.store();
        match admission {
            Admission::OpenCircuit { reason } => {
                store
                    .add_labels(control_item, &sentinel)
                    .await
                    .into_label_store("add", control_item)?;
                warn!(control_item, reason = %reason, "Circuit opened");
            }
            Admission::CloseCircuit => {
                store
                    .remove_labels(control_item, &sentinel)
                    .await
                    .into_label_store("remove", control_item)?;
                info!(control_item, "Circuit closed");
            }
            Admission::Closed | Admission::Open { .. } => {}
        }
        Ok(())
    }

    /// Decide what this cycle does.
    #[must_use]
    pub fn plan_cycle(
        &self,
        admission: &Admission,
        state: &SchedulerState,
        count: usize,
    ) -> CycleAction {
        if !admission.admits_work() {
            let reason = match admission {
                Admission::Open { reason } | Admission::OpenCircuit { reason } => reason.clone(),
                Admission::Closed | Admission::CloseCircuit => String::new(),
            };
            info!(reason = %reason, "Cycle paused");
            return CycleAction::Paused { reason };
        }

        let items = self.selector.select_next(count, state, self.clock.now());
        if items.is_empty() {
            debug!(queued = state.queue.len(), "Nothing admissible");
            CycleAction::Idle
        } else {
            info!(count = items.len(), "Dispatching");
            CycleAction::Dispatch { items }
        }
    }

    /// Fetch queued work items from the tracker.
    ///
    /// Records without a spec id in their title are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker query fails.
    pub async fn fetch_queue(&self, source: &impl WorkItemSource) -> Result<Vec<WorkItem>> {
        let records = source.list_by_label(&state_label(SpecState::Queued)).await?;
        Ok(records
            .iter()
            .filter_map(|record| {
                let item = WorkItem::from_record(record);
                if item.is_none() {
                    warn!(
                        number = record.number,
                        title = %record.title,
                        "Skipping record without spec id"
                    );
                }
                item
            })
            .collect())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Move an item to `InProgress` and lock its path.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PipelineError::InvalidTransition`] unless the item
    /// is queued.
    pub async fn start(
        &self,
        state: &mut SchedulerState,
        item: &WorkItem,
    ) -> Result<StateTransition> {
        let transition = self
            .machine
            .transition_to(&item.item_id, SpecState::InProgress)
            .await?;
        state.mark_started(item);
        if let Some(queued) = state.queue.iter_mut().find(|q| q.spec_id == item.spec_id) {
            queued.last_attempt = Some(self.clock.now());
        }
        Ok(transition)
    }

    /// Classify a finished run and apply the resulting transition.
    ///
    /// The item's path lock is released before anything else, so a failing
    /// label write never leaves the path held.
    ///
    /// # Errors
    ///
    /// Returns label store, transition or partial mutation errors.
    pub async fn handle_outcome(
        &self,
        state: &mut SchedulerState,
        item: &WorkItem,
        execution: &ExecutionOutcome,
    ) -> Result<OutcomeAction> {
        state.mark_finished(item);
        let classification = self.classifier.classify_outcome(execution);
        let item_id = item.item_id.as_str();

        info!(
            item = item_id,
            spec = %item.spec_id,
            error_type = %classification.error_type,
            "Handling run outcome"
        );

        if classification.treats_work_as_done() {
            self.machine.transition_to(item_id, SpecState::Completed).await?;
            remove_from_queue(state, item);
            let treated_as_done = classification.category == ErrorCategory::Special;
            if treated_as_done {
                warn!(item = item_id, reason = %classification.message, "Run treated as done");
            }
            return Ok(OutcomeAction::Completed {
                classification,
                treated_as_done,
            });
        }

        let analysis = self.machine.analyze(item_id).await?;
        let context = RetryContext::new(item_id, classification.clone()).with_analysis(&analysis);
        let decision = self.retry.should_retry(&context);

        if decision.should_retry {
            self.retry.execute_retry(&self.machine, item_id, decision.category).await?;
            self.record_retry(state, item, &classification, &decision);

            if classification.should_pause_queue {
                let cooldown_minutes = self.cooldown.minutes(CooldownWindow::Standard);
                warn!(item = item_id, cooldown_minutes, "Agent API limit hit, pausing queue");
                return Ok(OutcomeAction::PauseQueue {
                    classification,
                    decision,
                    cooldown_minutes,
                });
            }
            return Ok(OutcomeAction::Retried {
                classification,
                decision,
            });
        }

        let failure_type = self.failure_type(&classification, &execution.log);
        self.retry
            .mark_as_failed(&self.machine, item_id, failure_type)
            .await?;
        remove_from_queue(state, item);

        Ok(OutcomeAction::Failed {
            classification,
            failure_type,
            reason: decision.reason,
        })
    }

    fn failure_type(&self, classification: &ClassificationResult, log: &str) -> FailureType {
        if classification.is_infrastructure {
            FailureType::Infra
        } else if self.classifier.mentions_regression(log) {
            FailureType::Regression
        } else {
            FailureType::Spec
        }
    }

    /// Keep the caller's queue snapshot in step with the labels just written.
    fn record_retry(
        &self,
        state: &mut SchedulerState,
        item: &WorkItem,
        classification: &ClassificationResult,
        decision: &RetryDecision,
    ) {
        let now = self.clock.now();
        if let Some(queued) = state.queue.iter_mut().find(|q| q.spec_id == item.spec_id) {
            queued.attempts = queued.attempts.saturating_add(1);
            queued.last_attempt = Some(now);
            queued.errors.push(ErrorRecord::new(
                now,
                ErrorKind::from_classification(classification),
                decision.reason.clone(),
            ));
        }
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// In-progress records idle longer than the stuck-escalation window.
    #[must_use]
    pub fn find_stuck(&self, records: &[WorkItemRecord]) -> Vec<StuckItem> {
        let window = f64::from(self.cooldown.minutes(CooldownWindow::StuckEscalation));
        let now = self.clock.now();
        records
            .iter()
            .filter(|r| analyze_labels(&r.labels).current_state == Some(SpecState::InProgress))
            .map(|r| StuckItem {
                item_id: r.number.to_string(),
                title: r.title.clone(),
                idle_minutes: minutes_between(r.updated_at, now),
            })
            .filter(|s| s.idle_minutes >= window)
            .collect()
    }

    /// Put a stuck item back in the queue, bypassing the transition table.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PipelineError::LabelStore`] if the write fails.
    pub async fn recover_stuck(
        &self,
        state: &mut SchedulerState,
        item_id: &str,
    ) -> Result<StateTransition> {
        let transition = self.machine.force_transition_to(item_id, SpecState::Queued).await?;
        if let Some(item) = state.queue.iter().find(|q| q.item_id == item_id).cloned() {
            state.mark_finished(&item);
        }
        Ok(transition)
    }
}

fn remove_from_queue(state: &mut SchedulerState, item: &WorkItem) {
    state.queue.retain(|q| q.spec_id != item.spec_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Outcome;
    use crate::health::{CircuitRecommendation, HealthLevel};
    use crate::scheduler::PriorityCalculator;
    use crate::testing::{FixedClock, MockLabelStore, MockWorkItemSource};
    use chrono::{Duration, TimeZone, Utc};

    const SUCCESS_LOG: &str = r#"{"type":"result","subtype":"success"}"#;

    fn clock() -> FixedClock {
        FixedClock::at(Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap())
    }

    fn work_item(id: &str, path: &str) -> WorkItem {
        WorkItem::new(id, path, clock().now() - Duration::hours(3)).with_item_id(id)
    }

    fn pipeline(store: MockLabelStore) -> Pipeline<MockLabelStore, FixedClock> {
        let mut config = PipelineConfig::default();
        config.retry.jitter_fraction = 0.0;
        Pipeline::new(store, clock(), &config)
    }

    async fn started(
        labels: &[&str],
    ) -> (Pipeline<MockLabelStore, FixedClock>, SchedulerState, WorkItem) {
        let item = work_item("AUTH-LOGIN-001", "src/auth/login.ts");
        let p = pipeline(MockLabelStore::new().with_labels(&item.item_id, labels));
        let mut state = SchedulerState::with_queue(vec![item.clone()]);
        p.start(&mut state, &item).await.unwrap();
        (p, state, item)
    }

    #[tokio::test]
    async fn test_success_completes_and_unlocks() {
        let (p, mut state, item) = started(&["tdd-spec:queued"]).await;
        assert!(state.is_locked("src/auth/login.ts"));

        let action = p
            .handle_outcome(&mut state, &item, &ExecutionOutcome::new("", Outcome::Success, true))
            .await
            .unwrap();
        assert!(matches!(action, OutcomeAction::Completed { treated_as_done: false, .. }));
        assert!(!state.is_locked("src/auth/login.ts"));
        assert!(state.queue.is_empty());
        assert_eq!(
            p.machine().current_state(&item.item_id).await.unwrap(),
            Some(SpecState::Completed)
        );
    }

    #[tokio::test]
    async fn test_sdk_crash_is_treated_as_done() {
        let (p, mut state, item) = started(&["tdd-spec:queued"]).await;
        let outcome = ExecutionOutcome::new(SUCCESS_LOG, Outcome::Failure, false);
        let action = p
            .handle_outcome(&mut state, &item, &outcome)
            .await
            .unwrap();
        assert!(matches!(action, OutcomeAction::Completed { treated_as_done: true, .. }));
        assert!(action.reason().starts_with("Treated as done"));
    }

    #[tokio::test]
    async fn test_code_failure_is_retried() {
        let (p, mut state, item) = started(&["tdd-spec:queued"]).await;
        let action = p
            .handle_outcome(
                &mut state,
                &item,
                &ExecutionOutcome::new("Tests: 1 failed", Outcome::Failure, false),
            )
            .await
            .unwrap();
        match action {
            OutcomeAction::Retried { decision, .. } => {
                assert_eq!(decision.new_retry_count, 1);
                assert_eq!(decision.delay_seconds, 60);
            }
            other => panic!("unexpected action: {other:?}"),
        }
        let analysis = p.machine().analyze(&item.item_id).await.unwrap();
        assert_eq!(analysis.current_state, Some(SpecState::Queued));
        assert_eq!(analysis.spec_retry_count, 1);
        assert_eq!(state.queue[0].attempts, 1);
        assert_eq!(state.queue[0].latest_error().unwrap().kind, ErrorKind::Code);
    }

    #[tokio::test]
    async fn test_rate_limit_pauses_queue() {
        let (p, mut state, item) = started(&["tdd-spec:queued"]).await;
        let action = p
            .handle_outcome(
                &mut state,
                &item,
                &ExecutionOutcome::new("429 Too Many Requests", Outcome::Failure, false),
            )
            .await
            .unwrap();
        match action {
            OutcomeAction::PauseQueue { cooldown_minutes, decision, .. } => {
                assert_eq!(cooldown_minutes, 30);
                assert_eq!(decision.category, crate::state_machine::RetryCategory::Infra);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exhausted_infra_budget_fails_as_infra() {
        let (p, mut state, item) = started(&["tdd-spec:queued", "retry:infra:3"]).await;
        let outcome = ExecutionOutcome::new("ECONNRESET", Outcome::Failure, false);
        let action = p
            .handle_outcome(&mut state, &item, &outcome)
            .await
            .unwrap();
        match action {
            OutcomeAction::Failed { failure_type, ref reason, .. } => {
                assert_eq!(failure_type, FailureType::Infra);
                assert!(reason.contains("Max retries reached"));
            }
            ref other => panic!("unexpected action: {other:?}"),
        }
        let analysis = p.machine().analyze(&item.item_id).await.unwrap();
        assert_eq!(analysis.current_state, Some(SpecState::Failed));
        assert_eq!(analysis.failure_type, Some(FailureType::Infra));
        assert!(state.queue.is_empty());
    }

    #[tokio::test]
    async fn test_regression_evidence_sets_failure_type() {
        let (p, mut state, item) = started(&["tdd-spec:queued", "retry:spec:3"]).await;
        let log = "Tests: 2 failed\n2 tests that were passing before now fail";
        let action = p
            .handle_outcome(&mut state, &item, &ExecutionOutcome::new(log, Outcome::Failure, false))
            .await
            .unwrap();
        assert!(matches!(
            action,
            OutcomeAction::Failed { failure_type: FailureType::Regression, .. }
        ));
    }

    #[tokio::test]
    async fn test_auth_error_fails_without_consuming_budget() {
        let (p, mut state, item) = started(&["tdd-spec:queued"]).await;
        let action = p
            .handle_outcome(
                &mut state,
                &item,
                &ExecutionOutcome::new(
                    "authentication_error: invalid x-api-key",
                    Outcome::Failure,
                    false,
                ),
            )
            .await
            .unwrap();
        assert!(matches!(action, OutcomeAction::Failed { failure_type: FailureType::Spec, .. }));
        let analysis = p.machine().analyze(&item.item_id).await.unwrap();
        assert_eq!(analysis.total_retries(), 0);
    }

    #[tokio::test]
    async fn test_start_requires_queued() {
        let item = work_item("AUTH-LOGIN-002", "src/auth/login.ts");
        let p = pipeline(MockLabelStore::new().with_labels(&item.item_id, &["tdd-spec:completed"]));
        let mut state = SchedulerState::with_queue(vec![item.clone()]);
        assert!(p.start(&mut state, &item).await.is_err());
        assert!(!state.is_locked("src/auth/login.ts"));
    }

    #[test]
    fn test_admission_and_plan() {
        let p = pipeline(MockLabelStore::new());
        let state = SchedulerState::with_queue(vec![
            work_item("A-A-001", "src/a.ts"),
            work_item("A-A-002", "src/a.ts"),
            work_item("B-B-001", "src/b.ts"),
        ]);

        let healthy = p.assess(QueueMetrics::default(), WorkflowMetrics::new(10, 0), false);
        let admission = p.admission::<&str>(&[], &healthy);
        assert_eq!(admission, Admission::Closed);
        match p.plan_cycle(&admission, &state, 5) {
            CycleAction::Dispatch { items } => assert_eq!(items.len(), 2),
            other => panic!("unexpected action: {other:?}"),
        }

        let failing = p.assess(QueueMetrics::default(), WorkflowMetrics::new(10, 9), false);
        assert_eq!(failing.level, HealthLevel::Critical);
        let admission = p.admission::<&str>(&[], &failing);
        assert!(matches!(admission, Admission::OpenCircuit { .. }));
        assert!(matches!(p.plan_cycle(&admission, &state, 5), CycleAction::Paused { .. }));

        let still_open = p.admission(&[QUEUE_DISABLED_LABEL], &failing);
        assert!(matches!(still_open, Admission::Open { .. }));

        let recovered = p.admission(&[QUEUE_DISABLED_LABEL], &healthy);
        assert_eq!(recovered, Admission::CloseCircuit);
        assert!(recovered.admits_work());

        let empty = SchedulerState::default();
        assert_eq!(p.plan_cycle(&Admission::Closed, &empty, 5), CycleAction::Idle);
    }

    #[tokio::test]
    async fn test_persist_admission_toggles_sentinel() {
        let p = pipeline(MockLabelStore::new());
        p.persist_admission("control", &Admission::OpenCircuit { reason: "x".into() })
            .await
            .unwrap();
        assert_eq!(p.machine().store().snapshot("control"), vec![QUEUE_DISABLED_LABEL.to_string()]);
        p.persist_admission("control", &Admission::CloseCircuit).await.unwrap();
        assert!(p.machine().store().snapshot("control").is_empty());
    }

    #[tokio::test]
    async fn test_stuck_detection_and_recovery() {
        let now = clock().now();
        let record = |n: u64, labels: &[&str], idle: i64| WorkItemRecord {
            number: n,
            title: format!("[AUTH-LOGIN-{:03}] spec", n),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            created_at: now - Duration::hours(5),
            updated_at: now - Duration::minutes(idle),
        };
        let records = vec![
            record(1, &["tdd-spec:in-progress"], 40),
            record(2, &["tdd-spec:in-progress"], 5),
            record(3, &["tdd-spec:queued"], 300),
        ];
        let p = pipeline(MockLabelStore::new().with_labels("1", &["tdd-spec:in-progress"]));
        let stuck = p.find_stuck(&records);
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].item_id, "1");
        assert!((stuck[0].idle_minutes - 40.0).abs() < 1e-9);

        let mut state = SchedulerState::default();
        let t = p.recover_stuck(&mut state, "1").await.unwrap();
        assert!(t.forced);
        assert_eq!(p.machine().current_state("1").await.unwrap(), Some(SpecState::Queued));
    }

    #[tokio::test]
    async fn test_fetch_queue_skips_records_without_id() {
        let now = clock().now();
        let record = |n: u64, title: &str| WorkItemRecord {
            number: n,
            title: title.to_string(),
            labels: vec!["tdd-spec:queued".to_string()],
            created_at: now,
            updated_at: now,
        };
        let source = MockWorkItemSource::new()
            .with_record(record(1, "[PAY-CARD-001] charge"))
            .with_record(record(2, "untitled"));
        let p = pipeline(MockLabelStore::new());
        let items = p.fetch_queue(&source).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].spec_id, "PAY-CARD-001");
        assert_eq!(items[0].item_id, "1");

        let broken = MockWorkItemSource::new().with_error("tracker down");
        assert!(p.fetch_queue(&broken).await.is_err());
    }

    #[tokio::test]
    async fn test_fetched_infra_failure_scores_lower() {
        let now = clock().now();
        let record = |n: u64, labels: &[&str]| WorkItemRecord {
            number: n,
            title: format!("[PAY-CARD-{:03}] charge", n),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            created_at: now - Duration::hours(2),
            updated_at: now - Duration::hours(1),
        };
        let source = MockWorkItemSource::new()
            .with_record(record(1, &["tdd-spec:queued", "file:src/a.ts", "retry:infra:1"]))
            .with_record(record(
                2,
                &["tdd-spec:queued", "file:src/b.ts", "retry:infra:1", "failure:infra"],
            ));
        let p = pipeline(MockLabelStore::new());
        let items = p.fetch_queue(&source).await.unwrap();

        let calc = PriorityCalculator::new();
        let clean = calc.score(&items[0]);
        let failed = calc.score(&items[1]);
        assert_eq!(clean, 75);
        assert_eq!(clean - failed, 25);
    }

    #[test]
    fn test_circuit_recommendation_agrees_with_admission() {
        let p = pipeline(MockLabelStore::new());
        let assessment = p.assess(QueueMetrics::default(), WorkflowMetrics::new(10, 9), false);
        assert_eq!(assessment.circuit_breaker.recommendation, CircuitRecommendation::Open);
    }
}
