//! Spec selection with per-path exclusivity.
//!
//! Eligible items are grouped by grouping path. Each group is represented
//! by its best-scoring member, groups are visited best first, and at most
//! one item is taken from a group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::debug;

use super::priority::PriorityCalculator;
use super::work_item::WorkItem;
use super::SchedulerConfig;
use crate::retry::check_cooldown;

/// Scheduling state owned by the caller and passed back on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerState {
    /// Pending items
    #[serde(default)]
    pub queue: Vec<WorkItem>,
    /// Spec ids currently executing
    #[serde(default)]
    pub active: HashSet<String>,
    /// Grouping paths held by executing items
    #[serde(default)]
    pub locked_paths: HashSet<String>,
}

impl SchedulerState {
    /// State over a queue with nothing in flight.
    #[must_use]
    pub fn with_queue(queue: Vec<WorkItem>) -> Self {
        Self {
            queue,
            ..Self::default()
        }
    }

    /// Record that an item started executing.
    pub fn mark_started(&mut self, item: &WorkItem) {
        self.active.insert(item.spec_id.clone());
        self.locked_paths.insert(item.lock_key());
    }

    /// Record that an item stopped executing.
    pub fn mark_finished(&mut self, item: &WorkItem) {
        self.active.remove(&item.spec_id);
        self.locked_paths.remove(&item.lock_key());
    }

    /// Whether an item is executing.
    #[must_use]
    pub fn is_active(&self, spec_id: &str) -> bool {
        self.active.contains(spec_id)
    }

    /// Whether a grouping path is held.
    #[must_use]
    pub fn is_locked(&self, path: &str) -> bool {
        self.locked_paths.contains(path.trim().trim_matches('/'))
    }
}

/// Why an item was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "reason")]
pub enum SkipReason {
    /// Attempts already at the configured maximum
    RetriesExhausted,
    /// Another item holds the grouping path
    PathLocked,
    /// The item itself is executing
    AlreadyActive,
    /// Last attempt too recent
    Cooldown { remaining_minutes: u64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted => write!(f, "retries exhausted"),
            Self::PathLocked => write!(f, "path locked"),
            Self::AlreadyActive => write!(f, "already active"),
            Self::Cooldown { remaining_minutes } => {
                write!(f, "cooling down ({}m left)", remaining_minutes)
            }
        }
    }
}

/// Admitted item with its score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredItem {
    pub item: WorkItem,
    /// Whole-number score for display
    pub score: u8,
    /// Exact score in half points; decides the order
    pub rank: u16,
}

/// Full outcome of one selection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Admitted items, best first
    pub selected: Vec<ScoredItem>,
    /// Ineligible items and why
    pub skipped: Vec<(String, SkipReason)>,
    /// Eligible items left behind because their path group was already used
    pub deferred: Vec<String>,
}

impl Selection {
    /// Admitted work items, best first.
    #[must_use]
    pub fn items(&self) -> Vec<WorkItem> {
        self.selected.iter().map(|s| s.item.clone()).collect()
    }
}

/// Picks the next batch of work.
#[derive(Debug, Clone, Default)]
pub struct SpecSelector {
    config: SchedulerConfig,
    calculator: PriorityCalculator,
}

impl SpecSelector {
    /// Create a selector.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            calculator: PriorityCalculator::new(),
        }
    }

    /// Scheduler configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Check a single item for admission.
    ///
    /// # Errors
    ///
    /// Returns the first reason the item is ineligible.
    pub fn check_eligible(
        &self,
        item: &WorkItem,
        state: &SchedulerState,
        now: DateTime<Utc>,
    ) -> Result<(), SkipReason> {
        if item.attempts >= self.config.max_retries {
            return Err(SkipReason::RetriesExhausted);
        }
        if state.is_active(&item.spec_id) {
            return Err(SkipReason::AlreadyActive);
        }
        if state.is_locked(&item.file_path) {
            return Err(SkipReason::PathLocked);
        }
        if let Some(last) = item.last_attempt {
            let status = check_cooldown(last, f64::from(self.config.retry_delay_minutes), now);
            if status.is_in_cooldown {
                return Err(SkipReason::Cooldown {
                    remaining_minutes: status.remaining_minutes,
                });
            }
        }
        Ok(())
    }

    /// Select up to `count` items, at most one per grouping path.
    #[must_use]
    pub fn select_next(
        &self,
        count: usize,
        state: &SchedulerState,
        now: DateTime<Utc>,
    ) -> Vec<WorkItem> {
        self.select(count, state, now).items()
    }

    /// Select up to `count` items and report why the rest were left out.
    #[must_use]
    pub fn select(&self, count: usize, state: &SchedulerState, now: DateTime<Utc>) -> Selection {
        let mut selection = Selection::default();
        let mut groups: BTreeMap<String, Vec<ScoredItem>> = BTreeMap::new();

        for item in &state.queue {
            match self.check_eligible(item, state, now) {
                Ok(()) => {
                    let breakdown = self.calculator.breakdown(item);
                    groups.entry(item.lock_key()).or_default().push(ScoredItem {
                        score: breakdown.score,
                        rank: breakdown.half_points,
                        item: item.clone(),
                    });
                }
                Err(reason) => selection.skipped.push((item.spec_id.clone(), reason)),
            }
        }

        let mut representatives: Vec<ScoredItem> = Vec::with_capacity(groups.len());
        for (_, mut members) in groups {
            members.sort_by(best_first);
            let mut members = members.into_iter();
            if let Some(best) = members.next() {
                representatives.push(best);
            }
            selection
                .deferred
                .extend(members.map(|m| m.item.spec_id));
        }

        representatives.sort_by(best_first);
        let overflow = representatives.split_off(count.min(representatives.len()));
        selection
            .deferred
            .extend(overflow.into_iter().map(|m| m.item.spec_id));
        selection.selected = representatives;

        debug!(
            requested = count,
            selected = selection.selected.len(),
            skipped = selection.skipped.len(),
            deferred = selection.deferred.len(),
            "Selection complete"
        );
        selection
    }
}

/// Higher exact score first, then older items, then spec id.
fn best_first(a: &ScoredItem, b: &ScoredItem) -> std::cmp::Ordering {
    b.rank
        .cmp(&a.rank)
        .then_with(|| a.item.queued_at.cmp(&b.item.queued_at))
        .then_with(|| a.item.spec_id.cmp(&b.item.spec_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(id: &str, path: &str) -> WorkItem {
        WorkItem::new(id, path, Utc::now() - Duration::hours(1))
    }

    fn selector() -> SpecSelector {
        SpecSelector::default()
    }

    #[test]
    fn test_empty_queue_selects_nothing() {
        let selected = selector().select_next(5, &SchedulerState::default(), Utc::now());
        assert!(selected.is_empty());
    }

    #[test]
    fn test_one_item_per_path() {
        let state = SchedulerState::with_queue(vec![
            item("A-A-001", "src/a.ts"),
            item("A-A-002", "src/a.ts").with_priority(90),
            item("B-B-001", "src/b.ts"),
        ]);
        let selection = selector().select(10, &state, Utc::now());
        let ids: Vec<_> = selection.selected.iter().map(|s| s.item.spec_id.as_str()).collect();
        assert_eq!(ids, vec!["A-A-002", "B-B-001"]);
        assert_eq!(selection.deferred, vec!["A-A-001".to_string()]);
    }

    #[test]
    fn test_never_two_items_of_one_path() {
        let paths = ["src/a.ts", "src/b.ts", "/src/a.ts", "src/c/d.ts", "src/b.ts/"];
        let mut queue = Vec::new();
        for i in 0..40u32 {
            queue.push(
                item(&format!("X-Y-{:03}", i), paths[i as usize % paths.len()])
                    .with_priority((i * 7 % 101) as u8)
                    .with_attempts(i % 3),
            );
        }
        let state = SchedulerState::with_queue(queue);
        for n in 0..8 {
            let selected = selector().select_next(n, &state, Utc::now());
            let keys: HashSet<String> = selected.iter().map(WorkItem::lock_key).collect();
            assert_eq!(keys.len(), selected.len());
            assert!(selected.len() <= n);
        }
    }

    #[test]
    fn test_groups_ordered_by_best_score() {
        let state = SchedulerState::with_queue(vec![
            item("LOW-A-001", "a/b/c/d/e/f").with_priority(10),
            item("HIGH-A-001", "src/x.ts").with_priority(90),
            item("MID-A-001", "src/y.ts"),
        ]);
        let ids: Vec<String> = selector()
            .select_next(2, &state, Utc::now())
            .into_iter()
            .map(|i| i.spec_id)
            .collect();
        assert_eq!(ids, vec!["HIGH-A-001", "MID-A-001"]);
    }

    #[test]
    fn test_half_point_priority_beats_older_item() {
        let now = Utc::now();
        let state = SchedulerState::with_queue(vec![
            WorkItem::new("OLD-A-001", "src/a.ts", now - Duration::hours(3)).with_priority(49),
            WorkItem::new("NEW-A-001", "src/a.ts", now - Duration::hours(1)).with_priority(50),
        ]);
        let selection = selector().select(1, &state, now);
        assert_eq!(selection.selected[0].item.spec_id, "NEW-A-001");
        assert_eq!(selection.selected[0].score, 85);
        assert_eq!(selection.deferred, vec!["OLD-A-001".to_string()]);
    }

    #[test]
    fn test_ties_break_deterministically() {
        let queued = Utc::now() - Duration::hours(1);
        let state = SchedulerState::with_queue(vec![
            WorkItem::new("B-B-001", "src/b.ts", queued),
            WorkItem::new("A-A-001", "src/a.ts", queued),
        ]);
        let ids: Vec<String> = selector()
            .select_next(1, &state, Utc::now())
            .into_iter()
            .map(|i| i.spec_id)
            .collect();
        assert_eq!(ids, vec!["A-A-001"]);
    }

    #[test]
    fn test_filters() {
        let now = Utc::now();
        let mut state = SchedulerState::with_queue(vec![
            item("DONE-A-001", "src/done.ts").with_attempts(3),
            item("LOCK-A-001", "src/locked.ts"),
            item("ACT-A-001", "src/active.ts"),
            item("COOL-A-001", "src/cool.ts")
                .with_attempts(1)
                .with_last_attempt(now - Duration::minutes(5)),
            item("OK-A-001", "src/ok.ts")
                .with_attempts(1)
                .with_last_attempt(now - Duration::minutes(45)),
        ]);
        state.locked_paths.insert("src/locked.ts".into());
        state.active.insert("ACT-A-001".into());

        let selection = selector().select(10, &state, now);
        let ids: Vec<_> = selection.selected.iter().map(|s| s.item.spec_id.as_str()).collect();
        assert_eq!(ids, vec!["OK-A-001"]);

        let reasons: std::collections::HashMap<_, _> = selection.skipped.into_iter().collect();
        assert_eq!(reasons["DONE-A-001"], SkipReason::RetriesExhausted);
        assert_eq!(reasons["LOCK-A-001"], SkipReason::PathLocked);
        assert_eq!(reasons["ACT-A-001"], SkipReason::AlreadyActive);
        assert_eq!(reasons["COOL-A-001"], SkipReason::Cooldown { remaining_minutes: 25 });
    }

    #[test]
    fn test_mark_started_and_finished() {
        let a = item("A-A-001", "/src/a.ts");
        let b = item("A-A-002", "src/a.ts");
        let mut state = SchedulerState::with_queue(vec![a.clone(), b.clone()]);

        state.mark_started(&a);
        assert!(state.is_locked("src/a.ts"));
        assert!(selector().select_next(5, &state, Utc::now()).is_empty());

        state.mark_finished(&a);
        assert!(!state.is_active("A-A-001"));
        assert_eq!(selector().select_next(5, &state, Utc::now()).len(), 1);
    }
}
