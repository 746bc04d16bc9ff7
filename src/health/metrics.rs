//! Inputs to the health assessment.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::{analyze_labels, SpecState};

/// Counts of items per state and retries per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueMetrics {
    pub queued: u32,
    pub in_progress: u32,
    pub completed: u32,
    pub failed: u32,
    /// Sum of spec retry counters across items
    pub spec_retries: u32,
    /// Sum of infra retry counters across items
    pub infra_retries: u32,
}

impl QueueMetrics {
    /// Tally a set of label snapshots.
    #[must_use]
    pub fn from_label_sets<I, L, S>(label_sets: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut metrics = Self::default();
        for labels in label_sets {
            let labels: Vec<S> = labels.into_iter().collect();
            let analysis = analyze_labels(&labels);
            let counter = match analysis.current_state {
                Some(SpecState::Queued) => Some(&mut metrics.queued),
                Some(SpecState::InProgress) => Some(&mut metrics.in_progress),
                Some(SpecState::Completed) => Some(&mut metrics.completed),
                Some(SpecState::Failed) => Some(&mut metrics.failed),
                None => None,
            };
            if let Some(counter) = counter {
                *counter = counter.saturating_add(1);
            }
            metrics.spec_retries = metrics
                .spec_retries
                .saturating_add(analysis.spec_retry_count);
            metrics.infra_retries = metrics
                .infra_retries
                .saturating_add(analysis.infra_retry_count);
        }
        metrics
    }

    /// Items still open in the pipeline.
    #[must_use]
    pub fn queue_size(&self) -> u32 {
        self.queued
            .saturating_add(self.in_progress)
            .saturating_add(self.failed)
    }

    /// Retries across both categories.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.spec_retries.saturating_add(self.infra_retries)
    }
}

/// One finished agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub finished_at: DateTime<Utc>,
    pub success: bool,
}

/// Recent run outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowMetrics {
    pub total_runs: u32,
    pub failed_runs: u32,
}

impl WorkflowMetrics {
    /// Metrics from explicit counts.
    #[must_use]
    pub fn new(total_runs: u32, failed_runs: u32) -> Self {
        Self {
            total_runs,
            failed_runs,
        }
    }

    /// Count runs that finished within the last `window_hours`.
    #[must_use]
    pub fn from_runs(runs: &[RunRecord], now: DateTime<Utc>, window_hours: u32) -> Self {
        let cutoff = now - Duration::hours(i64::from(window_hours));
        runs.iter()
            .filter(|r| r.finished_at >= cutoff && r.finished_at <= now)
            .fold(Self::default(), |mut m, r| {
                m.total_runs += 1;
                if !r.success {
                    m.failed_runs += 1;
                }
                m
            })
    }

    /// `round(failed × 100 / total)`, 0 without runs.
    #[must_use]
    pub fn failure_rate_percent(&self) -> u32 {
        if self.total_runs == 0 {
            return 0;
        }
        (f64::from(self.failed_runs) * 100.0 / f64::from(self.total_runs)).round() as u32
    }
}
