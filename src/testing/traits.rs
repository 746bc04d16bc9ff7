//! Trait definitions for the external collaborators.
//!
//! The decision core never talks to the ticket tracker or the clock
//! directly. These traits are the boundary, so every component can be
//! unit tested without a live tracker.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Abstraction for the label/tag store on external work item records.
///
/// Labels are the only persistence for lifecycle state, retry counters and
/// failure type. Implementations use interior mutability so a single store
/// can be shared by the state machine and the pipeline driver.
///
/// # Example
///
/// ```rust,ignore
/// use specloop::testing::LabelStore;
///
/// async fn is_queued(store: &impl LabelStore, id: &str) -> anyhow::Result<bool> {
///     Ok(store.get_labels(id).await?.iter().any(|l| l == "tdd-spec:queued"))
/// }
/// ```
#[async_trait]
pub trait LabelStore: Send + Sync {
    /// Fetch the current labels of an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker cannot be reached.
    async fn get_labels(&self, item_id: &str) -> Result<Vec<String>>;

    /// Attach labels to an item. Already present labels are left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker rejects the update.
    async fn add_labels(&self, item_id: &str, labels: &[String]) -> Result<()>;

    /// Detach labels from an item. Absent labels are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker rejects the update.
    async fn remove_labels(&self, item_id: &str, labels: &[String]) -> Result<()>;
}

/// A work item record as returned by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemRecord {
    /// Tracker-assigned identifier (issue number)
    pub number: u64,
    /// Title, expected to embed a spec id token
    pub title: String,
    /// Current labels
    #[serde(default)]
    pub labels: Vec<String>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record was last touched
    pub updated_at: DateTime<Utc>,
}

/// Abstraction for querying pending and active work items.
#[async_trait]
pub trait WorkItemSource: Send + Sync {
    /// List records carrying a label.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker query fails.
    async fn list_by_label(&self, label: &str) -> Result<Vec<WorkItemRecord>>;
}

/// Time source used by cooldown and health window calculations.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Minutes elapsed since an ISO-8601 timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MalformedTimestamp`] if the value does not
    /// parse as RFC 3339.
    fn age_minutes(&self, iso_timestamp: &str) -> crate::Result<f64> {
        let then = DateTime::parse_from_rfc3339(iso_timestamp)
            .map_err(|_| PipelineError::malformed_timestamp(iso_timestamp))?
            .with_timezone(&Utc);
        Ok(minutes_between(then, self.now()))
    }
}

/// Fractional minutes from `then` to `now` (negative if `then` is later).
#[must_use]
pub fn minutes_between(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - then).num_milliseconds() as f64 / 60_000.0
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
