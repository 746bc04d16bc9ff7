//! Mock implementations of the collaborator traits.
//!
//! These mocks provide controllable test doubles for the tracker and the
//! clock, enabling deterministic unit tests.

use super::traits::{Clock, LabelStore, WorkItemRecord, WorkItemSource};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

/// In-memory label store.
///
/// Thread-safe for use in async contexts.
///
/// # Example
///
/// ```rust,ignore
/// let store = MockLabelStore::new().with_labels("12", &["tdd-spec:queued"]);
/// assert_eq!(store.get_labels("12").await?, vec!["tdd-spec:queued"]);
/// ```
#[derive(Debug, Default)]
pub struct MockLabelStore {
    labels: Mutex<HashMap<String, Vec<String>>>,
    write_count: AtomicU32,
    add_count: AtomicU32,
    get_error: Option<String>,
    add_error: Option<String>,
    add_error_after: Option<u32>,
}

impl MockLabelStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an item's labels.
    #[must_use]
    pub fn with_labels(self, item_id: &str, labels: &[&str]) -> Self {
        self.lock()
            .insert(item_id.to_string(), labels.iter().map(|l| l.to_string()).collect());
        self
    }

    /// Make every read fail.
    #[must_use]
    pub fn with_get_error(mut self, error: &str) -> Self {
        self.get_error = Some(error.to_string());
        self
    }

    /// Make every add fail.
    #[must_use]
    pub fn with_add_error(mut self, error: &str) -> Self {
        self.add_error = Some(error.to_string());
        self.add_error_after = Some(0);
        self
    }

    /// Let `successful` adds through, then fail every later add.
    #[must_use]
    pub fn with_add_error_after(mut self, successful: u32, error: &str) -> Self {
        self.add_error = Some(error.to_string());
        self.add_error_after = Some(successful);
        self
    }

    /// Number of add/remove calls that reached the store.
    pub fn write_count(&self) -> u32 {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Snapshot of an item's labels without going through the async trait.
    pub fn snapshot(&self, item_id: &str) -> Vec<String> {
        self.lock().get(item_id).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<String>>> {
        self.labels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LabelStore for MockLabelStore {
    async fn get_labels(&self, item_id: &str) -> Result<Vec<String>> {
        if let Some(ref error) = self.get_error {
            bail!("{}", error);
        }
        Ok(self.snapshot(item_id))
    }

    async fn add_labels(&self, item_id: &str, labels: &[String]) -> Result<()> {
        let attempt = self.add_count.fetch_add(1, Ordering::SeqCst);
        if let (Some(error), Some(after)) = (&self.add_error, self.add_error_after) {
            if attempt >= after {
                bail!("{}", error);
            }
        }
        self.write_count.fetch_add(1, Ordering::SeqCst);
        let mut map = self.lock();
        let entry = map.entry(item_id.to_string()).or_default();
        for label in labels {
            if !entry.contains(label) {
                entry.push(label.clone());
            }
        }
        Ok(())
    }

    async fn remove_labels(&self, item_id: &str, labels: &[String]) -> Result<()> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        if let Some(entry) = self.lock().get_mut(item_id) {
            entry.retain(|l| !labels.contains(l));
        }
        Ok(())
    }
}

/// Mock work item source returning canned records.
#[derive(Debug, Clone, Default)]
pub struct MockWorkItemSource {
    records: Vec<WorkItemRecord>,
    error: Option<String>,
}

impl MockWorkItemSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record.
    #[must_use]
    pub fn with_record(mut self, record: WorkItemRecord) -> Self {
        self.records.push(record);
        self
    }

    /// Make queries fail.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

#[async_trait]
impl WorkItemSource for MockWorkItemSource {
    async fn list_by_label(&self, label: &str) -> Result<Vec<WorkItemRecord>> {
        if let Some(ref error) = self.error {
            bail!("{}", error);
        }
        Ok(self
            .records
            .iter()
            .filter(|r| r.labels.iter().any(|l| l == label))
            .cloned()
            .collect())
    }
}

/// Clock frozen at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    /// Freeze the clock at `now`.
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// A clock advanced by `minutes`.
    #[must_use]
    pub fn advanced_minutes(&self, minutes: i64) -> Self {
        Self {
            now: self.now + Duration::minutes(minutes),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}
