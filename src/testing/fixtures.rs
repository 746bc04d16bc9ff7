//! Test fixtures for creating reproducible test environments.
//!
//! Provides temporary project directories and canned tracker records.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::path::Path;
use tempfile::TempDir;

use super::traits::WorkItemRecord;
use crate::config::PipelineConfig;

/// A fixed instant used across fixtures.
#[must_use]
pub fn fixture_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0)
        .single()
        .expect("valid fixture timestamp")
}

/// A tracker record touched `idle_minutes` before [`fixture_now`].
#[must_use]
pub fn record(number: u64, title: &str, labels: &[&str], idle_minutes: i64) -> WorkItemRecord {
    let now = fixture_now();
    WorkItemRecord {
        number,
        title: title.to_string(),
        labels: labels.iter().map(|l| l.to_string()).collect(),
        created_at: now - Duration::hours(6),
        updated_at: now - Duration::minutes(idle_minutes),
    }
}

/// A temporary project directory.
///
/// Automatically cleans up when dropped.
pub struct TestProject {
    temp_dir: TempDir,
}

impl TestProject {
    /// Create an empty project.
    ///
    /// # Panics
    ///
    /// Panics if temporary directory creation fails.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Create a project with a settings file.
    ///
    /// # Panics
    ///
    /// Panics if the settings cannot be written.
    #[must_use]
    pub fn with_config(config: &PipelineConfig) -> Self {
        let project = Self::empty();
        config
            .save(project.path())
            .expect("Failed to write settings.json");
        project
    }

    /// Path of the project root.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::WorkItem;

    #[test]
    fn test_record_fixture_builds_work_item() {
        let r = record(12, "[SHOP-CART-004] add item", &["tdd-spec:queued", "file:src/cart.ts"], 0);
        let item = WorkItem::from_record(&r).unwrap();
        assert_eq!(item.file_path, "src/cart.ts");
        assert_eq!(r.updated_at, fixture_now());
    }

    #[test]
    fn test_project_with_config() {
        let mut config = PipelineConfig::default();
        config.scheduler.batch_size = 2;
        let project = TestProject::with_config(&config);
        assert_eq!(PipelineConfig::load(project.path()).unwrap(), config);
    }
}
