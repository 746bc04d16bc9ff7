//! Work items as seen by the scheduler.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::classifier::{ClassificationResult, ErrorCategory};
use crate::state_machine::{analyze_labels, FailureType};
use crate::testing::WorkItemRecord;

/// Seed priority used when a record carries no `priority:<n>` label.
pub const DEFAULT_SEED_PRIORITY: u8 = 50;

/// Label prefixes that name the grouping path of a record.
const PATH_LABEL_PREFIXES: [&str; 2] = ["file:", "path:"];

/// Label prefix carrying the seed priority.
const PRIORITY_LABEL_PREFIX: &str = "priority:";

/// Kind of a recorded failure, as far as scheduling cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Infrastructure,
    Regression,
    Spec,
    Code,
    Unknown,
}

impl ErrorKind {
    /// Map a classification onto the scheduling error kind.
    #[must_use]
    pub fn from_classification(result: &ClassificationResult) -> Self {
        match result.category {
            ErrorCategory::RateLimit | ErrorCategory::Infrastructure => Self::Infrastructure,
            ErrorCategory::Code => Self::Code,
            ErrorCategory::Auth => Self::Spec,
            ErrorCategory::Success | ErrorCategory::Special | ErrorCategory::Unknown => {
                Self::Unknown
            }
        }
    }
}

impl From<FailureType> for ErrorKind {
    fn from(failure_type: FailureType) -> Self {
        match failure_type {
            FailureType::Infra => Self::Infrastructure,
            FailureType::Regression => Self::Regression,
            FailureType::Spec => Self::Spec,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Infrastructure => "infrastructure",
            Self::Regression => "regression",
            Self::Spec => "spec",
            Self::Code => "code",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// One recorded failure of a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorRecord {
    /// Record an error.
    pub fn new(timestamp: DateTime<Utc>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            kind,
            message: message.into(),
        }
    }
}

/// A pending unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    /// Stable spec identifier, e.g. `AUTH-LOGIN-001`
    pub spec_id: String,
    /// Tracker identifier used for label operations
    #[serde(default)]
    pub item_id: String,
    /// Grouping path; at most one item per path runs at a time
    pub file_path: String,
    /// Seed priority, 0..=100
    #[serde(default = "default_seed_priority")]
    pub priority: u8,
    /// Attempts made so far
    #[serde(default)]
    pub attempts: u32,
    /// Failure history, oldest first
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    /// When the last attempt started
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    /// When the item entered the queue
    pub queued_at: DateTime<Utc>,
}

fn default_seed_priority() -> u8 {
    DEFAULT_SEED_PRIORITY
}

impl WorkItem {
    /// Create a fresh item with the default seed priority.
    pub fn new(
        spec_id: impl Into<String>,
        file_path: impl Into<String>,
        queued_at: DateTime<Utc>,
    ) -> Self {
        let spec_id = spec_id.into();
        Self {
            item_id: spec_id.clone(),
            spec_id,
            file_path: file_path.into(),
            priority: DEFAULT_SEED_PRIORITY,
            attempts: 0,
            errors: Vec::new(),
            last_attempt: None,
            queued_at,
        }
    }

    /// Set the tracker identifier.
    #[must_use]
    pub fn with_item_id(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = item_id.into();
        self
    }

    /// Set the seed priority, clamped to 100.
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(100);
        self
    }

    /// Set the attempt count.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the last attempt time.
    #[must_use]
    pub fn with_last_attempt(mut self, at: DateTime<Utc>) -> Self {
        self.last_attempt = Some(at);
        self
    }

    /// Append an error record.
    #[must_use]
    pub fn with_error(mut self, record: ErrorRecord) -> Self {
        self.errors.push(record);
        self
    }

    /// Most recent error, by timestamp.
    #[must_use]
    pub fn latest_error(&self) -> Option<&ErrorRecord> {
        self.errors.iter().max_by_key(|e| e.timestamp)
    }

    /// Grouping path with surrounding slashes and whitespace removed.
    #[must_use]
    pub fn lock_key(&self) -> String {
        normalize_path(&self.file_path)
    }

    /// Number of non-empty `/`-separated segments of the grouping path.
    #[must_use]
    pub fn path_depth(&self) -> usize {
        path_depth(&self.file_path)
    }

    /// Build a work item from a tracker record.
    ///
    /// Returns `None` if the title carries no spec id. A stored failure
    /// label on a retried record becomes its latest error, stamped at the
    /// record's last update.
    #[must_use]
    pub fn from_record(record: &WorkItemRecord) -> Option<Self> {
        let spec_id = extract_spec_id(&record.title)?;
        let analysis = analyze_labels(&record.labels);

        let file_path = record
            .labels
            .iter()
            .find_map(|label| {
                PATH_LABEL_PREFIXES
                    .iter()
                    .find_map(|prefix| label.strip_prefix(prefix))
            })
            .map(normalize_path)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| fallback_path(&spec_id));

        let priority = record
            .labels
            .iter()
            .find_map(|label| label.strip_prefix(PRIORITY_LABEL_PREFIX))
            .and_then(|n| n.trim().parse::<u32>().ok())
            .map_or(DEFAULT_SEED_PRIORITY, |n| n.min(100) as u8);

        let attempts = analysis.total_retries();
        let errors = match analysis.failure_type {
            Some(failure_type) if attempts > 0 => vec![ErrorRecord::new(
                record.updated_at,
                failure_type.into(),
                format!("failure:{}", failure_type),
            )],
            _ => Vec::new(),
        };

        Some(Self {
            spec_id,
            item_id: record.number.to_string(),
            file_path,
            priority,
            attempts,
            errors,
            last_attempt: (attempts > 0).then_some(record.updated_at),
            queued_at: record.created_at,
        })
    }
}

/// Find the first `DOMAIN-AREA-NNN` token in a title.
#[must_use]
pub fn extract_spec_id(title: &str) -> Option<String> {
    static SPEC_ID: OnceLock<Option<Regex>> = OnceLock::new();
    SPEC_ID
        .get_or_init(|| Regex::new(r"\b[A-Z][A-Z0-9]*-[A-Z][A-Z0-9]*-\d{3,}\b").ok())
        .as_ref()?
        .find(title)
        .map(|m| m.as_str().to_string())
}

/// Number of non-empty `/`-separated segments.
#[must_use]
pub fn path_depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.trim().is_empty()).count()
}

fn normalize_path(path: &str) -> String {
    path.trim().trim_matches('/').to_string()
}

/// Items without a path label are grouped by the domain and area of their id.
fn fallback_path(spec_id: &str) -> String {
    spec_id
        .split('-')
        .take(2)
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("/")
}
