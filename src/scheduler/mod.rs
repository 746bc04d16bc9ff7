//! Priority scheduling.
//!
//! - [`work_item`] - [`WorkItem`] and spec id extraction
//! - [`priority`] - [`PriorityCalculator`], the scoring formula
//! - [`selector`] - [`SpecSelector`], admission and ordering
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use specloop::scheduler::{SchedulerState, SpecSelector, WorkItem};
//!
//! let state = SchedulerState::with_queue(vec![
//!     WorkItem::new("AUTH-LOGIN-001", "src/auth/login.ts", Utc::now()),
//!     WorkItem::new("AUTH-LOGIN-002", "src/auth/login.ts", Utc::now()),
//! ]);
//! let batch = SpecSelector::default().select_next(2, &state, Utc::now());
//! assert_eq!(batch.len(), 1);
//! ```

pub mod priority;
pub mod selector;
pub mod work_item;

pub use priority::{PriorityBreakdown, PriorityCalculator};
pub use selector::{SchedulerState, ScoredItem, Selection, SkipReason, SpecSelector};
pub use work_item::{extract_spec_id, path_depth, ErrorKind, ErrorRecord, WorkItem};

use serde::{Deserialize, Serialize};

use crate::state_machine::MAX_RETRIES;

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// Items with this many attempts are no longer admitted
    pub max_retries: u32,
    /// Minimum minutes between attempts of one item
    pub retry_delay_minutes: u32,
    /// Items admitted per cycle when the caller does not say
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry_delay_minutes: 30,
            batch_size: 1,
        }
    }
}
