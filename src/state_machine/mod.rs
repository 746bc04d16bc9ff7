//! Work item lifecycle state machine.
//!
//! - [`state`] - Lifecycle states, retry categories, failure types and the transition table
//! - [`labels`] - Label formats, snapshot analysis and label diffs
//! - [`machine`] - [`SpecStateMachine`], which applies transitions through a label store
//!
//! ```text
//!  (none) ──> queued ──> in-progress ──> completed
//!               ^            │  │
//!               └────────────┘  └──> failed ──┐
//!               ^                             │
//!               └─────────────────────────────┘
//! ```

pub mod labels;
pub mod machine;
pub mod state;

pub use labels::{
    analyze_labels, failure_label, parse_label, retry_label, state_label, LabelAnalysis,
    LabelDiff, ParsedLabel, MAX_RETRIES, QUEUE_DISABLED_LABEL,
};
pub use machine::SpecStateMachine;
pub use state::{is_valid_transition, FailureType, RetryCategory, SpecState, StateTransition};
