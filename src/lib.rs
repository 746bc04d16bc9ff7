//! specloop - decision core for a test-driven agent pipeline
//!
//! A backlog of specs is fed one at a time to an autonomous coding agent.
//! This crate decides what runs next, interprets how each run went, and
//! decides whether to retry, fail, or pause the whole queue.
//!
//! # Architecture
//!
//! The crate is organized into several modules, leaves first:
//!
//! - [`classifier`] - Maps raw run evidence onto a fixed failure taxonomy
//! - [`state_machine`] - Label-encoded lifecycle of each work item
//! - [`retry`] - Backoff, retry budgets and cooldown windows
//! - [`scheduler`] - Priority scoring and per-path exclusive selection
//! - [`health`] - Health assessment and circuit breaker recommendations
//! - [`pipeline`] - One scheduling cycle composed from the above
//! - [`store`] - File-backed label store
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Collaborator traits, mocks and fixtures
//!
//! # Example
//!
//! ```rust,ignore
//! use specloop::pipeline::{CycleAction, Pipeline};
//! use specloop::testing::SystemClock;
//! use specloop::{JsonLabelStore, PipelineConfig};
//!
//! let config = PipelineConfig::load(project)?;
//! let pipeline = Pipeline::new(JsonLabelStore::in_project(project), SystemClock, &config);
//!
//! let admission = pipeline.admission(&control_labels, &assessment);
//! if let CycleAction::Dispatch { items } = pipeline.plan_cycle(&admission, &state, 2) {
//!     for item in &items {
//!         pipeline.start(&mut state, item).await?;
//!     }
//! }
//! ```

pub mod classifier;
pub mod config;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod state_machine;
pub mod store;
pub mod testing;

// Re-export commonly used types
pub use error::{IntoPipelineError, PipelineError, Result};

// Re-export config types
pub use config::{ConfigProblem, PipelineConfig, ValidationReport};

// Re-export classifier types
pub use classifier::{
    classify_error, ClassificationResult, ErrorCategory, ErrorClassifier, ErrorType,
    ExecutionOutcome, Outcome,
};

// Re-export state machine types
pub use state_machine::{
    analyze_labels, is_valid_transition, FailureType, LabelAnalysis, RetryCategory, SpecState,
    SpecStateMachine, MAX_RETRIES,
};

// Re-export retry types
pub use retry::{
    calculate_exponential_backoff, check_cooldown, CooldownStatus, CooldownWindow, RetryConfig,
    RetryContext, RetryDecision, RetryManager,
};

// Re-export scheduler types
pub use scheduler::{
    PriorityCalculator, SchedulerConfig, SchedulerState, SpecSelector, WorkItem,
};

// Re-export health types
pub use health::{HealthAssessment, HealthLevel, HealthMonitor, HealthThresholds};

// Re-export pipeline types
pub use pipeline::{Admission, CycleAction, OutcomeAction, Pipeline};

pub use store::JsonLabelStore;

// Re-export testing types for convenience
pub use testing::{Clock, LabelStore, SystemClock, WorkItemRecord, WorkItemSource};
