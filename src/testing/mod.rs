//! Testing infrastructure for specloop.
//!
//! This module provides the collaborator traits, mocks, fixtures and
//! assertions used to exercise the decision core without a live tracker.
//!
//! # Architecture
//!
//! The testing infrastructure is organized into:
//! - **Traits**: Boundaries to external collaborators (label store, work item source, clock)
//! - **Mocks**: Test doubles that implement the traits with controllable behavior
//! - **Fixtures**: Temporary projects and canned tracker records (test-only)
//! - **Assertions**: Label and selection assertions
//!
//! # Example
//!
//! ```rust,ignore
//! use specloop::testing::{FixedClock, MockLabelStore};
//!
//! let store = MockLabelStore::new()
//!     .with_labels("12", &["tdd-spec:queued"])
//!     .with_add_error_after(1, "tracker unavailable");
//!
//! let clock = FixedClock::at(chrono::Utc::now());
//! ```

pub mod assertions;
#[cfg(test)]
pub mod fixtures;
pub mod mocks;
pub mod traits;

// Re-export commonly used types
pub use assertions::*;
#[cfg(test)]
pub use fixtures::*;
pub use mocks::*;
pub use traits::*;
