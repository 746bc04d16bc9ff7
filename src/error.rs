//! Custom error types for specloop.
//!
//! Only structural failures surface here. A "do not retry" decision or an
//! unrecognized log is a normal value returned by the decision functions,
//! never an error.

use std::path::PathBuf;
use thiserror::Error;

use crate::state_machine::SpecState;

/// Main error type for specloop operations
#[derive(Error, Debug)]
pub enum PipelineError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Requested lifecycle transition is not in the transition table
    #[error("Invalid transition for {item}: {} -> {to}", describe_state(.from))]
    InvalidTransition {
        item: String,
        from: Option<SpecState>,
        to: SpecState,
    },

    /// A two-step mutation applied its first step but not its second
    #[error("Partial mutation on {item}: {completed} applied, {failed} failed: {message}")]
    PartialMutation {
        item: String,
        completed: String,
        failed: String,
        message: String,
    },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// Timestamp could not be parsed as ISO-8601
    #[error("Malformed timestamp: {value}")]
    MalformedTimestamp { value: String },

    /// Label store read or write failed
    #[error("Label store error during {operation} on {item}: {message}")]
    LabelStore {
        operation: String,
        item: String,
        message: String,
    },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create a label store error
    pub fn label_store(
        operation: impl Into<String>,
        item: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::LabelStore {
            operation: operation.into(),
            item: item.into(),
            message: message.into(),
        }
    }

    /// Create a malformed timestamp error
    pub fn malformed_timestamp(value: impl Into<String>) -> Self {
        Self::MalformedTimestamp {
            value: value.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if the failed operation can simply be attempted again
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LabelStore { .. } | Self::PartialMutation { .. } | Self::Io(_)
        )
    }

    /// Check if this error signals a workflow bug that needs a human
    pub fn requires_human(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::Config { .. } | Self::InvalidConfig { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidTransition { .. } => 2,
            Self::PartialMutation { .. } => 3,
            Self::LabelStore { .. } => 4,
            Self::MalformedTimestamp { .. } => 5,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

fn describe_state(state: &Option<SpecState>) -> String {
    state.map_or_else(|| "none".to_string(), |s| s.to_string())
}

/// Type alias for specloop results
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for converting anyhow errors to PipelineError
pub trait IntoPipelineError<T> {
    fn into_pipeline_config(self) -> Result<T>;
    fn into_label_store(self, operation: &str, item: &str) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoPipelineError<T> for std::result::Result<T, E> {
    fn into_pipeline_config(self) -> Result<T> {
        self.map_err(|e| PipelineError::config(e.into().to_string()))
    }

    fn into_label_store(self, operation: &str, item: &str) -> Result<T> {
        self.map_err(|e| PipelineError::label_store(operation, item, e.into().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_display() {
        let err = PipelineError::InvalidTransition {
            item: "42".into(),
            from: Some(SpecState::Completed),
            to: SpecState::Queued,
        };
        let text = err.to_string();
        assert!(text.contains("42"));
        assert!(text.contains("completed -> queued"));
    }

    #[test]
    fn test_invalid_transition_from_none_display() {
        let err = PipelineError::InvalidTransition {
            item: "7".into(),
            from: None,
            to: SpecState::Failed,
        };
        assert!(err.to_string().contains("none -> failed"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(PipelineError::label_store("add", "1", "502").is_recoverable());
        assert!(!PipelineError::config("bad").is_recoverable());
    }

    #[test]
    fn test_requires_human() {
        let err = PipelineError::InvalidTransition {
            item: "1".into(),
            from: Some(SpecState::Queued),
            to: SpecState::Completed,
        };
        assert!(err.requires_human());
        assert!(!PipelineError::malformed_timestamp("yesterday").requires_human());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(PipelineError::config("test").exit_code(), 7);
        assert_eq!(PipelineError::label_store("get", "1", "x").exit_code(), 4);
        assert_eq!(PipelineError::malformed_timestamp("x").exit_code(), 5);
    }

    #[test]
    fn test_config_with_path() {
        let path = PathBuf::from("/test/settings.json");
        let err = PipelineError::config_with_path("failed to parse", path.clone());
        if let PipelineError::Config {
            message,
            path: opt_path,
        } = err
        {
            assert_eq!(message, "failed to parse");
            assert_eq!(opt_path, Some(path));
        } else {
            panic!("Wrong error variant");
        }
    }

    #[test]
    fn test_into_label_store_trait() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ));

        match result.into_label_store("remove", "12") {
            Err(PipelineError::LabelStore {
                operation,
                item,
                message,
            }) => {
                assert_eq!(operation, "remove");
                assert_eq!(item, "12");
                assert!(message.contains("connection reset"));
            }
            _ => panic!("Wrong error variant after conversion"),
        }
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: PipelineError = io_err.into();
        assert!(matches!(err, PipelineError::Io(_)));
        assert!(err.to_string().contains("access denied"));
    }
}
