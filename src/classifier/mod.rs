//! Error classification for agent runs.
//!
//! Turns raw evidence from one execution (log text, coarse outcome, and
//! whether an artifact such as a pushed branch exists) into a
//! [`ClassificationResult`] the retry manager can act on.
//!
//! # Architecture
//!
//! ```text
//! (log, outcome, artifact)
//!        │
//!        ▼
//!   overrides ── success / cancelled / sdk crash / post-processing 404
//!        │
//!        ▼
//!   pattern table ── api limit → auth → host limit → infra → code
//!        │
//!        ▼
//!   CLAUDE_FAILURE (fail open: infra, retryable)
//! ```
//!
//! # Example
//!
//! ```
//! use specloop::classifier::{classify_error, ErrorType, Outcome};
//!
//! let log = r#"{"type":"result","subtype":"success"}"#;
//! let result = classify_error(log, Outcome::Failure, false);
//! assert_eq!(result.error_type, ErrorType::SdkCrashAfterSuccess);
//! assert!(!result.is_retryable);
//! ```

pub mod patterns;

pub use patterns::{compile_patterns, ErrorPattern, PatternGroup};

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

use crate::state_machine::RetryCategory;

/// Signature the agent SDK prints when a run finished successfully.
///
/// Detection is a plain substring search on unstructured output, so a change
/// in the SDK's log format silently disables it.
pub const SUCCESS_MARKER: &str = r#""type":"result","subtype":"success""#;

/// Longest matched log line kept on a classification.
const MAX_MATCHED_LINE_LEN: usize = 240;

// ============================================================================
// Outcome
// ============================================================================

/// Coarse outcome reported by the execution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Run finished successfully
    Success,
    /// Run failed
    Failure,
    /// Run was cancelled (usually a timeout upstream)
    Cancelled,
    /// Run was skipped
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
            Outcome::Cancelled => write!(f, "cancelled"),
            Outcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// Everything the execution layer hands back about one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    /// Raw log text
    pub log: String,
    /// Coarse outcome
    pub outcome: Outcome,
    /// Whether the run left an artifact behind (e.g. a pushed branch)
    pub artifact_produced: bool,
}

impl ExecutionOutcome {
    /// Build an outcome value.
    pub fn new(log: impl Into<String>, outcome: Outcome, artifact_produced: bool) -> Self {
        Self {
            log: log.into(),
            outcome,
            artifact_produced,
        }
    }
}

// ============================================================================
// Taxonomy
// ============================================================================

/// Specific error type reported by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    Success,
    RateLimit,
    ApiOverloaded,
    CreditExhausted,
    AuthError,
    GithubRateLimit,
    PermissionError,
    Timeout,
    NetworkError,
    OutOfMemory,
    DiskFull,
    Cancelled,
    LintError,
    TestFailure,
    SyntaxError,
    TypeError,
    SdkCrashAfterSuccess,
    #[serde(rename = "POST_PROCESSING_404")]
    PostProcessing404,
    ClaudeFailure,
}

impl ErrorType {
    /// Wire name of the error type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::RateLimit => "RATE_LIMIT",
            Self::ApiOverloaded => "API_OVERLOADED",
            Self::CreditExhausted => "CREDIT_EXHAUSTED",
            Self::AuthError => "AUTH_ERROR",
            Self::GithubRateLimit => "GITHUB_RATE_LIMIT",
            Self::PermissionError => "PERMISSION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::DiskFull => "DISK_FULL",
            Self::Cancelled => "CANCELLED",
            Self::LintError => "LINT_ERROR",
            Self::TestFailure => "TEST_FAILURE",
            Self::SyntaxError => "SYNTAX_ERROR",
            Self::TypeError => "TYPE_ERROR",
            Self::SdkCrashAfterSuccess => "SDK_CRASH_AFTER_SUCCESS",
            Self::PostProcessing404 => "POST_PROCESSING_404",
            Self::ClaudeFailure => "CLAUDE_FAILURE",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Broad category of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// No error
    Success,
    /// Agent API limit; pause and cool down
    RateLimit,
    /// Credentials problem; needs a human
    Auth,
    /// Environment failure; fast retry
    Infrastructure,
    /// Produced code is wrong; retry with guidance
    Code,
    /// Signals that disagree with each other; treat work as done
    Special,
    /// Nothing matched
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::Infrastructure => "infrastructure",
            Self::Code => "code",
            Self::Special => "special",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Classification Result
// ============================================================================

/// Structured verdict on one execution. Recomputed from evidence, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    /// Specific error type
    pub error_type: ErrorType,
    /// Broad category
    pub category: ErrorCategory,
    /// Charged to the infrastructure retry budget
    pub is_infrastructure: bool,
    /// Worth another attempt
    pub is_retryable: bool,
    /// Whole queue should stop admitting work
    pub should_pause_queue: bool,
    /// The agent finished but crashed before publishing
    pub sdk_crash_after_success: bool,
    /// Human-readable summary
    pub message: String,
    /// Fix guidance for code failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    /// First log line that triggered the match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_line: Option<String>,
}

impl ClassificationResult {
    fn base(error_type: ErrorType, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            error_type,
            category,
            is_infrastructure: false,
            is_retryable: false,
            should_pause_queue: false,
            sdk_crash_after_success: false,
            message: message.into(),
            guidance: None,
            matched_line: None,
        }
    }

    /// The run succeeded.
    #[must_use]
    pub fn success() -> Self {
        Self::base(ErrorType::Success, ErrorCategory::Success, "Run succeeded")
    }

    /// Cancelled runs are treated like timeouts.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            is_infrastructure: true,
            is_retryable: true,
            ..Self::base(
                ErrorType::Timeout,
                ErrorCategory::Infrastructure,
                "Run was cancelled (treated as timeout)",
            )
        }
    }

    /// Success marker present but nothing was published.
    #[must_use]
    pub fn sdk_crash_after_success() -> Self {
        Self {
            sdk_crash_after_success: true,
            ..Self::base(
                ErrorType::SdkCrashAfterSuccess,
                ErrorCategory::Special,
                "Agent reported success but crashed before publishing its work",
            )
        }
    }

    /// Run reported failure although its artifact exists.
    #[must_use]
    pub fn post_processing_404() -> Self {
        Self::base(
            ErrorType::PostProcessing404,
            ErrorCategory::Special,
            "Run reported failure after its artifact was produced (post-processing false negative)",
        )
    }

    /// Nothing matched; fail open.
    #[must_use]
    pub fn unknown_failure() -> Self {
        Self {
            is_infrastructure: true,
            is_retryable: true,
            ..Self::base(
                ErrorType::ClaudeFailure,
                ErrorCategory::Unknown,
                "Unrecognized agent failure",
            )
        }
    }

    fn from_pattern(pattern: &ErrorPattern, log: &str) -> Self {
        Self {
            error_type: pattern.error_type,
            category: pattern.group.category(),
            is_infrastructure: pattern.group.is_infrastructure(),
            is_retryable: pattern.group.is_retryable(),
            should_pause_queue: pattern.group.should_pause_queue(),
            sdk_crash_after_success: false,
            message: pattern.description.to_string(),
            guidance: pattern.guidance.map(str::to_string),
            matched_line: pattern.matching_line(log).map(truncate_line),
        }
    }

    /// Whether the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error_type == ErrorType::Success
    }

    /// Whether downstream steps should treat the work as done.
    #[must_use]
    pub fn treats_work_as_done(&self) -> bool {
        self.is_success() || self.category == ErrorCategory::Special
    }

    /// Retry budget this failure draws from.
    #[must_use]
    pub fn retry_category(&self) -> RetryCategory {
        RetryCategory::from_infrastructure(self.is_infrastructure)
    }

    /// One-line summary for logs and comments.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("[{}]", self.error_type), self.message.clone()];
        if let Some(ref line) = self.matched_line {
            parts.push(format!("({})", line));
        }
        parts.join(" ")
    }
}

fn truncate_line(line: &str) -> String {
    let line = line.trim();
    if line.chars().count() <= MAX_MATCHED_LINE_LEN {
        return line.to_string();
    }
    let mut truncated: String = line.chars().take(MAX_MATCHED_LINE_LEN).collect();
    truncated.push('…');
    truncated
}

// ============================================================================
// Classifier
// ============================================================================

/// Classifies execution outcomes against the ordered pattern table.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    patterns: Vec<ErrorPattern>,
    regression: Option<Regex>,
}

impl ErrorClassifier {
    /// Create a classifier with the built-in pattern table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            patterns: compile_patterns(),
            regression: Regex::new(
                r"(?i)\bregression\b|previously passing|(?:was|were) passing before|broke existing tests?",
            )
            .ok(),
        }
    }

    /// The compiled table, in check order.
    #[must_use]
    pub fn patterns(&self) -> &[ErrorPattern] {
        &self.patterns
    }

    /// Classify one run.
    ///
    /// Overrides apply before the pattern table:
    /// 1. `Success` outcome is always `SUCCESS`.
    /// 2. `Cancelled` outcome is a timeout-equivalent infrastructure error.
    /// 3. Success marker without an artifact is `SDK_CRASH_AFTER_SUCCESS`.
    /// 4. `Failure` outcome with an artifact is `POST_PROCESSING_404`.
    #[must_use]
    pub fn classify(
        &self,
        log: &str,
        outcome: Outcome,
        artifact_produced: bool,
    ) -> ClassificationResult {
        let result = self.classify_inner(log, outcome, artifact_produced);
        debug!(
            outcome = %outcome,
            artifact_produced,
            error_type = %result.error_type,
            category = %result.category,
            retryable = result.is_retryable,
            "Classified execution outcome"
        );
        result
    }

    /// Classify an [`ExecutionOutcome`].
    #[must_use]
    pub fn classify_outcome(&self, execution: &ExecutionOutcome) -> ClassificationResult {
        self.classify(&execution.log, execution.outcome, execution.artifact_produced)
    }

    fn classify_inner(
        &self,
        log: &str,
        outcome: Outcome,
        artifact_produced: bool,
    ) -> ClassificationResult {
        match outcome {
            Outcome::Success => return ClassificationResult::success(),
            Outcome::Cancelled => return ClassificationResult::cancelled(),
            Outcome::Failure | Outcome::Skipped => {}
        }

        let has_marker = log.contains(SUCCESS_MARKER);
        if has_marker && !artifact_produced {
            return ClassificationResult::sdk_crash_after_success();
        }
        if outcome == Outcome::Failure && artifact_produced {
            return ClassificationResult::post_processing_404();
        }

        self.patterns
            .iter()
            .find(|p| p.is_match(log))
            .map(|p| ClassificationResult::from_pattern(p, log))
            .unwrap_or_else(ClassificationResult::unknown_failure)
    }

    /// Whether the log suggests previously passing behavior broke.
    #[must_use]
    pub fn mentions_regression(&self, log: &str) -> bool {
        self.regression.as_ref().is_some_and(|re| re.is_match(log))
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify with a shared, lazily compiled classifier.
#[must_use]
pub fn classify_error(
    log: &str,
    outcome: Outcome,
    artifact_produced: bool,
) -> ClassificationResult {
    static CLASSIFIER: OnceLock<ErrorClassifier> = OnceLock::new();
    CLASSIFIER
        .get_or_init(ErrorClassifier::new)
        .classify(log, outcome, artifact_produced)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER_LOG: &str = r#"{"type":"result","subtype":"success"}"#;

    fn classify(log: &str) -> ClassificationResult {
        classify_error(log, Outcome::Failure, false)
    }

    // =========================================================================
    // Overrides
    // =========================================================================

    #[test]
    fn test_success_outcome_ignores_log() {
        for log in ["", "429 Too Many Requests", "authentication_error", MARKER_LOG] {
            for artifact in [true, false] {
                let result = classify_error(log, Outcome::Success, artifact);
                assert_eq!(result.error_type, ErrorType::Success);
                assert_eq!(result.category, ErrorCategory::Success);
                assert!(result.treats_work_as_done());
            }
        }
    }

    #[test]
    fn test_cancelled_is_timeout_infra() {
        let result = classify_error("authentication_error", Outcome::Cancelled, false);
        assert_eq!(result.error_type, ErrorType::Timeout);
        assert_eq!(result.category, ErrorCategory::Infrastructure);
        assert!(result.is_infrastructure);
        assert!(result.is_retryable);
        assert!(!result.should_pause_queue);
    }

    #[test]
    fn test_sdk_crash_after_success() {
        let result = classify_error(MARKER_LOG, Outcome::Failure, false);
        assert_eq!(result.error_type, ErrorType::SdkCrashAfterSuccess);
        assert_eq!(result.category, ErrorCategory::Special);
        assert!(result.sdk_crash_after_success);
        assert!(!result.is_retryable);
        assert!(result.treats_work_as_done());
    }

    #[test]
    fn test_sdk_crash_marker_beats_patterns() {
        let log = format!("Error: 429 Too Many Requests\n{}\n", MARKER_LOG);
        let result = classify_error(&log, Outcome::Failure, false);
        assert_eq!(result.error_type, ErrorType::SdkCrashAfterSuccess);
    }

    #[test]
    fn test_post_processing_404_with_marker() {
        let result = classify_error(MARKER_LOG, Outcome::Failure, true);
        assert_eq!(result.error_type, ErrorType::PostProcessing404);
        assert_eq!(result.category, ErrorCategory::Special);
        assert!(!result.is_retryable);
        assert!(!result.sdk_crash_after_success);
    }

    #[test]
    fn test_post_processing_404_without_marker() {
        let result = classify_error("gh: Not Found (HTTP 404)", Outcome::Failure, true);
        assert_eq!(result.error_type, ErrorType::PostProcessing404);
    }

    #[test]
    fn test_skipped_with_artifact_uses_patterns() {
        let result = classify_error("ETIMEDOUT", Outcome::Skipped, true);
        assert_eq!(result.error_type, ErrorType::Timeout);
    }

    // =========================================================================
    // Pattern table
    // =========================================================================

    #[test]
    fn test_api_limits_pause_queue() {
        for (log, expected) in [
            ("Error: 429 Too Many Requests", ErrorType::RateLimit),
            (r#"{"type":"error","error":{"type":"overloaded_error"}}"#, ErrorType::ApiOverloaded),
            ("Your credit balance is too low to access the API", ErrorType::CreditExhausted),
            ("Claude AI usage limit reached|1760000000", ErrorType::CreditExhausted),
        ] {
            let result = classify(log);
            assert_eq!(result.error_type, expected, "{}", log);
            assert_eq!(result.category, ErrorCategory::RateLimit);
            assert!(result.is_retryable);
            assert!(result.should_pause_queue);
        }
    }

    #[test]
    fn test_rate_limit_checked_before_timeout() {
        let log = "request timed out\nrate_limit_error: slow down";
        assert_eq!(classify(log).error_type, ErrorType::RateLimit);
    }

    #[test]
    fn test_auth_is_not_retryable() {
        let result = classify("Error: Invalid API key · Please run /login");
        assert_eq!(result.error_type, ErrorType::AuthError);
        assert_eq!(result.category, ErrorCategory::Auth);
        assert!(!result.is_retryable);
        assert!(!result.should_pause_queue);
    }

    #[test]
    fn test_host_rate_limit_is_fast_retry() {
        let result = classify("gh: API rate limit exceeded for installation ID 1234");
        assert_eq!(result.error_type, ErrorType::GithubRateLimit);
        assert_eq!(result.category, ErrorCategory::Infrastructure);
        assert!(result.is_retryable);
        assert!(!result.should_pause_queue);
        assert!(result.is_infrastructure);
    }

    #[test]
    fn test_infrastructure_patterns() {
        for (log, expected) in [
            ("fatal: could not read Username: Permission denied", ErrorType::PermissionError),
            (
                "The job running on runner X has exceeded the maximum execution time; timed out",
                ErrorType::Timeout,
            ),
            ("Error: read ECONNRESET", ErrorType::NetworkError),
            (
                "FATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory",
                ErrorType::OutOfMemory,
            ),
            ("ENOSPC: no space left on device, write", ErrorType::DiskFull),
            ("Error: The operation was canceled.", ErrorType::Cancelled),
        ] {
            let result = classify(log);
            assert_eq!(result.error_type, expected, "{}", log);
            assert_eq!(result.category, ErrorCategory::Infrastructure);
            assert!(result.is_infrastructure);
            assert!(result.is_retryable);
            assert_eq!(result.retry_category(), RetryCategory::Infra);
        }
    }

    #[test]
    fn test_code_patterns_carry_guidance() {
        for (log, expected) in [
            ("✖ 3 problems (3 errors, 0 warnings)", ErrorType::LintError),
            (
                "src/a.ts(4,7): error TS2322: Type 'string' is not assignable to type 'number'.",
                ErrorType::TypeError,
            ),
            ("SyntaxError: Unexpected token '}'", ErrorType::SyntaxError),
            ("Tests: 2 failed, 40 passed, 42 total", ErrorType::TestFailure),
        ] {
            let result = classify(log);
            assert_eq!(result.error_type, expected, "{}", log);
            assert_eq!(result.category, ErrorCategory::Code);
            assert!(!result.is_infrastructure);
            assert!(result.is_retryable);
            assert!(result.guidance.is_some());
            assert_eq!(result.retry_category(), RetryCategory::Spec);
        }
    }

    #[test]
    fn test_unknown_fails_open() {
        let result = classify("something odd happened");
        assert_eq!(result.error_type, ErrorType::ClaudeFailure);
        assert_eq!(result.category, ErrorCategory::Unknown);
        assert!(result.is_infrastructure);
        assert!(result.is_retryable);
        assert!(!result.should_pause_queue);
    }

    #[test]
    fn test_matched_line_is_recorded() {
        let log = "building...\nError: read ECONNRESET\ndone";
        let result = classify(log);
        assert_eq!(result.matched_line.as_deref(), Some("Error: read ECONNRESET"));
        assert!(result.summary().contains("NETWORK_ERROR"));
    }

    #[test]
    fn test_long_matched_line_is_truncated() {
        let log = format!("ENOSPC {}", "x".repeat(1000));
        let line = classify(&log).matched_line.unwrap();
        assert_eq!(line.chars().count(), MAX_MATCHED_LINE_LEN + 1);
    }

    #[test]
    fn test_mentions_regression() {
        let classifier = ErrorClassifier::new();
        assert!(classifier.mentions_regression("3 tests that were passing before now fail"));
        assert!(!classifier.mentions_regression("new test fails"));
    }

    #[test]
    fn test_error_type_serializes_wire_names() {
        assert_eq!(
            serde_json::to_string(&ErrorType::PostProcessing404).unwrap(),
            "\"POST_PROCESSING_404\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorType::SdkCrashAfterSuccess).unwrap(),
            "\"SDK_CRASH_AFTER_SUCCESS\""
        );
        for ty in [ErrorType::ClaudeFailure, ErrorType::GithubRateLimit, ErrorType::OutOfMemory] {
            assert_eq!(serde_json::to_string(&ty).unwrap(), format!("\"{}\"", ty));
        }
    }
}
