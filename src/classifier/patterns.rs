//! The ordered error pattern table.
//!
//! Groups are checked in ascending [`PatternGroup`] order and the first
//! matching pattern wins. Pause-worthy API limits must be checked before
//! the generic infrastructure and code patterns, since an overloaded API
//! often also produces timeouts and failing tests in the same log.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{ErrorCategory, ErrorType};

/// Check-order group of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PatternGroup {
    /// Agent API rate limit, overload or credit exhaustion
    ApiLimit = 1,
    /// Authentication and token problems
    Auth = 2,
    /// Rate limits of the external code host
    ExternalRateLimit = 3,
    /// Environment failures
    Infrastructure = 4,
    /// Problems in the produced code
    Code = 5,
}

impl PatternGroup {
    /// Category assigned to every pattern of this group.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            PatternGroup::ApiLimit => ErrorCategory::RateLimit,
            PatternGroup::Auth => ErrorCategory::Auth,
            PatternGroup::ExternalRateLimit | PatternGroup::Infrastructure => {
                ErrorCategory::Infrastructure
            }
            PatternGroup::Code => ErrorCategory::Code,
        }
    }

    /// Whether failures in this group are worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PatternGroup::Auth)
    }

    /// Whether failures in this group should pause the whole queue.
    #[must_use]
    pub fn should_pause_queue(&self) -> bool {
        matches!(self, PatternGroup::ApiLimit)
    }

    /// Whether failures in this group are charged to the infra budget.
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            PatternGroup::ApiLimit | PatternGroup::ExternalRateLimit | PatternGroup::Infrastructure
        )
    }
}

/// A compiled entry of the pattern table.
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    /// Error type reported on match
    pub error_type: ErrorType,
    /// Check-order group
    pub group: PatternGroup,
    /// Compiled matcher
    pub regex: Regex,
    /// Human-readable description used as the classification message
    pub description: &'static str,
    /// Fix guidance handed back to the agent on retry
    pub guidance: Option<&'static str>,
}

impl ErrorPattern {
    /// Whether the pattern matches anywhere in the log.
    #[must_use]
    pub fn is_match(&self, log: &str) -> bool {
        self.regex.is_match(log)
    }

    /// First log line the pattern matches.
    #[must_use]
    pub fn matching_line<'a>(&self, log: &'a str) -> Option<&'a str> {
        log.lines().find(|line| self.regex.is_match(line))
    }
}

type PatternSpec = (
    ErrorType,
    PatternGroup,
    &'static str,
    &'static str,
    Option<&'static str>,
);

/// Raw table, in check order.
pub(crate) const PATTERN_SPECS: &[PatternSpec] = &[
    // Agent API limits (pause the queue, cool down)
    (
        ErrorType::CreditExhausted,
        PatternGroup::ApiLimit,
        r"(?i)credit balance is too low|insufficient credits?|credits? (?:exhausted|depleted)|usage limit reached",
        "Agent API credits exhausted",
        None,
    ),
    (
        ErrorType::ApiOverloaded,
        PatternGroup::ApiLimit,
        r"(?i)overloaded_error|api (?:is )?overloaded|\b529\b",
        "Agent API overloaded",
        None,
    ),
    (
        ErrorType::RateLimit,
        PatternGroup::ApiLimit,
        r"(?i)rate_limit_error|rate limit(?:ed)? (?:reached|hit)|too many requests|\b429\b",
        "Agent API rate limit reached",
        None,
    ),
    // Authentication (needs a human)
    (
        ErrorType::AuthError,
        PatternGroup::Auth,
        r"(?i)authentication[_ ](?:error|failed)|invalid (?:x-)?api[ -]?key|bad credentials|401 unauthorized|token (?:has )?(?:expired|been revoked)|requires authentication",
        "Authentication failed",
        None,
    ),
    // External host rate limits (fast retry, no pause)
    (
        ErrorType::GithubRateLimit,
        PatternGroup::ExternalRateLimit,
        r"(?i)api rate limit exceeded|secondary rate limit|abuse detection mechanism",
        "Code host rate limit exceeded",
        None,
    ),
    // Infrastructure
    (
        ErrorType::PermissionError,
        PatternGroup::Infrastructure,
        r"(?i)permission denied|\beacces\b|resource not accessible by integration|403 forbidden",
        "Permission denied in the execution environment",
        None,
    ),
    (
        ErrorType::Timeout,
        PatternGroup::Infrastructure,
        r"(?i)\btimed out\b|\btimeout\b|deadline exceeded|\betimedout\b",
        "Execution timed out",
        None,
    ),
    (
        ErrorType::NetworkError,
        PatternGroup::Infrastructure,
        r"(?i)\beconnreset\b|\beconnrefused\b|\benotfound\b|\beai_again\b|network (?:error|is unreachable)|connection (?:reset|refused)|socket hang up|could not resolve host",
        "Network failure",
        None,
    ),
    (
        ErrorType::OutOfMemory,
        PatternGroup::Infrastructure,
        r"(?i)out of memory|\benomem\b|heap out of memory|oomkilled|exit code 137",
        "Process ran out of memory",
        None,
    ),
    (
        ErrorType::DiskFull,
        PatternGroup::Infrastructure,
        r"(?i)no space left on device|\benospc\b|disk (?:is )?full|disk quota exceeded",
        "Disk full",
        None,
    ),
    (
        ErrorType::Cancelled,
        PatternGroup::Infrastructure,
        r"(?i)operation was cancell?ed|run was cancell?ed|job was cancell?ed|received sigterm",
        "Execution was cancelled",
        None,
    ),
    // Code quality (retry with guidance)
    (
        ErrorType::LintError,
        PatternGroup::Code,
        r"(?i)\beslint\b|lint(?:ing)? (?:error|failed)|clippy::|\d+ problems? \(\d+ errors?",
        "Lint check failed",
        Some("Run the linter locally and fix every reported problem before pushing."),
    ),
    (
        ErrorType::TypeError,
        PatternGroup::Code,
        r"(?i)error ts\d+:|is not assignable to type|mismatched types|type check(?:ing)? failed",
        "Type check failed",
        Some("Fix the reported type errors; do not silence them with casts or ignores."),
    ),
    (
        ErrorType::SyntaxError,
        PatternGroup::Code,
        r"(?i)syntaxerror|syntax error|unexpected token|parse error",
        "Syntax error in generated code",
        Some("Re-read the edited files and fix the syntax error at the reported location."),
    ),
    (
        ErrorType::TestFailure,
        PatternGroup::Code,
        r"(?i)tests? failed|failing tests?|\b\d+ failed\b|assertionerror|test result: failed|panicked at",
        "Tests failed",
        Some("Read the failing assertion, fix the implementation (not the test), and rerun the suite."),
    ),
];

/// Compile the pattern table in check order.
///
/// Entries whose regex does not compile are skipped; the table test asserts
/// that none are.
#[must_use]
pub fn compile_patterns() -> Vec<ErrorPattern> {
    let mut patterns: Vec<ErrorPattern> = PATTERN_SPECS
        .iter()
        .filter_map(|&(error_type, group, pattern, description, guidance)| {
            Regex::new(pattern).ok().map(|regex| ErrorPattern {
                error_type,
                group,
                regex,
                description,
                guidance,
            })
        })
        .collect();

    // Stable: keeps the in-group order of the raw table.
    patterns.sort_by_key(|p| p.group);
    patterns
}
