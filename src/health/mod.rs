//! Health monitor and circuit breaker recommendations.
//!
//! The monitor aggregates queue counts and recent run outcomes into a
//! [`HealthAssessment`]. It never flips the circuit itself: the sentinel
//! label `tdd-queue:disabled` is written by whoever drives the pipeline.
//!
//! Opening uses the critical thresholds; closing requires both signals to
//! fall below half of them, so a queue hovering at the threshold does not
//! flap.
//!
//! # Modules
//!
//! - [`metrics`] - [`QueueMetrics`] and [`WorkflowMetrics`]

pub mod metrics;

pub use metrics::{QueueMetrics, RunRecord, WorkflowMetrics};

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::state_machine::analyze_labels;

// ============================================================================
// Thresholds
// ============================================================================

/// Thresholds of the health monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthThresholds {
    /// Failure rate (percent) above which the queue is critical
    pub failure_rate_threshold: u32,
    /// Runs needed before the failure rate counts
    pub min_samples: u32,
    /// Share of the queue (percent) that may be retrying
    pub retry_percentage_threshold: u32,
    /// Floor of the retry threshold
    pub min_retry_issues: u32,
    /// Window of recent runs, in hours
    pub window_hours: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50,
            min_samples: 5,
            retry_percentage_threshold: 20,
            min_retry_issues: 5,
            window_hours: 24,
        }
    }
}

// ============================================================================
// Assessment Types
// ============================================================================

/// Overall health level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Critical,
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// What the caller should do with the circuit sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitRecommendation {
    /// Leave the sentinel as it is
    Keep,
    /// Add the sentinel
    Open,
    /// Remove the sentinel
    Close,
}

/// Circuit breaker view of an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStatus {
    /// Sentinel currently present
    pub is_open: bool,
    /// Critical conditions hold
    pub should_open: bool,
    /// Both signals below half their thresholds
    pub can_close: bool,
    pub recommendation: CircuitRecommendation,
}

/// Point-in-time health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthAssessment {
    pub level: HealthLevel,
    /// Operator-facing descriptions of what is wrong
    pub issues: Vec<String>,
    pub queue_metrics: QueueMetrics,
    pub workflow_metrics: WorkflowMetrics,
    pub failure_rate_percent: u32,
    pub retry_threshold: u32,
    pub circuit_breaker: CircuitBreakerStatus,
    pub timestamp: DateTime<Utc>,
}

impl HealthAssessment {
    /// Print a human-readable summary.
    pub fn print(&self) {
        let level = match self.level {
            HealthLevel::Healthy => "HEALTHY".green().bold(),
            HealthLevel::Degraded => "DEGRADED".yellow().bold(),
            HealthLevel::Critical => "CRITICAL".red().bold(),
        };
        println!("{} {}", "Pipeline health:".bold(), level);
        println!(
            "   Queue: {} queued, {} in progress, {} failed, {} completed",
            self.queue_metrics.queued,
            self.queue_metrics.in_progress,
            self.queue_metrics.failed,
            self.queue_metrics.completed
        );
        println!(
            "   Retries: {} (threshold {})",
            self.queue_metrics.retry_count(),
            self.retry_threshold
        );
        println!(
            "   Failure rate: {}% over {} runs",
            self.failure_rate_percent, self.workflow_metrics.total_runs
        );
        let circuit = if self.circuit_breaker.is_open {
            "open".red()
        } else {
            "closed".green()
        };
        println!("   Circuit: {}", circuit);
        match self.circuit_breaker.recommendation {
            CircuitRecommendation::Open => println!("   {} open the circuit", "→".yellow()),
            CircuitRecommendation::Close => println!("   {} close the circuit", "→".green()),
            CircuitRecommendation::Keep => {}
        }
        for issue in &self.issues {
            println!("   {} {}", "•".dimmed(), issue);
        }
    }
}

// ============================================================================
// Health Monitor
// ============================================================================

/// Computes health assessments.
#[derive(Debug, Clone, Default)]
pub struct HealthMonitor {
    thresholds: HealthThresholds,
}

impl HealthMonitor {
    /// Create a monitor.
    #[must_use]
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self { thresholds }
    }

    /// Configured thresholds.
    #[must_use]
    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// `max(floor(queue_size × pct / 100), min_retry_issues)`.
    #[must_use]
    pub fn retry_threshold(&self, queue: &QueueMetrics) -> u32 {
        let scaled = u64::from(queue.queue_size())
            * u64::from(self.thresholds.retry_percentage_threshold)
            / 100;
        (scaled as u32).max(self.thresholds.min_retry_issues)
    }

    /// Failure rate is above threshold with enough samples.
    #[must_use]
    pub fn is_failure_rate_critical(&self, workflow: &WorkflowMetrics) -> bool {
        workflow.total_runs >= self.thresholds.min_samples
            && workflow.failure_rate_percent() > self.thresholds.failure_rate_threshold
    }

    /// Too many items are retrying.
    #[must_use]
    pub fn is_retry_count_critical(&self, queue: &QueueMetrics) -> bool {
        queue.retry_count() >= self.retry_threshold(queue)
    }

    /// Either critical condition holds.
    #[must_use]
    pub fn should_open_circuit(&self, queue: &QueueMetrics, workflow: &WorkflowMetrics) -> bool {
        self.is_failure_rate_critical(workflow) || self.is_retry_count_critical(queue)
    }

    /// Both signals are below half of their open thresholds.
    #[must_use]
    pub fn can_close_circuit(&self, queue: &QueueMetrics, workflow: &WorkflowMetrics) -> bool {
        let rate_ok = f64::from(workflow.failure_rate_percent())
            < f64::from(self.thresholds.failure_rate_threshold) / 2.0;
        let retries_ok =
            f64::from(queue.retry_count()) < f64::from(self.retry_threshold(queue)) / 2.0;
        rate_ok && retries_ok
    }

    /// Assess health and recommend a circuit action.
    #[must_use]
    pub fn assess(
        &self,
        queue: QueueMetrics,
        workflow: WorkflowMetrics,
        circuit_open: bool,
        now: DateTime<Utc>,
    ) -> HealthAssessment {
        let rate = workflow.failure_rate_percent();
        let retry_threshold = self.retry_threshold(&queue);
        let retries = queue.retry_count();
        let rate_critical = self.is_failure_rate_critical(&workflow);
        let retry_critical = self.is_retry_count_critical(&queue);
        let half_rate = f64::from(self.thresholds.failure_rate_threshold) / 2.0;

        let mut issues = Vec::new();
        if rate_critical {
            issues.push(format!(
                "Failure rate {}% exceeds {}% over {} runs in the last {}h",
                rate,
                self.thresholds.failure_rate_threshold,
                workflow.total_runs,
                self.thresholds.window_hours
            ));
        } else if f64::from(rate) > half_rate {
            issues.push(format!("Failure rate {}% is elevated", rate));
        }
        if retry_critical {
            issues.push(format!(
                "{} retries across {} open items (threshold {})",
                retries,
                queue.queue_size(),
                retry_threshold
            ));
        } else if retries > 0 && f64::from(retries) >= f64::from(retry_threshold) / 2.0 {
            issues.push(format!("{} retries, approaching threshold {}", retries, retry_threshold));
        }

        let level = if rate_critical || retry_critical {
            HealthLevel::Critical
        } else if !issues.is_empty() {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };

        let should_open = rate_critical || retry_critical;
        let can_close = self.can_close_circuit(&queue, &workflow);
        let recommendation = match (circuit_open, should_open, can_close) {
            (false, true, _) => CircuitRecommendation::Open,
            (true, _, true) => CircuitRecommendation::Close,
            _ => CircuitRecommendation::Keep,
        };

        match recommendation {
            CircuitRecommendation::Open => {
                warn!(rate, retries, retry_threshold, "Recommending circuit open")
            }
            CircuitRecommendation::Close => info!(rate, retries, "Recommending circuit close"),
            CircuitRecommendation::Keep => {}
        }

        HealthAssessment {
            level,
            issues,
            queue_metrics: queue,
            workflow_metrics: workflow,
            failure_rate_percent: rate,
            retry_threshold,
            circuit_breaker: CircuitBreakerStatus {
                is_open: circuit_open,
                should_open,
                can_close,
                recommendation,
            },
            timestamp: now,
        }
    }
}

/// Whether a control record's labels carry the queue-disabled sentinel.
#[must_use]
pub fn circuit_is_open<S: AsRef<str>>(labels: &[S]) -> bool {
    analyze_labels(labels).queue_disabled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(queued: u32, retries: u32) -> QueueMetrics {
        QueueMetrics {
            queued,
            spec_retries: retries,
            ..QueueMetrics::default()
        }
    }

    fn monitor() -> HealthMonitor {
        HealthMonitor::default()
    }

    #[test]
    fn test_retry_threshold_floor() {
        assert_eq!(monitor().retry_threshold(&queue(10, 0)), 5);
        assert_eq!(monitor().retry_threshold(&queue(100, 0)), 20);
        assert_eq!(monitor().retry_threshold(&queue(29, 0)), 5);
        assert_eq!(monitor().retry_threshold(&queue(34, 0)), 6);
    }

    #[test]
    fn test_failure_rate_needs_samples() {
        let m = monitor();
        assert!(!m.is_failure_rate_critical(&WorkflowMetrics::new(4, 4)));
        assert!(m.is_failure_rate_critical(&WorkflowMetrics::new(5, 3)));
        assert!(!m.is_failure_rate_critical(&WorkflowMetrics::new(10, 5)));
    }

    #[test]
    fn test_should_open_on_failure_rate_regardless_of_retries() {
        let m = monitor();
        let bad = WorkflowMetrics::new(6, 4);
        for retries in [0, 1, 2] {
            assert!(m.should_open_circuit(&queue(10, retries), &bad));
        }
        assert!(!m.should_open_circuit(&queue(10, 0), &WorkflowMetrics::new(6, 3)));
    }

    #[test]
    fn test_should_open_on_retries() {
        assert!(monitor().should_open_circuit(&queue(10, 5), &WorkflowMetrics::default()));
    }

    #[test]
    fn test_close_hysteresis() {
        let m = monitor();
        // Just below the open threshold: not open-worthy, not close-worthy either.
        let q = queue(10, 4);
        let w = WorkflowMetrics::new(10, 5);
        assert!(!m.should_open_circuit(&q, &w));
        assert!(!m.can_close_circuit(&q, &w));

        // Rate below half but retries at half.
        assert!(!m.can_close_circuit(&queue(10, 3), &WorkflowMetrics::new(10, 2)));
        assert!(m.can_close_circuit(&queue(10, 2), &WorkflowMetrics::new(10, 2)));
        assert!(!m.can_close_circuit(&queue(10, 2), &WorkflowMetrics::new(4, 1)));
    }

    #[test]
    fn test_levels() {
        let m = monitor();
        let now = Utc::now();
        let healthy = m.assess(queue(10, 0), WorkflowMetrics::new(10, 1), false, now);
        assert_eq!(healthy.level, HealthLevel::Healthy);
        assert!(healthy.issues.is_empty());

        let degraded = m.assess(queue(10, 3), WorkflowMetrics::new(10, 1), false, now);
        assert_eq!(degraded.level, HealthLevel::Degraded);
        assert_eq!(degraded.issues.len(), 1);

        let degraded_rate = m.assess(queue(10, 0), WorkflowMetrics::new(10, 3), false, now);
        assert_eq!(degraded_rate.level, HealthLevel::Degraded);

        let critical = m.assess(queue(10, 0), WorkflowMetrics::new(10, 6), false, now);
        assert_eq!(critical.level, HealthLevel::Critical);
        assert_eq!(critical.failure_rate_percent, 60);
    }

    #[test]
    fn test_recommendations() {
        let m = monitor();
        let now = Utc::now();
        let bad = WorkflowMetrics::new(10, 8);
        let good = WorkflowMetrics::new(10, 0);

        let open = m.assess(queue(10, 0), bad, false, now);
        assert_eq!(open.circuit_breaker.recommendation, CircuitRecommendation::Open);

        let still_bad = m.assess(queue(10, 0), bad, true, now);
        assert_eq!(still_bad.circuit_breaker.recommendation, CircuitRecommendation::Keep);

        let recovered = m.assess(queue(10, 0), good, true, now);
        assert_eq!(recovered.circuit_breaker.recommendation, CircuitRecommendation::Close);

        let fine = m.assess(queue(10, 0), good, false, now);
        assert_eq!(fine.circuit_breaker.recommendation, CircuitRecommendation::Keep);
    }

    #[test]
    fn test_circuit_sentinel() {
        assert!(circuit_is_open(&["tdd-queue:disabled", "meta"]));
        assert!(!circuit_is_open(&["tdd-spec:queued"]));
    }
}
