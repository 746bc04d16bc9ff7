//! Priority scoring.
//!
//! ```text
//! score = 50
//!       + depth adjustment     (≤3 segments: +15, ≥5: −15)
//!       + (seed − 50) × 0.5
//!       + attempts adjustment  (0: +20, 1: +10, ≥2: −10)
//!       + latest error         (infrastructure: −25, regression: −15)
//! clamped to [0, 100]
//! ```
//!
//! The seed term produces half points. Ordering uses the exact clamped
//! value in half points ([`PriorityCalculator::rank`]); the whole-number
//! score is for display.

use serde::{Deserialize, Serialize};

use super::work_item::{ErrorKind, WorkItem};

const BASE_SCORE: f64 = 50.0;
const SHALLOW_PATH_MAX_DEPTH: usize = 3;
const DEEP_PATH_MIN_DEPTH: usize = 5;
const PATH_ADJUSTMENT: f64 = 15.0;
const SEED_WEIGHT: f64 = 0.5;

/// Per-term breakdown of a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityBreakdown {
    pub base: f64,
    pub path: f64,
    pub seed: f64,
    pub attempts: f64,
    pub errors: f64,
    /// Clamped score in half points, 0..=200
    pub half_points: u16,
    /// Clamped score rounded for display
    pub score: u8,
}

impl PriorityBreakdown {
    /// Sum of the terms before clamping.
    #[must_use]
    pub fn raw(&self) -> f64 {
        self.base + self.path + self.seed + self.attempts + self.errors
    }
}

/// Computes scheduling scores for work items.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityCalculator;

impl PriorityCalculator {
    /// Create a calculator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Score of an item, 0..=100.
    #[must_use]
    pub fn score(&self, item: &WorkItem) -> u8 {
        self.breakdown(item).score
    }

    /// Ordering key: the clamped score in half points.
    #[must_use]
    pub fn rank(&self, item: &WorkItem) -> u16 {
        self.breakdown(item).half_points
    }

    /// Score with every term spelled out.
    #[must_use]
    pub fn breakdown(&self, item: &WorkItem) -> PriorityBreakdown {
        let mut breakdown = PriorityBreakdown {
            base: BASE_SCORE,
            path: path_adjustment(item.path_depth()),
            seed: (f64::from(item.priority) - BASE_SCORE) * SEED_WEIGHT,
            attempts: attempts_adjustment(item.attempts),
            errors: item.latest_error().map_or(0.0, |e| error_adjustment(e.kind)),
            half_points: 0,
            score: 0,
        };
        let clamped = breakdown.raw().clamp(0.0, 100.0);
        breakdown.half_points = (clamped * 2.0).round() as u16;
        breakdown.score = clamped.round() as u8;
        breakdown
    }
}

fn path_adjustment(depth: usize) -> f64 {
    if depth <= SHALLOW_PATH_MAX_DEPTH {
        PATH_ADJUSTMENT
    } else if depth >= DEEP_PATH_MIN_DEPTH {
        -PATH_ADJUSTMENT
    } else {
        0.0
    }
}

fn attempts_adjustment(attempts: u32) -> f64 {
    match attempts {
        0 => 20.0,
        1 => 10.0,
        _ => -10.0,
    }
}

fn error_adjustment(kind: ErrorKind) -> f64 {
    match kind {
        ErrorKind::Infrastructure => -25.0,
        ErrorKind::Regression => -15.0,
        ErrorKind::Spec | ErrorKind::Code | ErrorKind::Unknown => 0.0,
    }
}
