//! Aggregated statistics over a cycle's attempt results.

use serde::{Deserialize, Serialize};

use crate::types::{TestResult, TestStatus};

/// High-level report for one cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_runs: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    /// Fraction of runs that passed, 0.0 when there were none.
    pub success_rate: f64,
    pub avg_duration_ms: f64,
}

impl RunMetrics {
    pub fn from_results(results: &[TestResult]) -> Self {
        if results.is_empty() {
            return Self::default();
        }

        let total = results.len();
        let count = |status: TestStatus| results.iter().filter(|r| r.status == status).count();
        let total_duration: u64 = results.iter().map(|r| r.duration_ms).sum();
        let passed = count(TestStatus::Passed);

        Self {
            total_runs: total,
            passed,
            failed: count(TestStatus::Failed),
            errors: count(TestStatus::Error),
            skipped: count(TestStatus::Skipped),
            success_rate: passed as f64 / total as f64,
            avg_duration_ms: total_duration as f64 / total as f64,
        }
    }
}

/// Pass@k over a batch of attempt outcomes: 1.0 when any attempt passed.
pub fn pass_at_k(outcomes: &[bool]) -> f64 {
    if outcomes.iter().any(|passed| *passed) {
        1.0
    } else {
        0.0
    }
}
