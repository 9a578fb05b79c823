//! Aggregation of primitive results into an execution result.

use chrono::{DateTime, Utc};

use crate::core::types::{ExecutionCounts, ExecutionResult, PrimitiveResult, RunStatus};

impl ExecutionCounts {
    pub fn from_results(results: &[PrimitiveResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            executed: results.len(),
            succeeded,
            failed: results.len() - succeeded,
        }
    }
}

impl ExecutionResult {
    /// Derive counts and status from the ordered results.
    pub fn from_results(
        plan_id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        results: Vec<PrimitiveResult>,
        cancelled: bool,
    ) -> Self {
        let counts = ExecutionCounts::from_results(&results);
        Self {
            plan_id: plan_id.into(),
            start_time,
            end_time,
            status: RunStatus::from_counts(counts.succeeded, counts.failed),
            counts,
            results,
            cancelled,
        }
    }

    pub fn successful(&self) -> impl Iterator<Item = &PrimitiveResult> {
        self.results.iter().filter(|r| r.success)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }
}
