use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{AggregateState, CleanResult, ExecutionMode};
use crate::error::{CleanError, Result};
use crate::ops::{elapsed_between, OperationId};

/// Outcome of one operation: exactly one of a result or an error.
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub id: OperationId,
    pub name: String,
    pub result: std::result::Result<CleanResult, CleanError>,
    /// Backend calls made, including retries; 0 when never dispatched.
    pub attempts: u32,
    pub duration: Duration,
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&CleanError> {
        self.result.as_ref().err()
    }
}

/// Aggregate of one `run`.
#[derive(Debug, Clone)]
pub struct ConcurrentExecutionResult {
    pub run_id: Uuid,
    pub profile: String,
    pub mode: ExecutionMode,
    pub state: AggregateState,
    pub outcomes: Vec<OperationOutcome>,
    /// Run-level errors (preflight refusals); per-operation errors live in `outcomes`.
    pub errors: Vec<CleanError>,
    pub total_operations: usize,
    pub completed: usize,
    pub failed: usize,
    pub freed_bytes: u64,
    pub items_removed: u64,
    pub items_failed: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
}

impl ConcurrentExecutionResult {
    pub(crate) fn aborted(
        run_id: Uuid,
        profile: &str,
        mode: ExecutionMode,
        error: CleanError,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        ConcurrentExecutionResult {
            run_id,
            profile: profile.to_string(),
            mode,
            state: AggregateState::Failed,
            outcomes: Vec::new(),
            errors: vec![error],
            total_operations: 0,
            completed: 0,
            failed: 0,
            freed_bytes: 0,
            items_removed: 0,
            items_failed: 0,
            started_at,
            finished_at,
            duration: elapsed_between(started_at, finished_at),
        }
    }

    pub(crate) fn aggregate(
        run_id: Uuid,
        profile: &str,
        mode: ExecutionMode,
        outcomes: Vec<OperationOutcome>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let completed = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes.len() - completed;
        let (freed_bytes, items_removed, items_failed) = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .fold((0u64, 0u64, 0u64), |(freed, removed, failed), r| {
                (
                    freed.saturating_add(r.freed_bytes),
                    removed.saturating_add(r.items_removed),
                    failed.saturating_add(r.items_failed),
                )
            });

        ConcurrentExecutionResult {
            run_id,
            profile: profile.to_string(),
            mode,
            state: AggregateState::from_counts(completed, failed),
            total_operations: outcomes.len(),
            completed,
            failed,
            freed_bytes,
            items_removed,
            items_failed,
            outcomes,
            errors: Vec::new(),
            started_at,
            finished_at,
            duration: elapsed_between(started_at, finished_at),
        }
    }

    pub fn outcome(&self, name: &str) -> Option<&OperationOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    pub fn successes(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// First run-level error, if the run was refused.
    pub fn preflight_error(&self) -> Option<&CleanError> {
        self.errors.first()
    }

    /// Re-checks the totals and every completed result.
    pub fn check_invariants(&self) -> Result<()> {
        if self.total_operations != self.completed + self.failed {
            return Err(CleanError::validation(format!(
                "total {} != completed {} + failed {}",
                self.total_operations, self.completed, self.failed
            )));
        }
        if self.total_operations != self.outcomes.len() {
            return Err(CleanError::validation("outcome count does not match total"));
        }
        for outcome in self.successes() {
            if let Ok(result) = &outcome.result {
                result
                    .validate()
                    .map_err(|err| err.with_context("operation", &outcome.name))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanEntry {
    pub name: String,
    pub available: bool,
    pub estimated_bytes: u64,
}

/// What a profile would free, without recording or mutating anything.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub profile: String,
    pub entries: Vec<ScanEntry>,
    pub total_bytes: u64,
    pub scanned_at: DateTime<Utc>,
}
