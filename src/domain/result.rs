use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::CleanStrategy;
use crate::error::{CleanError, Result};

/// Outcome reported by a backend for one cleanup call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanResult {
    pub freed_bytes: u64,
    pub items_removed: u64,
    pub items_failed: u64,
    pub clean_time: Duration,
    pub cleaned_at: DateTime<Utc>,
    pub strategy: CleanStrategy,
}

impl CleanResult {
    pub fn new(strategy: CleanStrategy, cleaned_at: DateTime<Utc>) -> Self {
        CleanResult {
            freed_bytes: 0,
            items_removed: 0,
            items_failed: 0,
            clean_time: Duration::ZERO,
            cleaned_at,
            strategy,
        }
    }

    /// Zero-mutation result for dry and simulated runs.
    pub fn dry_run(cleaned_at: DateTime<Utc>) -> Self {
        Self::new(CleanStrategy::DryRun, cleaned_at)
    }

    pub fn with_freed(mut self, freed_bytes: u64, items_removed: u64) -> Self {
        self.freed_bytes = freed_bytes;
        self.items_removed = items_removed;
        self
    }

    pub fn with_failed_items(mut self, items_failed: u64) -> Self {
        self.items_failed = items_failed;
        self
    }

    pub fn with_clean_time(mut self, clean_time: Duration) -> Self {
        self.clean_time = clean_time;
        self
    }

    /// Refuses results whose counters contradict each other.
    pub fn validate(&self) -> Result<()> {
        if self.items_removed > 0 && self.freed_bytes == 0 {
            return Err(CleanError::validation(format!(
                "{} items removed but no bytes freed",
                self.items_removed
            )));
        }
        if self.items_failed > 0 && self.items_removed == 0 && self.freed_bytes == 0 {
            return Err(CleanError::validation(format!(
                "{} items failed with nothing removed or freed",
                self.items_failed
            )));
        }
        if self.cleaned_at.timestamp() <= 0 {
            return Err(CleanError::validation("cleaned_at is unset"));
        }
        Ok(())
    }
}
