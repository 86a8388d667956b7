// src/recovery.rs

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::HistoryConfig;
use crate::domain::{CleanResult, OperationState};
use crate::error::{CleanError, Result};
use crate::ops::{elapsed_between, Clock, OperationId, SystemClock};

/// Nullary closure that undoes a failed operation.
pub type RollbackFn = Arc<dyn Fn() -> BoxFuture<'static, Result<CleanResult>> + Send + Sync>;

/// Wraps an async closure as a [`RollbackFn`].
pub fn rollback_fn<F, Fut>(f: F) -> RollbackFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CleanResult>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, Result<CleanResult>> { Box::pin(f()) })
}

struct OperationRecord {
    id: OperationId,
    name: String,
    state: OperationState,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    duration: Option<Duration>,
    outcome: Option<Result<CleanResult>>,
    rollback: Option<RollbackFn>,
    context: BTreeMap<String, String>,
    retryable: bool,
    retry_count: u32,
    created_at: DateTime<Utc>,
}

impl OperationRecord {
    fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            start_time: self.start_time,
            end_time: self.end_time,
            duration: self.duration,
            outcome: self.outcome.clone(),
            has_rollback: self.rollback.is_some(),
            context: self.context.clone(),
            retryable: self.retryable,
            retry_count: self.retry_count,
            created_at: self.created_at,
        }
    }
}

/// Closure-free copy of a record.
#[derive(Debug, Clone)]
pub struct OperationSnapshot {
    pub id: OperationId,
    pub name: String,
    pub state: OperationState,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub outcome: Option<Result<CleanResult>>,
    pub has_rollback: bool,
    pub context: BTreeMap<String, String>,
    pub retryable: bool,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

impl OperationSnapshot {
    pub fn error(&self) -> Option<&CleanError> {
        self.outcome.as_ref().and_then(|o| o.as_ref().err())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStatistics {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub rollback: usize,
    pub rolled_back: usize,
    pub with_rollback: usize,
    pub retries: u64,
}

#[derive(Default)]
struct Inner {
    records: HashMap<OperationId, OperationRecord>,
    by_creation: BTreeSet<(DateTime<Utc>, OperationId)>,
}

impl Inner {
    fn get_mut(&mut self, id: OperationId) -> Result<&mut OperationRecord> {
        self.records
            .get_mut(&id)
            .ok_or_else(|| CleanError::not_found(format!("operation {} is not recorded", id)))
    }

    fn transition(&mut self, id: OperationId, next: OperationState) -> Result<&mut OperationRecord> {
        let record = self.get_mut(id)?;
        if !record.state.can_transition_to(next) {
            return Err(CleanError::invalid_state(format!(
                "operation {} cannot move from {} to {}",
                id, record.state, next
            ))
            .with_context("operation", &record.name)
            .with_context("state", record.state));
        }
        log::debug!("operation {} ({}): {} -> {}", id, record.name, record.state, next);
        record.state = next;
        Ok(record)
    }

    fn remove(&mut self, id: OperationId) -> Option<OperationRecord> {
        let record = self.records.remove(&id)?;
        self.by_creation.remove(&(record.created_at, id));
        Some(record)
    }

    fn evict_to(&mut self, cap: usize) {
        while self.records.len() > cap {
            let oldest = match self.by_creation.iter().next() {
                Some(&(_, id)) => id,
                None => break,
            };
            if let Some(record) = self.remove(oldest) {
                log::debug!("evicted operation {} ({}) from history", oldest, record.name);
            }
        }
    }
}

/// Records every operation attempt so failures can be retried or rolled back.
///
/// All bookkeeping happens under one mutex; rollback and retry closures run
/// with the lock released.
pub struct RollbackManager {
    inner: Mutex<Inner>,
    max_history: usize,
    clock: Arc<dyn Clock>,
}

impl RollbackManager {
    pub fn new(max_history: usize) -> Self {
        Self::with_clock(max_history, Arc::new(SystemClock))
    }

    pub fn with_clock(max_history: usize, clock: Arc<dyn Clock>) -> Self {
        RollbackManager {
            inner: Mutex::new(Inner::default()),
            max_history: max_history.max(1),
            clock,
        }
    }

    pub fn from_config(config: &HistoryConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_clock(config.max_history, clock)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts a `Pending` record. A reused id is ignored.
    pub fn record(
        &self,
        id: OperationId,
        name: impl Into<String>,
        rollback: Option<RollbackFn>,
        context: BTreeMap<String, String>,
        retryable: bool,
    ) {
        let name = name.into();
        let created_at = self.clock.now();
        let mut inner = self.lock();
        if inner.records.contains_key(&id) {
            log::warn!("operation id {} already recorded; keeping the existing record", id);
            return;
        }
        inner.records.insert(
            id,
            OperationRecord {
                id,
                name,
                state: OperationState::Pending,
                start_time: None,
                end_time: None,
                duration: None,
                outcome: None,
                rollback,
                context,
                retryable,
                retry_count: 0,
                created_at,
            },
        );
        inner.by_creation.insert((created_at, id));
        inner.evict_to(self.max_history);
    }

    pub fn start(&self, id: OperationId) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let record = inner.transition(id, OperationState::Running)?;
        record.start_time = Some(now);
        record.end_time = None;
        record.duration = None;
        Ok(())
    }

    pub fn complete(&self, id: OperationId, result: CleanResult) -> Result<()> {
        self.finish(id, OperationState::Completed, Ok(result))
    }

    pub fn fail(&self, id: OperationId, error: CleanError) -> Result<()> {
        self.finish(id, OperationState::Failed, Err(error))
    }

    fn finish(&self, id: OperationId, next: OperationState, outcome: Result<CleanResult>) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let record = inner.transition(id, next)?;
        record.end_time = Some(now);
        record.duration = record.start_time.map(|start| elapsed_between(start, now));
        record.outcome = Some(outcome);
        Ok(())
    }

    /// Runs the registered rollback of a `Failed` operation.
    pub async fn rollback(&self, cancel: &CancellationToken, id: OperationId) -> Result<CleanResult> {
        let action = {
            let mut inner = self.lock();
            let record = inner.get_mut(id)?;
            if record.state != OperationState::Failed {
                return Err(CleanError::invalid_state(format!(
                    "operation {} is {}, only failed operations can be rolled back",
                    id, record.state
                )));
            }
            let action = record.rollback.clone().ok_or_else(|| {
                CleanError::operation(format!("operation {} has no rollback registered", id))
                    .with_context("operation", &record.name)
            })?;
            inner.transition(id, OperationState::Rollback)?;
            action
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(CleanError::cancelled(format!("rollback of {} cancelled", id))),
            outcome = action() => outcome,
        };

        let now = self.clock.now();
        let mut inner = self.lock();
        match outcome {
            Ok(result) => {
                let record = inner.transition(id, OperationState::RolledBack)?;
                record.end_time = Some(now);
                record.outcome = Some(Ok(result.clone()));
                log::info!("rolled back operation {} ({})", id, record.name);
                Ok(result)
            }
            Err(err) => {
                let record = inner.transition(id, OperationState::Failed)?;
                record.end_time = Some(now);
                record.outcome = Some(Err(err.clone()));
                log::warn!("rollback of operation {} ({}) failed: {}", id, record.name, err);
                Err(err)
            }
        }
    }

    /// Re-runs a failed, retryable operation through `Pending -> Running -> ...`.
    pub async fn retry<F, Fut>(&self, cancel: &CancellationToken, id: OperationId, f: F) -> Result<CleanResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CleanResult>>,
    {
        {
            let mut inner = self.lock();
            let record = inner.get_mut(id)?;
            if record.state != OperationState::Failed || !record.retryable {
                return Err(CleanError::operation(format!(
                    "operation {} is not a retryable failure (state {}, retryable {})",
                    id, record.state, record.retryable
                )));
            }
            let record = inner.transition(id, OperationState::Pending)?;
            record.retry_count += 1;
        }
        self.start(id)?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CleanError::cancelled(format!("retry of {} cancelled", id))),
            outcome = f() => outcome,
        };
        match outcome {
            Ok(result) => {
                self.complete(id, result.clone())?;
                Ok(result)
            }
            Err(err) => {
                self.fail(id, err.clone())?;
                Err(err)
            }
        }
    }

    /// Rolls back every `Failed` record, oldest first.
    pub async fn rollback_all(&self, cancel: &CancellationToken) -> HashMap<OperationId, Result<CleanResult>> {
        let failed: Vec<OperationId> = {
            let inner = self.lock();
            inner
                .by_creation
                .iter()
                .map(|(_, id)| *id)
                .filter(|id| {
                    inner
                        .records
                        .get(id)
                        .map(|r| r.state == OperationState::Failed)
                        .unwrap_or(false)
                })
                .collect()
        };

        let mut outcomes = HashMap::with_capacity(failed.len());
        for id in failed {
            let outcome = self.rollback(cancel, id).await;
            outcomes.insert(id, outcome);
        }
        outcomes
    }

    /// Drops finished records created before `now - older_than`.
    pub fn cleanup(&self, older_than: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(older_than) {
            Ok(age) => self.clock.now() - age,
            Err(_) => return 0,
        };
        let mut inner = self.lock();
        let stale: Vec<OperationId> = inner
            .by_creation
            .iter()
            .take_while(|(created_at, _)| *created_at < cutoff)
            .map(|(_, id)| *id)
            .filter(|id| {
                inner
                    .records
                    .get(id)
                    .map(|r| r.state.is_terminal())
                    .unwrap_or(false)
            })
            .collect();
        for id in &stale {
            inner.remove(*id);
        }
        if !stale.is_empty() {
            log::debug!("removed {} finished operation(s) from history", stale.len());
        }
        stale.len()
    }

    pub fn statistics(&self) -> RecoveryStatistics {
        let inner = self.lock();
        let mut stats = RecoveryStatistics {
            total: inner.records.len(),
            ..RecoveryStatistics::default()
        };
        for record in inner.records.values() {
            match record.state {
                OperationState::Pending => stats.pending += 1,
                OperationState::Running => stats.running += 1,
                OperationState::Completed => stats.completed += 1,
                OperationState::Failed => stats.failed += 1,
                OperationState::Rollback => stats.rollback += 1,
                OperationState::RolledBack => stats.rolled_back += 1,
            }
            if record.rollback.is_some() {
                stats.with_rollback += 1;
            }
            stats.retries += u64::from(record.retry_count);
        }
        stats
    }

    pub fn get(&self, id: OperationId) -> Option<OperationSnapshot> {
        self.lock().records.get(&id).map(OperationRecord::snapshot)
    }

    pub fn state(&self, id: OperationId) -> Option<OperationState> {
        self.lock().records.get(&id).map(|r| r.state)
    }

    pub fn retry_count(&self, id: OperationId) -> Option<u32> {
        self.lock().records.get(&id).map(|r| r.retry_count)
    }

    /// Recorded ids in creation order.
    pub fn ids(&self) -> Vec<OperationId> {
        self.lock().by_creation.iter().map(|(_, id)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RollbackManager {
    fn default() -> Self {
        Self::new(HistoryConfig::default().max_history)
    }
}
