use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::result::OperationOutcome;
use crate::backend::CleanerBackend;
use crate::config::RetryConfig;
use crate::domain::{CleanResult, CleanStrategy, ExecutionMode, OperationSettings, OperationState};
use crate::error::{CleanError, Result};
use crate::ops::OperationId;
use crate::rate_limit::RateLimiter;
use crate::recovery::RollbackManager;

/// Everything one dispatched operation needs, owned so it can move into a worker.
pub(super) struct OperationTask {
    pub id: OperationId,
    pub name: String,
    pub backend: Arc<dyn CleanerBackend>,
    pub settings: OperationSettings,
    pub mode: ExecutionMode,
    pub timeout: Duration,
    pub retryable: bool,
    pub retry: RetryConfig,
    pub recorder: Arc<RollbackManager>,
    pub limiter: Arc<RateLimiter>,
    pub cancel: CancellationToken,
}

impl OperationTask {
    pub async fn run(self) -> OperationOutcome {
        let started = Instant::now();

        let mut result = match self.limiter.wait(&self.cancel).await {
            Ok(()) => match self.recorder.start(self.id) {
                Ok(()) => self.call_backend().await,
                Err(err) => Err(err),
            },
            Err(err) => {
                settle_failed(&self.recorder, self.id, &err);
                return self.outcome(Err(err), 0, started);
            }
        };
        self.record(&result);
        let mut attempts = 1;
        let mut retries = 0;

        while let Err(err) = &result {
            if !self.should_retry(err, retries) {
                break;
            }
            retries += 1;
            let delay = self.retry.delay_for(retries);
            log::warn!(
                "operation {} ({}) failed with {}; retry {}/{} in {:?}",
                self.id,
                self.name,
                err.kind,
                retries,
                self.retry.max_retries,
                delay
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            attempts += 1;
            result = self
                .recorder
                .retry(&self.cancel, self.id, || async {
                    self.limiter.wait(&self.cancel).await?;
                    self.call_backend().await
                })
                .await;
        }

        self.outcome(result, attempts, started)
    }

    fn should_retry(&self, err: &CleanError, retries: u32) -> bool {
        self.retryable && err.is_retryable() && retries < self.retry.max_retries && !self.cancel.is_cancelled()
    }

    /// Backend call bounded by the timeout and cancellation, then result checks.
    async fn call_backend(&self) -> Result<CleanResult> {
        let call = self.backend.cleanup(&self.cancel, &self.settings);
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(CleanError::cancelled(format!("operation '{}' cancelled", self.name)));
            }
            outcome = tokio::time::timeout(self.timeout, call) => match outcome {
                Ok(result) => result?,
                Err(_) => {
                    return Err(CleanError::timeout(format!(
                        "operation '{}' exceeded {:?}",
                        self.name, self.timeout
                    ))
                    .with_retryable(true));
                }
            },
        };
        self.check_result(result)
    }

    /// A result that contradicts itself overrides the backend's success claim.
    fn check_result(&self, result: CleanResult) -> Result<CleanResult> {
        result.validate().map_err(|err| {
            log::warn!("operation '{}' returned an inconsistent result: {}", self.name, err.details);
            err.with_context("operation", &self.name)
        })?;
        if self.mode.is_dry() && result.strategy != CleanStrategy::DryRun {
            return Err(CleanError::validation(format!(
                "operation '{}' ran in {} mode but reported strategy {}",
                self.name, self.mode, result.strategy
            )));
        }
        Ok(result)
    }

    /// Stores the first attempt's outcome; retries are recorded by the recorder itself.
    fn record(&self, result: &Result<CleanResult>) {
        let recorded = match result {
            Ok(value) => self.recorder.complete(self.id, value.clone()),
            Err(err) => {
                settle_failed(&self.recorder, self.id, err);
                Ok(())
            }
        };
        if let Err(err) = recorded {
            log::error!("could not record outcome of {}: {}", self.id, err);
        }
    }

    fn outcome(&self, result: Result<CleanResult>, attempts: u32, started: Instant) -> OperationOutcome {
        match &result {
            Ok(r) => log::debug!(
                "operation {} ({}) completed: {} bytes, {} items",
                self.id,
                self.name,
                r.freed_bytes,
                r.items_removed
            ),
            Err(err) => log::debug!("operation {} ({}) failed: {}", self.id, self.name, err),
        }
        OperationOutcome {
            id: self.id,
            name: self.name.clone(),
            result,
            attempts,
            duration: started.elapsed(),
        }
    }
}

/// Drives a record to `Failed` from wherever it currently is.
pub(super) fn settle_failed(recorder: &RollbackManager, id: OperationId, err: &CleanError) {
    let settled = match recorder.state(id) {
        Some(OperationState::Pending) => recorder.start(id).and_then(|_| recorder.fail(id, err.clone())),
        Some(OperationState::Running) => recorder.fail(id, err.clone()),
        _ => Ok(()),
    };
    if let Err(record_err) = settled {
        log::error!("could not record failure of {}: {}", id, record_err);
    }
}
