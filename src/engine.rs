// src/engine.rs

mod dispatch;
mod preflight;
mod result;


use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::backend::BackendRegistry;
use crate::config::{EngineConfig, ValidationLevel};
use crate::domain::{CleanResult, Configuration, ExecutionMode, Operation, RiskLevel};
use crate::error::{CleanError, Result};
use crate::ops::{Clock, OperationId, OperationIdGenerator, RandomSource, SystemClock, SystemRandom};
use crate::pool::WorkerPool;
use crate::rate_limit::RateLimiter;
use crate::recovery::RollbackManager;
use crate::security::SecurityValidator;
use crate::validation::ConfigValidator;
use dispatch::{settle_failed, OperationTask};
use preflight::PlannedOperation;

pub use result::{ConcurrentExecutionResult, OperationOutcome, ScanEntry, ScanReport};

/// Upper bound on any single backend call.
pub const MAX_OPERATION_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    Approve,
    Deny,
}

/// What the confirmation callback is told about the operation it gates.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationContext {
    pub profile: String,
    pub mode: ExecutionMode,
    pub risk: RiskLevel,
    pub paths: Vec<String>,
}

/// Asked before a destructive operation whose settings request confirmation.
#[async_trait]
pub trait ConfirmationCallback: Send + Sync {
    async fn confirm(&self, operation: &Operation, context: &ConfirmationContext) -> Confirmation;
}

/// Approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ConfirmationCallback for AutoApprove {
    async fn confirm(&self, _operation: &Operation, _context: &ConfirmationContext) -> Confirmation {
        Confirmation::Approve
    }
}

/// Resolves a profile into operations and runs them under the safety policy.
pub struct CleanupEngine {
    registry: BackendRegistry,
    recorder: Arc<RollbackManager>,
    limiter: Arc<RateLimiter>,
    validator: ConfigValidator,
    security: SecurityValidator,
    confirmation: Arc<dyn ConfirmationCallback>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    ids: OperationIdGenerator,
    config: EngineConfig,
}

pub struct EngineBuilder {
    registry: BackendRegistry,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    confirmation: Arc<dyn ConfirmationCallback>,
    validator: Option<ConfigValidator>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Source for run ids and operation id nonces.
    pub fn random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn confirmation(mut self, confirmation: Arc<dyn ConfirmationCallback>) -> Self {
        self.confirmation = confirmation;
        self
    }

    /// Replaces the validator built from `config.validation`.
    pub fn validator(mut self, validator: ConfigValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn build(self) -> Result<CleanupEngine> {
        self.config.validate()?;
        let security = SecurityValidator::new(&self.config.security)?;
        let validator = match self.validator {
            Some(validator) => validator,
            None => ConfigValidator::with_parts(
                self.config.validation.clone(),
                Default::default(),
                Arc::clone(&self.clock),
            ),
        };
        Ok(CleanupEngine {
            registry: self.registry,
            recorder: Arc::new(RollbackManager::from_config(&self.config.history, Arc::clone(&self.clock))),
            limiter: Arc::new(RateLimiter::from_config(&self.config.rate)),
            validator,
            security,
            confirmation: self.confirmation,
            clock: self.clock,
            ids: OperationIdGenerator::with_random(Arc::clone(&self.random)),
            random: self.random,
            config: self.config,
        })
    }
}

impl CleanupEngine {
    pub fn builder(registry: BackendRegistry) -> EngineBuilder {
        EngineBuilder {
            registry,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            random: Arc::new(SystemRandom),
            confirmation: Arc::new(AutoApprove),
            validator: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn recorder(&self) -> &Arc<RollbackManager> {
        &self.recorder
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Runs `profile_name` at the configured validation level.
    pub async fn run(
        &self,
        config: &Configuration,
        profile_name: &str,
        mode: ExecutionMode,
        cancel: &CancellationToken,
    ) -> ConcurrentExecutionResult {
        self.run_with_level(config, profile_name, mode, self.config.validation.level, cancel)
            .await
    }

    pub async fn run_with_level(
        &self,
        config: &Configuration,
        profile_name: &str,
        mode: ExecutionMode,
        level: ValidationLevel,
        cancel: &CancellationToken,
    ) -> ConcurrentExecutionResult {
        let run_id = self.random.uuid();
        let started_at = self.clock.now();
        let shown_profile = self.security.sanitize_string(profile_name);
        log::info!("run {} starting: profile '{}', mode {}", run_id, shown_profile, mode);

        let pruned = self
            .recorder
            .cleanup(Duration::from_secs(self.config.history.cleanup_older_than_secs));
        if pruned > 0 {
            log::debug!("pruned {} old operation record(s)", pruned);
        }

        let plan = match self.plan(config, profile_name, mode, level, true) {
            Ok(plan) => plan,
            Err(err) => {
                log::warn!("run {} refused: {}", run_id, err);
                return ConcurrentExecutionResult::aborted(
                    run_id,
                    &shown_profile,
                    mode,
                    err,
                    started_at,
                    self.clock.now(),
                );
            }
        };

        let outcomes = self.dispatch(&plan.profile, mode, plan.operations, cancel).await;
        let result = ConcurrentExecutionResult::aggregate(
            run_id,
            &plan.profile,
            mode,
            outcomes,
            started_at,
            self.clock.now(),
        );
        log::info!(
            "run {} finished {}: {}/{} completed, {} bytes freed",
            run_id,
            result.state,
            result.completed,
            result.total_operations,
            result.freed_bytes
        );
        result
    }

    fn operation_timeout(&self, planned: &PlannedOperation) -> Duration {
        let own = Duration::from_secs(planned.settings.timeout_seconds.max(1));
        own.min(self.config.default_timeout()).min(MAX_OPERATION_TIMEOUT)
    }

    async fn dispatch(
        &self,
        profile: &str,
        run_mode: ExecutionMode,
        planned: Vec<PlannedOperation>,
        cancel: &CancellationToken,
    ) -> Vec<OperationOutcome> {
        // Record everything before the first task starts.
        let recorded: Vec<(OperationId, PlannedOperation)> = planned
            .into_iter()
            .map(|p| {
                let id = self.ids.next_id();
                let mut context = BTreeMap::new();
                context.insert("profile".to_string(), profile.to_string());
                context.insert("mode".to_string(), p.mode.to_string());
                context.insert("risk".to_string(), p.risk.to_string());
                context.insert("backend".to_string(), p.backend.name().to_string());
                let rollback = p.backend.rollback(&p.settings);
                self.recorder
                    .record(id, p.operation.name.clone(), rollback, context, p.backend.retryable());
                (id, p)
            })
            .collect();

        if recorded.is_empty() {
            return Vec::new();
        }

        let pool = WorkerPool::new(self.config.pool.workers.min(recorded.len()), self.config.pool.buffer_factor);
        let submit_timeout = Duration::from_secs(self.config.pool.shutdown_timeout_secs.max(1));
        let mut slots: Vec<Slot> = Vec::with_capacity(recorded.len());

        for (id, planned) in recorded {
            let name = planned.operation.name.clone();
            if cancel.is_cancelled() {
                let err = CleanError::cancelled("run cancelled before dispatch");
                settle_failed(&self.recorder, id, &err);
                slots.push(Slot::Done(never_dispatched(id, name, err)));
                continue;
            }

            // Force runs and anything left dry skip the gate.
            if planned.settings.confirm_before_delete
                && run_mode.requires_confirmation()
                && !planned.mode.is_dry()
            {
                let context = ConfirmationContext {
                    profile: profile.to_string(),
                    mode: planned.mode,
                    risk: planned.risk,
                    paths: planned.settings.all_paths().into_iter().map(String::from).collect(),
                };
                if self.confirmation.confirm(&planned.operation, &context).await == Confirmation::Deny {
                    log::info!("operation {} ({}) denied by confirmation callback", id, name);
                    let err = CleanError::denied(format!("operation '{}' was not confirmed", name));
                    settle_failed(&self.recorder, id, &err);
                    slots.push(Slot::Done(never_dispatched(id, name, err)));
                    continue;
                }
            }

            let task = OperationTask {
                id,
                name: name.clone(),
                timeout: self.operation_timeout(&planned),
                retryable: planned.backend.retryable(),
                backend: planned.backend,
                settings: planned.settings,
                mode: planned.mode,
                retry: self.config.retry.clone(),
                recorder: Arc::clone(&self.recorder),
                limiter: Arc::clone(&self.limiter),
                cancel: cancel.clone(),
            };
            let submitted = pool
                .submit_with_timeout(async move { Ok(task.run().await) }, submit_timeout)
                .await;
            match submitted {
                Ok(handle) => slots.push(Slot::Running(id, name, handle)),
                Err(err) => {
                    settle_failed(&self.recorder, id, &err);
                    slots.push(Slot::Done(never_dispatched(id, name, err)));
                }
            }
        }

        let mut outcomes = Vec::with_capacity(slots.len());
        for slot in slots {
            let outcome = match slot {
                Slot::Done(outcome) => outcome,
                Slot::Running(id, name, handle) => match handle.join().await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        // panicked or dropped inside the pool
                        settle_failed(&self.recorder, id, &err);
                        never_dispatched(id, name, err)
                    }
                },
            };
            outcomes.push(outcome);
        }

        let shutdown = Duration::from_secs(self.config.pool.shutdown_timeout_secs);
        if let Err(err) = pool.shutdown(shutdown).await {
            log::warn!("worker pool did not shut down cleanly: {}", err);
        }
        outcomes
    }

    /// Estimates what a profile would free; records nothing.
    pub async fn scan(
        &self,
        config: &Configuration,
        profile_name: &str,
        cancel: &CancellationToken,
    ) -> Result<ScanReport> {
        let plan = self.plan(
            config,
            profile_name,
            ExecutionMode::DryRun,
            self.config.validation.level,
            false,
        )?;

        let sizes = plan.operations.iter().map(|planned| async move {
            let backend = &planned.backend;
            let available = backend.is_available(cancel).await;
            let estimated_bytes = if available && !cancel.is_cancelled() {
                backend.estimated_size(cancel).await
            } else {
                0
            };
            ScanEntry {
                name: planned.operation.name.clone(),
                available,
                estimated_bytes,
            }
        });
        let entries = tokio::select! {
            _ = cancel.cancelled() => return Err(CleanError::cancelled("scan cancelled")),
            entries = futures::future::join_all(sizes) => entries,
        };

        let total_bytes = entries.iter().map(|e| e.estimated_bytes).sum();
        Ok(ScanReport {
            profile: plan.profile,
            entries,
            total_bytes,
            scanned_at: self.clock.now(),
        })
    }

    /// Rolls back every failed operation the recorder still holds.
    pub async fn rollback_all(
        &self,
        cancel: &CancellationToken,
    ) -> std::collections::HashMap<OperationId, Result<CleanResult>> {
        self.recorder.rollback_all(cancel).await
    }
}

enum Slot {
    Done(OperationOutcome),
    Running(OperationId, String, crate::pool::TaskHandle<OperationOutcome>),
}

fn never_dispatched(id: OperationId, name: String, err: CleanError) -> OperationOutcome {
    OperationOutcome {
        id,
        name,
        result: Err(err),
        attempts: 0,
        duration: Duration::ZERO,
    }
}
