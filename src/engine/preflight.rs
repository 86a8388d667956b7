use std::sync::Arc;

use super::CleanupEngine;
use crate::backend::CleanerBackend;
use crate::config::ValidationLevel;
use crate::domain::{Configuration, ExecutionMode, Operation, OperationSettings, RiskLevel, Status};
use crate::error::{CleanError, Result};
use crate::security::paths::paths_overlap;

/// An operation that passed every gate, ready to be recorded and dispatched.
pub(super) struct PlannedOperation {
    pub operation: Operation,
    pub risk: RiskLevel,
    pub mode: ExecutionMode,
    /// Settings handed to the backend, with the effective mode filled in.
    pub settings: OperationSettings,
    pub backend: Arc<dyn CleanerBackend>,
}

pub(super) struct Plan {
    pub profile: String,
    pub operations: Vec<PlannedOperation>,
}

impl CleanupEngine {
    /// Validation, profile selection, policy gates and backend resolution.
    /// Nothing observable happens until this succeeds.
    pub(super) fn plan(
        &self,
        config: &Configuration,
        profile_name: &str,
        mode: ExecutionMode,
        level: ValidationLevel,
        validate_backends: bool,
    ) -> Result<Plan> {
        let (prepared, validation) = self.validator.prepare(config, level);
        if let Some(err) = validation.to_error() {
            return Err(err);
        }
        for warning in &validation.warnings {
            log::debug!("validation warning: {}: {}", warning.field, warning.message);
        }

        let profile = prepared.profile(profile_name).ok_or_else(|| {
            CleanError::not_found(format!(
                "profile '{}' is not defined",
                self.security.sanitize_string(profile_name)
            ))
        })?;
        if profile.status == Status::Disabled {
            return Err(CleanError::invalid_state(format!(
                "profile '{}' is disabled",
                profile.name
            )));
        }

        let ceiling = prepared.safety_level.risk_ceiling();
        let mut candidates = Vec::new();
        let mut over_ceiling = Vec::new();
        for operation in profile.active_operations() {
            let risk = operation.effective_risk(profile);
            if risk > ceiling {
                over_ceiling.push(format!("{} ({})", operation.name, risk));
            }
            candidates.push((operation, risk));
        }
        if !over_ceiling.is_empty() {
            return Err(CleanError::forbidden(format!(
                "risk exceeds the {} ceiling of safety level {}: {}",
                ceiling,
                prepared.safety_level,
                over_ceiling.join(", ")
            ))
            .with_context("safety_level", prepared.safety_level)
            .with_context("ceiling", ceiling));
        }

        for (operation, _) in &candidates {
            let settings = match &operation.settings {
                Some(settings) => settings,
                None => continue,
            };
            for target in settings.all_paths() {
                if let Some(protected) = prepared
                    .protected_paths
                    .iter()
                    .find(|protected| paths_overlap(target, protected))
                {
                    return Err(CleanError::forbidden(format!(
                        "operation '{}' names '{}', which overlaps protected path '{}'",
                        operation.name, target, protected
                    ))
                    .with_context("operation", &operation.name)
                    .with_context("protected", protected));
                }
            }
            for path in settings.all_paths() {
                self.security
                    .validate_path(path)
                    .map_err(|err| err.with_context("operation", &operation.name))?;
            }
        }

        let mut planned = Vec::with_capacity(candidates.len());
        for (operation, risk) in candidates {
            let backend = self.registry.resolve(&operation.name)?;
            let base = operation.settings.clone().unwrap_or_default();
            let effective = base.effective_mode(mode);
            let settings = OperationSettings {
                execution_mode: Some(effective),
                ..base
            };
            planned.push(PlannedOperation {
                operation: operation.clone(),
                risk,
                mode: effective,
                settings,
                backend,
            });
        }

        if validate_backends {
            let failures: Vec<String> = planned
                .iter()
                .filter_map(|p| {
                    p.backend
                        .validate(p.operation.settings.as_ref())
                        .err()
                        .map(|err| format!("{}: {}", p.operation.name, err.details))
                })
                .collect();
            if !failures.is_empty() {
                return Err(CleanError::validation(format!(
                    "backend settings rejected: {}",
                    failures.join("; ")
                ))
                .with_context("failures", failures.len()));
            }
        }

        Ok(Plan {
            profile: profile.name.clone(),
            operations: planned,
        })
    }
}
