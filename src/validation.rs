mod cache;
mod rules;
mod sanitizer;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub use crate::config::ValidationLevel;
use crate::config::ValidationConfig;
use crate::domain::Configuration;
use crate::error::CleanError;
use crate::ops::{Clock, SystemClock};
pub use cache::ValidationCache;
pub use sanitizer::{ConfigSanitizer, SanitizeOptions, GENERATIONS_CLAMP_MAX, GENERATIONS_CLAMP_MIN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Schema,
    Policy,
    CrossField,
    Business,
    Security,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub category: IssueCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub field: String,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SanitizedDiff {
    pub fields_modified: Vec<String>,
    pub values: Vec<DiffEntry>,
}

impl SanitizedDiff {
    pub(crate) fn record(
        &mut self,
        field: String,
        old: impl Serialize,
        new: impl Serialize,
        reason: &str,
    ) {
        if !self.fields_modified.contains(&field) {
            self.fields_modified.push(field.clone());
        }
        self.values.push(DiffEntry {
            field,
            old: serde_json::to_value(old).unwrap_or(serde_json::Value::Null),
            new: serde_json::to_value(new).unwrap_or(serde_json::Value::Null),
            reason: reason.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub level: ValidationLevel,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub duration_elapsed: Duration,
    pub sanitized_diff: Option<SanitizedDiff>,
    pub cache_hit: bool,
}

impl ValidationResult {
    pub fn has_error_in(&self, category: IssueCategory) -> bool {
        self.errors.iter().any(|e| e.category == category)
    }

    /// Folds every error into one `VALIDATION` error for callers that need a `Result`.
    pub fn to_error(&self) -> Option<CleanError> {
        if self.is_valid {
            return None;
        }
        let summary = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        let mut err = CleanError::validation(format!(
            "configuration failed {} validation: {}",
            level_name(self.level),
            summary
        ));
        if self.has_error_in(IssueCategory::Security) {
            err = err.with_context("tag", "security");
        }
        Some(err.with_context("errors", self.errors.len()))
    }
}

fn level_name(level: ValidationLevel) -> &'static str {
    match level {
        ValidationLevel::None => "none",
        ValidationLevel::Basic => "basic",
        ValidationLevel::Comprehensive => "comprehensive",
        ValidationLevel::Strict => "strict",
    }
}

/// Error and warning collector shared by rules and the sanitizer.
#[derive(Debug, Default)]
pub struct Report {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Report {
    pub(crate) fn error(&mut self, field: impl Into<String>, message: impl Into<String>, category: IssueCategory) {
        self.errors.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
            category,
        });
    }

    pub(crate) fn warning(&mut self, field: impl Into<String>, message: impl Into<String>, category: IssueCategory) {
        self.warnings.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
            category,
        });
    }
}

/// Level-driven validation, optional sanitization and a result cache.
pub struct ConfigValidator {
    options: ValidationConfig,
    sanitizer: ConfigSanitizer,
    cache: Option<ValidationCache>,
}

impl ConfigValidator {
    pub fn new(options: ValidationConfig) -> Self {
        Self::with_parts(options, ConfigSanitizer::default(), Arc::new(SystemClock))
    }

    pub fn with_parts(options: ValidationConfig, sanitizer: ConfigSanitizer, clock: Arc<dyn Clock>) -> Self {
        let cache = options.enable_cache.then(|| {
            ValidationCache::with_clock(
                options.cache_capacity,
                Duration::from_secs(options.cache_ttl_secs),
                clock,
            )
        });
        ConfigValidator {
            options,
            sanitizer,
            cache,
        }
    }

    pub fn options(&self) -> &ValidationConfig {
        &self.options
    }

    pub fn cache(&self) -> Option<&ValidationCache> {
        self.cache.as_ref()
    }

    /// Runs every rule up to and including `level`.
    pub fn validate(&self, config: &Configuration, level: ValidationLevel) -> ValidationResult {
        let started = Instant::now();
        let mut report = Report::default();
        self.run_rules(config, level, &mut report);
        Self::finish(level, report, started, None)
    }

    fn run_rules(&self, config: &Configuration, level: ValidationLevel, report: &mut Report) {
        if level >= ValidationLevel::Basic {
            rules::basic(config, report);
        }
        if level >= ValidationLevel::Comprehensive {
            rules::comprehensive(config, report);
        }
        if level >= ValidationLevel::Strict {
            rules::strict(config, &self.options.required_protected_paths, report);
        }
    }

    fn finish(
        level: ValidationLevel,
        report: Report,
        started: Instant,
        sanitized_diff: Option<SanitizedDiff>,
    ) -> ValidationResult {
        ValidationResult {
            is_valid: report.errors.is_empty(),
            level,
            errors: report.errors,
            warnings: report.warnings,
            duration_elapsed: started.elapsed(),
            sanitized_diff,
            cache_hit: false,
        }
    }

    /// Sanitizes a copy of `config`; returns it with the diff and any warnings.
    pub fn sanitize(&self, config: &Configuration) -> (Configuration, SanitizedDiff, Vec<ValidationIssue>) {
        let mut report = Report::default();
        let (sanitized, diff) = self.sanitizer.sanitize(config, &mut report);
        (sanitized, diff, report.warnings)
    }

    /// Validates the supplied value first, then (if enabled) sanitizes a copy
    /// and validates again so the result describes what will actually run.
    pub fn validate_and_sanitize(
        &self,
        config: &Configuration,
        level: ValidationLevel,
    ) -> (Configuration, ValidationResult) {
        let started = Instant::now();
        let initial = self.validate(config, level);
        if !self.options.enable_sanitization {
            return (config.clone(), initial);
        }

        let mut report = Report::default();
        let (sanitized, diff) = self.sanitizer.sanitize(config, &mut report);
        for warning in &report.warnings {
            log::warn!("sanitizer: {}: {}", warning.field, warning.message);
        }
        self.run_rules(&sanitized, level, &mut report);
        let result = Self::finish(level, report, started, Some(diff));
        if !initial.is_valid && result.is_valid {
            log::debug!(
                "sanitization resolved {} validation error(s)",
                initial.errors.len()
            );
        }
        (sanitized, result)
    }

    /// Like `validate_and_sanitize`, consulting the cache first and storing
    /// configurations that come out valid.
    pub fn prepare(&self, config: &Configuration, level: ValidationLevel) -> (Configuration, ValidationResult) {
        let key = config.fingerprint();
        if let Some(cache) = &self.cache {
            let started = Instant::now();
            let mut revalidated = None;
            let hit = cache.get(&key, |cached| {
                let result = self.validate(cached, level);
                let ok = result.is_valid;
                revalidated = Some(result);
                ok
            });
            if let (Some(cached), Some(mut result)) = (hit, revalidated) {
                result.duration_elapsed = started.elapsed();
                result.cache_hit = true;
                return (cached, result);
            }
            log::debug!("validation cache miss");
        }

        let (prepared, result) = self.validate_and_sanitize(config, level);
        if result.is_valid {
            if let Some(cache) = &self.cache {
                cache.set(key, prepared.clone());
            }
        }
        (prepared, result)
    }
}
