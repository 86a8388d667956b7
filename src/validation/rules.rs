use super::{IssueCategory, Report};
use crate::domain::{
    Configuration, MaxDiskUsagePercent, Operation, RiskLevel, SafetyLevel, KNOWN_OPERATIONS,
};
use crate::security::paths::has_parent_reference;

const MAX_OPERATIONS_PER_PROFILE: usize = 100;
const COMPREHENSIVE_PROFILE: &str = "comprehensive";
const HIGH_USAGE_WARNING_PERCENT: u32 = 90;

/// Structural and field-level checks.
pub(super) fn basic(config: &Configuration, report: &mut Report) {
    if config.version.trim().is_empty() {
        report.error("version", "version must not be empty", IssueCategory::Schema);
    }

    let usage = config.max_disk_usage_percent;
    if !usage.within_policy() {
        report.error(
            "max_disk_usage_percent",
            format!(
                "{} is outside the allowed band {}..={}",
                usage,
                MaxDiskUsagePercent::POLICY_MIN,
                MaxDiskUsagePercent::POLICY_MAX
            ),
            IssueCategory::Policy,
        );
    }

    if config.protected_paths.is_empty() {
        report.error(
            "protected_paths",
            "at least one protected path is required",
            IssueCategory::Schema,
        );
    }
    for (idx, path) in config.protected_paths.iter().enumerate() {
        let field = format!("protected_paths[{}]", idx);
        if path.is_empty() {
            report.error(field, "path must not be empty", IssueCategory::Schema);
        } else if !path.starts_with('/') {
            report.error(field, format!("'{}' is not absolute", path), IssueCategory::Schema);
        } else if has_parent_reference(path) {
            report.error(field, format!("'{}' contains '..'", path), IssueCategory::Security);
        }
    }

    if config.profiles.is_empty() {
        report.warning("profiles", "no profiles defined", IssueCategory::Schema);
    } else if !config.profiles.contains_key(config.current_profile.as_str()) {
        report.error(
            "current_profile",
            format!("'{}' is not a defined profile", config.current_profile),
            IssueCategory::CrossField,
        );
    }

    for (key, profile) in &config.profiles {
        let prefix = format!("profiles.{}", key);
        if profile.name.trim().is_empty() {
            report.error(format!("{}.name", prefix), "name must not be empty", IssueCategory::Schema);
        } else if profile.name != key.as_str() {
            report.warning(
                format!("{}.name", prefix),
                format!("name '{}' differs from its key", profile.name),
                IssueCategory::Schema,
            );
        }
        if profile.description.trim().is_empty() {
            report.error(
                format!("{}.description", prefix),
                "description must not be empty",
                IssueCategory::Schema,
            );
        }
        if profile.operations.is_empty() {
            report.error(
                format!("{}.operations", prefix),
                "at least one operation is required",
                IssueCategory::Schema,
            );
        }
        for (idx, op) in profile.operations.iter().enumerate() {
            basic_operation(&format!("{}.operations[{}]", prefix, idx), op, report);
        }
    }
}

// Risk level and status are typed, so parsing already rejected unknown tokens.
fn basic_operation(prefix: &str, op: &Operation, report: &mut Report) {
    if op.name.trim().is_empty() {
        report.error(format!("{}.name", prefix), "name must not be empty", IssueCategory::Schema);
    }
    if op.description.trim().is_empty() {
        report.error(
            format!("{}.description", prefix),
            "description must not be empty",
            IssueCategory::Schema,
        );
    }
    if !op.settings_match_name() {
        report.error(
            format!("{}.settings", prefix),
            format!("settings variant does not belong to operation '{}'", op.name),
            IssueCategory::Schema,
        );
    }
}

/// Cross-field and business checks.
pub(super) fn comprehensive(config: &Configuration, report: &mut Report) {
    for (key, profile) in &config.profiles {
        let prefix = format!("profiles.{}", key);
        if profile.operations.len() > MAX_OPERATIONS_PER_PROFILE {
            report.warning(
                format!("{}.operations", prefix),
                format!(
                    "{} operations exceed the recommended maximum of {}",
                    profile.operations.len(),
                    MAX_OPERATIONS_PER_PROFILE
                ),
                IssueCategory::Business,
            );
        }

        for (idx, op) in profile.operations.iter().enumerate() {
            let field = format!("{}.operations[{}]", prefix, idx);
            if config.safety_level == SafetyLevel::Disabled && op.risk_level == RiskLevel::Critical {
                report.error(
                    field.clone(),
                    format!(
                        "critical operation '{}' is not allowed while safety is disabled",
                        op.name
                    ),
                    IssueCategory::Security,
                );
            }
            if !op.name.is_empty() && !KNOWN_OPERATIONS.contains(&op.name.as_str()) {
                report.warning(
                    format!("{}.name", field),
                    format!("'{}' is not a known operation", op.name),
                    IssueCategory::Business,
                );
            }
            if let Some(settings) = &op.settings {
                if let Err(err) = settings.validate() {
                    report.error(format!("{}.settings", field), err.details, IssueCategory::Business);
                }
            }
        }
    }

    if config.max_disk_usage_percent.get() > HIGH_USAGE_WARNING_PERCENT
        && config.current_profile != COMPREHENSIVE_PROFILE
    {
        report.warning(
            "max_disk_usage_percent",
            format!(
                "usage threshold above {}% works best with the '{}' profile",
                HIGH_USAGE_WARNING_PERCENT, COMPREHENSIVE_PROFILE
            ),
            IssueCategory::CrossField,
        );
    }
}

/// Extra requirements for hardened deployments.
pub(super) fn strict(config: &Configuration, required_paths: &[String], report: &mut Report) {
    if config.profiles.is_empty() {
        report.error(
            "profiles",
            "at least one profile must be explicitly defined",
            IssueCategory::Strict,
        );
    }
    for required in required_paths {
        if !config.protected_paths.iter().any(|p| p == required) {
            report.error(
                "protected_paths",
                format!("required protected path '{}' is missing", required),
                IssueCategory::Strict,
            );
        }
    }
}
