use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use super::*;
use crate::config::ValidationConfig;
use crate::domain::{
    Configuration, HomebrewSettings, MaxDiskUsagePercent, NixGenerationsSettings, Operation,
    OperationSettings, OptimizationLevel, Profile, RiskLevel, SafetyLevel, SettingsKind, SystemTempSettings,
    TempFilesSettings, FileSelection, OP_HOMEBREW, OP_NIX_GENERATIONS, OP_SYSTEM_TEMP, OP_TEMP_FILES,
};
use crate::ops::ManualClock;

fn temp_op(older_than: &str) -> Operation {
    Operation::new(OP_TEMP_FILES, "Old temp files", RiskLevel::Low).with_settings(
        OperationSettings::with_kind(SettingsKind::TempFiles(TempFilesSettings {
            older_than: older_than.into(),
            excludes: vec![],
        })),
    )
}

fn nix_op(generations: u32) -> Operation {
    Operation::new(OP_NIX_GENERATIONS, "Old generations", RiskLevel::Low).with_settings(
        OperationSettings::with_kind(SettingsKind::NixGenerations(NixGenerationsSettings {
            generations,
            optimization: OptimizationLevel::Conservative,
        })),
    )
}

fn config_with(ops: Vec<Operation>) -> Configuration {
    let mut profile = Profile::new("quick", "Quick cleanup");
    profile.operations = ops;
    Configuration::new("1.0.0", SafetyLevel::Enabled)
        .with_protected_path("/Library")
        .with_protected_path("/System")
        .with_profile(profile)
        .unwrap()
}

fn validator() -> ConfigValidator {
    ConfigValidator::new(ValidationConfig::default())
}

fn sanitizer_with_home(home: &str) -> ConfigValidator {
    let sanitizer = ConfigSanitizer::new(SanitizeOptions {
        home_dir: Some(PathBuf::from(home)),
        ..SanitizeOptions::default()
    });
    ConfigValidator::with_parts(ValidationConfig::default(), sanitizer, Arc::new(crate::ops::SystemClock))
}

#[test]
fn valid_config_passes_every_level() {
    let config = config_with(vec![nix_op(3), temp_op("7d")]);
    for level in [
        ValidationLevel::None,
        ValidationLevel::Basic,
        ValidationLevel::Comprehensive,
        ValidationLevel::Strict,
    ] {
        let result = validator().validate(&config, level);
        assert!(result.is_valid, "{:?}: {:?}", level, result.errors);
    }
}

#[test]
fn none_level_checks_nothing() {
    let mut config = config_with(vec![temp_op("7d")]);
    config.version.clear();
    assert!(validator().validate(&config, ValidationLevel::None).is_valid);
    assert!(!validator().validate(&config, ValidationLevel::Basic).is_valid);
}

#[test]
fn disk_usage_policy_band_is_an_error() {
    let mut config = config_with(vec![temp_op("7d")]);
    config.max_disk_usage_percent = MaxDiskUsagePercent::new(5).unwrap();
    let result = validator().validate(&config, ValidationLevel::Basic);
    assert!(!result.is_valid);
    assert!(result.has_error_in(IssueCategory::Policy));

    for edge in [MaxDiskUsagePercent::POLICY_MIN, MaxDiskUsagePercent::POLICY_MAX] {
        config.max_disk_usage_percent = MaxDiskUsagePercent::new(edge).unwrap();
        assert!(validator().validate(&config, ValidationLevel::Basic).is_valid);
    }
}

#[test]
fn relative_and_traversing_protected_paths_fail_basic() {
    let mut config = config_with(vec![temp_op("7d")]);
    config.protected_paths = vec!["relative/path".into(), "/var/../etc".into(), "".into()];
    let result = validator().validate(&config, ValidationLevel::Basic);
    assert_eq!(result.errors.len(), 3);
}

#[test]
fn mismatched_variant_fails_basic() {
    let op = Operation::new(OP_HOMEBREW, "brew", RiskLevel::Low)
        .with_settings(OperationSettings::with_kind(SettingsKind::TempFiles(TempFilesSettings {
            older_than: "7d".into(),
            excludes: vec![],
        })));
    let result = validator().validate(&config_with(vec![op]), ValidationLevel::Basic);
    assert!(!result.is_valid);
}

#[test]
fn critical_operation_with_safety_disabled_is_a_security_error() {
    let mut config = config_with(vec![temp_op("7d")]);
    config.safety_level = SafetyLevel::Disabled;
    config.profiles.values_mut().for_each(|p| p.operations[0].risk_level = RiskLevel::Critical);

    assert!(validator().validate(&config, ValidationLevel::Basic).is_valid);
    let result = validator().validate(&config, ValidationLevel::Comprehensive);
    assert!(result.has_error_in(IssueCategory::Security));
    let err = result.to_error().unwrap();
    assert_eq!(err.context.get("tag").map(String::as_str), Some("security"));
}

#[test]
fn comprehensive_runs_variant_validators() {
    let config = config_with(vec![nix_op(0), temp_op("soon")]);
    assert!(validator().validate(&config, ValidationLevel::Basic).is_valid);
    let result = validator().validate(&config, ValidationLevel::Comprehensive);
    assert_eq!(result.errors.len(), 2);
}

#[test]
fn comprehensive_warnings() {
    let mut config = config_with((0..101).map(|_| temp_op("7d")).collect());
    config.max_disk_usage_percent = MaxDiskUsagePercent::new(92).unwrap();
    let result = validator().validate(&config, ValidationLevel::Comprehensive);
    assert!(result.is_valid);
    assert_eq!(result.warnings.len(), 2);
}

#[test]
fn strict_requires_protected_paths_and_profiles() {
    let mut config = config_with(vec![temp_op("7d")]);
    config.protected_paths = vec!["/System".into()];
    let result = validator().validate(&config, ValidationLevel::Strict);
    assert_eq!(result.errors.len(), 1);
    assert!(result.has_error_in(IssueCategory::Strict));

    config.profiles.clear();
    let basic = validator().validate(&config, ValidationLevel::Basic);
    assert!(basic.is_valid);
    assert!(!basic.warnings.is_empty());
    assert!(!validator().validate(&config, ValidationLevel::Strict).is_valid);
}

#[test]
fn errors_are_monotone_in_level() {
    let mut config = config_with(vec![nix_op(500), temp_op("later")]);
    config.version = " ".into();
    config.max_disk_usage_percent = MaxDiskUsagePercent::new(99).unwrap();
    config.safety_level = SafetyLevel::Disabled;
    config.protected_paths = vec!["/tmp/../x".into()];

    let levels = [
        ValidationLevel::None,
        ValidationLevel::Basic,
        ValidationLevel::Comprehensive,
        ValidationLevel::Strict,
    ];
    let results: Vec<_> = levels.iter().map(|l| validator().validate(&config, *l)).collect();
    for pair in results.windows(2) {
        for err in &pair[0].errors {
            assert!(pair[1].errors.contains(err), "{:?} missing at higher level", err);
        }
        assert!(pair[1].errors.len() >= pair[0].errors.len());
    }
}

#[test]
fn sanitizes_protected_paths_round_trip() {
    let mut config = config_with(vec![temp_op("7d")]);
    config.protected_paths = vec!["  /System  ".into(), "~/Docs".into(), "/System".into()];

    let v = sanitizer_with_home("/Users/a");
    let (sanitized, diff, _) = v.sanitize(&config);
    assert_eq!(sanitized.protected_paths, vec!["/System".to_string(), "/Users/a/Docs".to_string()]);
    let path_entries: Vec<_> = diff.values.iter().filter(|d| d.field == "protected_paths").collect();
    assert_eq!(path_entries.len(), 2);
    assert_eq!(diff.values.len(), 2);
    assert_eq!(diff.fields_modified, vec!["protected_paths".to_string()]);

    // the input is left alone
    assert_eq!(config.protected_paths[1], "~/Docs");
}

#[test]
fn sanitization_is_idempotent() {
    let mut profile = Profile::new("quick", "  Quick cleanup ");
    profile.operations = vec![
        nix_op(5000),
        temp_op("168h"),
        Operation::new(OP_HOMEBREW, "brew", RiskLevel::Low).with_settings(
            OperationSettings::with_kind(SettingsKind::Homebrew(HomebrewSettings {
                prune: "1h30m".into(),
                file_selection: FileSelection::UnusedOnly,
            })),
        ),
        Operation::new(OP_SYSTEM_TEMP, "system temp", RiskLevel::Medium).with_settings(
            OperationSettings::with_kind(SettingsKind::SystemTemp(SystemTempSettings {
                paths: vec!["/tmp/".into(), "/var//tmp".into(), "/tmp".into(), ".".into()],
                older_than: "2w".into(),
                excludes: vec!["relative".into()],
            })),
        ),
    ];
    let mut config = Configuration::new(" 1.0 ", SafetyLevel::Enabled)
        .with_protected_path("/System/")
        .with_profile(profile)
        .unwrap();
    config.current_profile = "quick".into();

    let v = sanitizer_with_home("/home/u");
    let (once, diff_once, warnings) = v.sanitize(&config);
    assert!(!diff_once.is_empty());
    assert!(!warnings.is_empty());
    let (twice, diff_twice, _) = v.sanitize(&once);
    assert_eq!(once, twice);
    assert!(diff_twice.is_empty(), "{:?}", diff_twice);

    let ops = &once.profiles["quick"].operations;
    match &ops[0].settings.as_ref().unwrap().kind {
        Some(SettingsKind::NixGenerations(n)) => assert_eq!(n.generations, GENERATIONS_CLAMP_MAX),
        other => panic!("unexpected {:?}", other),
    }
    match &ops[1].settings.as_ref().unwrap().kind {
        Some(SettingsKind::TempFiles(t)) => assert_eq!(t.older_than, "7d"),
        other => panic!("unexpected {:?}", other),
    }
    match &ops[3].settings.as_ref().unwrap().kind {
        Some(SettingsKind::SystemTemp(s)) => {
            assert_eq!(s.paths, vec!["/tmp".to_string(), "/var/tmp".to_string()]);
            assert_eq!(s.older_than, "14d");
            assert!(s.excludes.is_empty());
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(once.version, "1.0");
    assert_eq!(once.protected_paths, vec!["/System".to_string()]);
}

#[test]
fn invalid_duration_is_left_alone_with_warning() {
    let config = config_with(vec![temp_op("whenever")]);
    let (sanitized, diff, warnings) = validator().sanitize(&config);
    assert!(diff.is_empty());
    assert_eq!(warnings.len(), 1);
    match &sanitized.profiles["quick"].operations[0].settings.as_ref().unwrap().kind {
        Some(SettingsKind::TempFiles(t)) => assert_eq!(t.older_than, "whenever"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn validate_and_sanitize_reports_sanitized_state() {
    let mut config = config_with(vec![temp_op("7d")]);
    config.protected_paths = vec!["~/Docs".into(), "/System".into(), "/Library".into()];

    let v = sanitizer_with_home("/Users/a");
    assert!(!v.validate(&config, ValidationLevel::Basic).is_valid);
    let (sanitized, result) = v.validate_and_sanitize(&config, ValidationLevel::Comprehensive);
    assert!(result.is_valid, "{:?}", result.errors);
    assert!(result.sanitized_diff.is_some());
    assert!(sanitized.protected_paths.contains(&"/Users/a/Docs".to_string()));
}

#[test]
fn cache_serves_valid_configs_until_ttl() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let options = ValidationConfig {
        cache_ttl_secs: 60,
        ..ValidationConfig::default()
    };
    let v = ConfigValidator::with_parts(options, ConfigSanitizer::default(), clock.clone());
    let config = config_with(vec![temp_op("7d")]);

    let (_, first) = v.prepare(&config, ValidationLevel::Comprehensive);
    assert!(first.is_valid && !first.cache_hit);
    let (_, second) = v.prepare(&config, ValidationLevel::Comprehensive);
    assert!(second.cache_hit);

    clock.advance(Duration::from_secs(61));
    let (_, third) = v.prepare(&config, ValidationLevel::Comprehensive);
    assert!(!third.cache_hit);
}

#[test]
fn cache_invalidates_entries_that_fail_revalidation() {
    let cache = ValidationCache::new(4, Duration::from_secs(300));
    let config = config_with(vec![temp_op("7d")]);
    cache.set("k", config.clone());
    assert!(cache.get("k", |_| true).is_some());
    assert!(cache.get("k", |_| false).is_none());
    assert!(cache.is_empty());
}

#[test]
fn invalid_configs_are_not_cached() {
    let v = validator();
    let mut config = config_with(vec![temp_op("7d")]);
    config.version.clear();
    let (_, result) = v.prepare(&config, ValidationLevel::Basic);
    assert!(!result.is_valid);
    assert_eq!(v.cache().map(|c| c.len()), Some(0));
}
