use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{IssueCategory, Report, SanitizedDiff};
use crate::domain::{canonical_duration, Configuration, SettingsKind};
use crate::security::paths::{clean_path, expand_home};

pub const GENERATIONS_CLAMP_MIN: u32 = 1;
pub const GENERATIONS_CLAMP_MAX: u32 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizeOptions {
    pub trim_whitespace: bool,
    pub expand_home: bool,
    /// Falls back to the current user's home directory.
    pub home_dir: Option<PathBuf>,
    pub validate_existence: bool,
    pub dedupe_paths: bool,
    pub normalize_durations: bool,
    pub clamp_generations: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        SanitizeOptions {
            trim_whitespace: true,
            expand_home: true,
            home_dir: None,
            validate_existence: false,
            dedupe_paths: true,
            normalize_durations: true,
            clamp_generations: true,
        }
    }
}

/// Normalizes a configuration copy and reports every change it made.
#[derive(Debug, Clone, Default)]
pub struct ConfigSanitizer {
    options: SanitizeOptions,
}

impl ConfigSanitizer {
    pub fn new(options: SanitizeOptions) -> Self {
        ConfigSanitizer { options }
    }

    pub fn options(&self) -> &SanitizeOptions {
        &self.options
    }

    /// Returns the sanitized copy; `config` itself is left untouched.
    pub fn sanitize(&self, config: &Configuration, report: &mut Report) -> (Configuration, SanitizedDiff) {
        let mut out = config.clone();
        let mut diff = SanitizedDiff::default();
        let home = self.options.home_dir.clone().or_else(dirs::home_dir);

        self.trim_field("version", &mut out.version, &mut diff);
        self.trim_field("current_profile", &mut out.current_profile, &mut diff);

        out.protected_paths =
            self.sanitize_paths("protected_paths", &out.protected_paths, home.as_deref(), &mut diff, report);

        for (key, profile) in out.profiles.iter_mut() {
            let prefix = format!("profiles.{}", key);
            self.trim_field(&format!("{}.name", prefix), &mut profile.name, &mut diff);
            self.trim_field(&format!("{}.description", prefix), &mut profile.description, &mut diff);

            for (idx, op) in profile.operations.iter_mut().enumerate() {
                let op_prefix = format!("{}.operations[{}]", prefix, idx);
                self.trim_field(&format!("{}.name", op_prefix), &mut op.name, &mut diff);
                self.trim_field(&format!("{}.description", op_prefix), &mut op.description, &mut diff);

                let kind = match op.settings.as_mut().and_then(|s| s.kind.as_mut()) {
                    Some(kind) => kind,
                    None => continue,
                };
                let settings_prefix = format!("{}.settings", op_prefix);
                match kind {
                    SettingsKind::NixGenerations(nix) => {
                        if self.options.clamp_generations {
                            let clamped = nix.generations.clamp(GENERATIONS_CLAMP_MIN, GENERATIONS_CLAMP_MAX);
                            if clamped != nix.generations {
                                let field = format!("{}.generations", settings_prefix);
                                report.warning(
                                    field.clone(),
                                    format!("generations {} clamped to {}", nix.generations, clamped),
                                    IssueCategory::Business,
                                );
                                diff.record(field, nix.generations, clamped, "clamped to supported range");
                                nix.generations = clamped;
                            }
                        }
                    }
                    SettingsKind::TempFiles(temp) => {
                        self.normalize_duration(&format!("{}.older_than", settings_prefix), &mut temp.older_than, &mut diff, report);
                        temp.excludes = self.sanitize_paths(
                            &format!("{}.excludes", settings_prefix),
                            &temp.excludes,
                            home.as_deref(),
                            &mut diff,
                            report,
                        );
                    }
                    SettingsKind::Homebrew(brew) => {
                        self.normalize_duration(&format!("{}.prune", settings_prefix), &mut brew.prune, &mut diff, report);
                    }
                    SettingsKind::SystemTemp(sys) => {
                        self.normalize_duration(&format!("{}.older_than", settings_prefix), &mut sys.older_than, &mut diff, report);
                        sys.paths = self.sanitize_paths(
                            &format!("{}.paths", settings_prefix),
                            &sys.paths,
                            home.as_deref(),
                            &mut diff,
                            report,
                        );
                        sys.excludes = self.sanitize_paths(
                            &format!("{}.excludes", settings_prefix),
                            &sys.excludes,
                            home.as_deref(),
                            &mut diff,
                            report,
                        );
                    }
                }
            }
        }

        (out, diff)
    }

    fn trim_field(&self, field: &str, value: &mut String, diff: &mut SanitizedDiff) {
        if !self.options.trim_whitespace {
            return;
        }
        let trimmed = value.trim();
        if trimmed.len() != value.len() {
            let trimmed = trimmed.to_string();
            diff.record(field.to_string(), value.as_str(), &trimmed, "trimmed whitespace");
            *value = trimmed;
        }
    }

    fn normalize_duration(&self, field: &str, value: &mut String, diff: &mut SanitizedDiff, report: &mut Report) {
        if !self.options.normalize_durations {
            return;
        }
        match canonical_duration(value) {
            Ok(canonical) if canonical != *value => {
                diff.record(field.to_string(), value.as_str(), &canonical, "canonical duration");
                *value = canonical;
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("leaving invalid duration at {}: {}", field, err.details);
                report.warning(field.to_string(), err.details, IssueCategory::Schema);
            }
        }
    }

    fn sanitize_paths(
        &self,
        field: &str,
        paths: &[String],
        home: Option<&Path>,
        diff: &mut SanitizedDiff,
        report: &mut Report,
    ) -> Vec<String> {
        let mut normalized = Vec::with_capacity(paths.len());
        for raw in paths {
            let mut candidate = if self.options.trim_whitespace {
                raw.trim().to_string()
            } else {
                raw.clone()
            };
            if self.options.expand_home {
                if let Some(home) = home {
                    candidate = expand_home(&candidate, home);
                }
            }
            let cleaned = if candidate.is_empty() {
                String::new()
            } else {
                clean_path(&candidate)
            };
            if cleaned.is_empty() || cleaned == "." {
                continue;
            }
            if !cleaned.starts_with('/') {
                log::warn!("dropping non-absolute path at {}", field);
                report.warning(
                    field.to_string(),
                    format!("dropped '{}': does not normalize to an absolute path", raw.trim()),
                    IssueCategory::Schema,
                );
                continue;
            }
            if self.options.validate_existence && !Path::new(&cleaned).exists() {
                report.warning(
                    field.to_string(),
                    format!("'{}' does not exist", cleaned),
                    IssueCategory::Business,
                );
            }
            normalized.push(cleaned);
        }

        if normalized.as_slice() != paths {
            diff.record(field.to_string(), paths, &normalized, "normalized paths");
        }

        if self.options.dedupe_paths {
            let mut deduped = normalized.clone();
            deduped.sort();
            deduped.dedup();
            if deduped != normalized {
                diff.record(field.to_string(), &normalized, &deduped, "removed duplicates and sorted");
                normalized = deduped;
            }
        }
        normalized
    }
}
