use serde::{Deserialize, Serialize};

use super::enums::{ExecutionMode, FileSelection, OptimizationLevel};
use super::values::{parse_duration, GenerationCount};
use crate::error::{CleanError, Result};

pub const OP_NIX_GENERATIONS: &str = "nix-generations";
pub const OP_TEMP_FILES: &str = "temp-files";
pub const OP_HOMEBREW: &str = "homebrew";
pub const OP_SYSTEM_TEMP: &str = "system-temp";
pub const OP_NPM_CACHE: &str = "npm-cache";
pub const OP_PNPM_STORE: &str = "pnpm-store";

/// Every operation name a backend may be registered under.
pub const KNOWN_OPERATIONS: &[&str] = &[
    OP_NIX_GENERATIONS,
    OP_TEMP_FILES,
    OP_HOMEBREW,
    OP_SYSTEM_TEMP,
    OP_NPM_CACHE,
    OP_PNPM_STORE,
];

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NixGenerationsSettings {
    pub generations: u32,
    #[serde(default = "default_optimization")]
    pub optimization: OptimizationLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempFilesSettings {
    pub older_than: String,
    #[serde(default)]
    pub excludes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomebrewSettings {
    pub prune: String,
    #[serde(default = "default_file_selection")]
    pub file_selection: FileSelection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemTempSettings {
    pub paths: Vec<String>,
    pub older_than: String,
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// Backend-specific payload; the tag must agree with the operation name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsKind {
    NixGenerations(NixGenerationsSettings),
    TempFiles(TempFilesSettings),
    Homebrew(HomebrewSettings),
    SystemTemp(SystemTempSettings),
}

impl SettingsKind {
    pub fn operation_name(&self) -> &'static str {
        match self {
            SettingsKind::NixGenerations(_) => OP_NIX_GENERATIONS,
            SettingsKind::TempFiles(_) => OP_TEMP_FILES,
            SettingsKind::Homebrew(_) => OP_HOMEBREW,
            SettingsKind::SystemTemp(_) => OP_SYSTEM_TEMP,
        }
    }

    /// Variant-specific range and format checks.
    pub fn validate(&self) -> Result<()> {
        match self {
            SettingsKind::NixGenerations(s) => {
                GenerationCount::new(s.generations)?;
            }
            SettingsKind::TempFiles(s) => {
                parse_duration(&s.older_than)?;
                require_absolute("excludes", &s.excludes)?;
            }
            SettingsKind::Homebrew(s) => {
                parse_duration(&s.prune)?;
            }
            SettingsKind::SystemTemp(s) => {
                if s.paths.is_empty() {
                    return Err(CleanError::invalid_input("system-temp requires at least one path"));
                }
                parse_duration(&s.older_than)?;
                require_absolute("paths", &s.paths)?;
                require_absolute("excludes", &s.excludes)?;
            }
        }
        Ok(())
    }

    /// Every path mentioned anywhere in the payload.
    pub fn all_paths(&self) -> Vec<&str> {
        match self {
            SettingsKind::TempFiles(s) => s.excludes.iter().map(String::as_str).collect(),
            SettingsKind::SystemTemp(s) => s
                .paths
                .iter()
                .chain(s.excludes.iter())
                .map(String::as_str)
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn require_absolute(field: &str, paths: &[String]) -> Result<()> {
    for path in paths {
        if !path.starts_with('/') {
            return Err(CleanError::invalid_input(format!(
                "{} entry '{}' must be an absolute path",
                field, path
            )));
        }
        if path.split('/').any(|segment| segment == "..") {
            return Err(CleanError::invalid_input(format!(
                "{} entry '{}' must not contain '..'",
                field, path
            )));
        }
    }
    Ok(())
}

fn default_optimization() -> OptimizationLevel {
    OptimizationLevel::Conservative
}

fn default_file_selection() -> FileSelection {
    FileSelection::UnusedOnly
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

/// General knobs plus an optional backend payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawOperationSettings")]
pub struct OperationSettings {
    /// `None` follows the run's mode; otherwise the more conservative mode wins.
    pub execution_mode: Option<ExecutionMode>,
    pub verbose: bool,
    pub timeout_seconds: u64,
    pub confirm_before_delete: bool,
    pub kind: Option<SettingsKind>,
}

impl Default for OperationSettings {
    fn default() -> Self {
        OperationSettings {
            execution_mode: None,
            verbose: false,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            confirm_before_delete: false,
            kind: None,
        }
    }
}

impl OperationSettings {
    pub fn with_kind(kind: SettingsKind) -> Self {
        OperationSettings {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_seconds == 0 {
            return Err(CleanError::invalid_input("timeout_seconds must be greater than zero"));
        }
        if let Some(kind) = &self.kind {
            kind.validate()?;
        }
        Ok(())
    }

    /// Mode actually handed to a backend for a run in `run_mode`.
    pub fn effective_mode(&self, run_mode: ExecutionMode) -> ExecutionMode {
        match self.execution_mode {
            Some(own) => own.min(run_mode),
            None => run_mode,
        }
    }

    pub fn all_paths(&self) -> Vec<&str> {
        self.kind.as_ref().map(|k| k.all_paths()).unwrap_or_default()
    }
}

// Parsing boundary: `dry_run: bool` predates `execution_mode`.
#[derive(Deserialize)]
struct RawOperationSettings {
    #[serde(default)]
    execution_mode: Option<ExecutionMode>,
    #[serde(default)]
    dry_run: Option<bool>,
    #[serde(default)]
    verbose: bool,
    #[serde(default = "default_timeout")]
    timeout_seconds: u64,
    #[serde(default)]
    confirm_before_delete: bool,
    #[serde(default)]
    kind: Option<SettingsKind>,
}

impl From<RawOperationSettings> for OperationSettings {
    fn from(raw: RawOperationSettings) -> Self {
        let execution_mode = raw.execution_mode.or(match raw.dry_run {
            Some(true) => Some(ExecutionMode::DryRun),
            Some(false) => Some(ExecutionMode::Execute),
            None => None,
        });
        OperationSettings {
            execution_mode,
            verbose: raw.verbose,
            timeout_seconds: raw.timeout_seconds,
            confirm_before_delete: raw.confirm_before_delete,
            kind: raw.kind,
        }
    }
}
