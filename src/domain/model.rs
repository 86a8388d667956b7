use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::enums::{RiskLevel, SafetyLevel, Status};
use super::settings::OperationSettings;
use super::values::{MaxDiskUsagePercent, ProfileName};
use crate::error::{CleanError, Result};

/// A single cleanup task bound to a backend by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub description: String,
    pub risk_level: RiskLevel,
    pub status: Status,
    #[serde(default)]
    pub settings: Option<OperationSettings>,
}

impl Operation {
    pub fn new(name: impl Into<String>, description: impl Into<String>, risk_level: RiskLevel) -> Self {
        Operation {
            name: name.into(),
            description: description.into(),
            risk_level,
            status: Status::Enabled,
            settings: None,
        }
    }

    pub fn with_settings(mut self, settings: OperationSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.status != Status::Disabled
    }

    /// Inherited operations take the profile's risk when it declares one.
    pub fn effective_risk(&self, profile: &Profile) -> RiskLevel {
        match (self.status, profile.risk_level) {
            (Status::Inherited, Some(inherited)) => inherited,
            _ => self.risk_level,
        }
    }

    /// Whether the settings payload (if any) belongs to this operation.
    pub fn settings_match_name(&self) -> bool {
        self.settings
            .as_ref()
            .and_then(|s| s.kind.as_ref())
            .map(|kind| kind.operation_name() == self.name)
            .unwrap_or(true)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CleanError::invalid_input("operation name must not be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(CleanError::invalid_input(format!(
                "operation '{}' needs a description",
                self.name
            )));
        }
        if !self.settings_match_name() {
            return Err(CleanError::invalid_input(format!(
                "settings for operation '{}' carry a mismatched variant",
                self.name
            )));
        }
        if let Some(settings) = &self.settings {
            settings.validate().map_err(|err| {
                CleanError::invalid_input(format!("operation '{}': {}", self.name, err.details))
                    .with_cause(err)
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub description: String,
    pub status: Status,
    /// Risk handed to operations whose status is `Inherited`.
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    pub operations: Vec<Operation>,
}

impl Profile {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Profile {
            name: name.into(),
            description: description.into(),
            status: Status::Enabled,
            risk_level: None,
            operations: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Operations that take part in execution; none when the profile is disabled.
    pub fn active_operations(&self) -> impl Iterator<Item = &Operation> {
        let enabled = self.status != Status::Disabled;
        self.operations
            .iter()
            .filter(move |op| enabled && op.is_enabled())
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CleanError::invalid_input("profile name must not be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(CleanError::invalid_input(format!(
                "profile '{}' needs a description",
                self.name
            )));
        }
        if self.operations.is_empty() {
            return Err(CleanError::invalid_input(format!(
                "profile '{}' must declare at least one operation",
                self.name
            )));
        }
        for operation in &self.operations {
            operation.validate()?;
        }
        Ok(())
    }
}

/// Caller-owned configuration; the engine only borrows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawConfiguration")]
pub struct Configuration {
    pub version: String,
    pub safety_level: SafetyLevel,
    pub max_disk_usage_percent: MaxDiskUsagePercent,
    pub protected_paths: Vec<String>,
    pub profiles: BTreeMap<ProfileName, Profile>,
    pub current_profile: String,
    pub last_clean_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Configuration {
    pub fn new(version: impl Into<String>, safety_level: SafetyLevel) -> Self {
        Configuration {
            version: version.into(),
            safety_level,
            max_disk_usage_percent: MaxDiskUsagePercent::DEFAULT,
            protected_paths: Vec::new(),
            profiles: BTreeMap::new(),
            current_profile: String::new(),
            last_clean_at: None,
            updated_at: None,
        }
    }

    pub fn with_protected_path(mut self, path: impl Into<String>) -> Self {
        self.protected_paths.push(path.into());
        self
    }

    /// Inserts a profile keyed by its own name; the first one becomes current.
    pub fn with_profile(mut self, profile: Profile) -> Result<Self> {
        let key = ProfileName::new(profile.name.clone())?;
        if self.current_profile.is_empty() {
            self.current_profile = key.as_str().to_string();
        }
        self.profiles.insert(key, profile);
        Ok(self)
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// Stable identity used by the validation cache.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&encoded);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(CleanError::invalid_input("version must not be empty"));
        }
        if self.protected_paths.is_empty() {
            return Err(CleanError::invalid_input("at least one protected path is required"));
        }
        for path in &self.protected_paths {
            if !path.starts_with('/') {
                return Err(CleanError::invalid_input(format!(
                    "protected path '{}' must be absolute",
                    path
                )));
            }
            if path.split('/').any(|segment| segment == "..") {
                return Err(CleanError::invalid_input(format!(
                    "protected path '{}' must not contain '..'",
                    path
                )));
            }
        }
        if self.profiles.is_empty() {
            return Err(CleanError::invalid_input("at least one profile is required"));
        }
        if !self.profiles.contains_key(self.current_profile.as_str()) {
            return Err(CleanError::not_found(format!(
                "current profile '{}' is not defined",
                self.current_profile
            )));
        }
        for profile in self.profiles.values() {
            profile.validate()?;
        }
        Ok(())
    }
}

// Parsing boundary: `safe_mode: bool` predates `safety_level`.
#[derive(Deserialize)]
struct RawConfiguration {
    version: String,
    #[serde(default)]
    safety_level: Option<SafetyLevel>,
    #[serde(default)]
    safe_mode: Option<bool>,
    #[serde(default)]
    max_disk_usage_percent: u32,
    #[serde(default)]
    protected_paths: Vec<String>,
    #[serde(default)]
    profiles: BTreeMap<ProfileName, Profile>,
    #[serde(default)]
    current_profile: String,
    #[serde(default)]
    last_clean_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<RawConfiguration> for Configuration {
    type Error = CleanError;

    fn try_from(raw: RawConfiguration) -> Result<Self> {
        let safety_level = match (raw.safety_level, raw.safe_mode) {
            (Some(level), _) => level,
            (None, Some(true)) => SafetyLevel::Enabled,
            (None, Some(false)) => SafetyLevel::Disabled,
            (None, None) => {
                return Err(CleanError::invalid_input(
                    "configuration needs safety_level (or legacy safe_mode)",
                ))
            }
        };
        Ok(Configuration {
            version: raw.version,
            safety_level,
            max_disk_usage_percent: MaxDiskUsagePercent::new(raw.max_disk_usage_percent)?,
            protected_paths: raw.protected_paths,
            profiles: raw.profiles,
            current_profile: raw.current_profile,
            last_clean_at: raw.last_clean_at,
            updated_at: raw.updated_at,
        })
    }
}
