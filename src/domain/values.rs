use std::fmt;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CleanError, Result};

pub const PROFILE_NAME_MAX_LEN: usize = 50;

lazy_static! {
    static ref PROFILE_NAME_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
    static ref DURATION_GROUP: Regex = Regex::new(r"(\d+)(ms|s|m|h|d|w)").unwrap();
}

/// Validated profile identifier, usable as a map key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProfileName(String);

impl ProfileName {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(CleanError::invalid_input("profile name must not be empty"));
        }
        if raw.chars().count() > PROFILE_NAME_MAX_LEN {
            return Err(CleanError::invalid_input(format!(
                "profile name '{}' exceeds {} characters",
                raw, PROFILE_NAME_MAX_LEN
            )));
        }
        if !PROFILE_NAME_PATTERN.is_match(&raw) {
            return Err(CleanError::invalid_input(format!(
                "profile name '{}' may only contain letters, digits, '_' and '-'",
                raw
            )));
        }
        Ok(ProfileName(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProfileName {
    type Error = CleanError;

    fn try_from(raw: String) -> Result<Self> {
        ProfileName::new(raw)
    }
}

impl From<ProfileName> for String {
    fn from(name: ProfileName) -> String {
        name.0
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for ProfileName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Number of Nix generations to keep, `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenerationCount(u32);

impl GenerationCount {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 100;

    pub fn new(value: u32) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(GenerationCount(value))
        } else {
            Err(CleanError::invalid_input(format!(
                "generation count {} outside {}..={}",
                value,
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

/// Disk-usage threshold, `0..=100`. The policy band is narrower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct MaxDiskUsagePercent(u32);

impl MaxDiskUsagePercent {
    pub const POLICY_MIN: u32 = 10;
    pub const POLICY_MAX: u32 = 95;
    pub const DEFAULT: MaxDiskUsagePercent = MaxDiskUsagePercent(50);

    pub fn new(value: u32) -> Result<Self> {
        if value <= 100 {
            Ok(MaxDiskUsagePercent(value))
        } else {
            Err(CleanError::invalid_input(format!(
                "max disk usage {}% outside 0..=100",
                value
            )))
        }
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn within_policy(&self) -> bool {
        (Self::POLICY_MIN..=Self::POLICY_MAX).contains(&self.0)
    }
}

impl TryFrom<u32> for MaxDiskUsagePercent {
    type Error = CleanError;

    fn try_from(value: u32) -> Result<Self> {
        MaxDiskUsagePercent::new(value)
    }
}

impl From<MaxDiskUsagePercent> for u32 {
    fn from(usage: MaxDiskUsagePercent) -> u32 {
        usage.0
    }
}

impl fmt::Display for MaxDiskUsagePercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

const MILLIS_PER_UNIT: &[(&str, u64)] = &[
    ("w", 7 * 24 * 3_600_000),
    ("d", 24 * 3_600_000),
    ("h", 3_600_000),
    ("m", 60_000),
    ("s", 1_000),
    ("ms", 1),
];

fn unit_millis(unit: &str) -> Option<u64> {
    MILLIS_PER_UNIT
        .iter()
        .find(|(u, _)| *u == unit)
        .map(|(_, ms)| *ms)
}

/// Parses `<n><unit>` groups (`ms`, `s`, `m`, `h`, `d`, `w`), e.g. `7d` or `1h30m`.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(CleanError::invalid_input("duration must not be empty"));
    }

    let mut total: u64 = 0;
    let mut consumed = 0usize;
    for caps in DURATION_GROUP.captures_iter(text) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        if whole.start != consumed {
            break;
        }
        consumed = whole.end;
        let amount: u64 = caps[1]
            .parse()
            .map_err(|_| CleanError::invalid_input(format!("duration '{}' overflows", raw)))?;
        let per_unit = unit_millis(&caps[2]).unwrap_or(0);
        total = amount
            .checked_mul(per_unit)
            .and_then(|ms| total.checked_add(ms))
            .ok_or_else(|| CleanError::invalid_input(format!("duration '{}' overflows", raw)))?;
    }

    if consumed != text.len() {
        return Err(CleanError::invalid_input(format!(
            "invalid duration '{}': expected forms like 30s, 7d or 1h30m",
            raw
        )));
    }
    Ok(Duration::from_millis(total))
}

/// Renders a duration in the largest unit that divides it exactly.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis().min(u64::MAX as u128) as u64;
    if millis == 0 {
        return "0s".to_string();
    }
    // weeks are accepted on input but days read better
    for (unit, per_unit) in MILLIS_PER_UNIT.iter().skip(1) {
        if millis % per_unit == 0 {
            return format!("{}{}", millis / per_unit, unit);
        }
    }
    format!("{}ms", millis)
}

pub fn canonical_duration(raw: &str) -> Result<String> {
    parse_duration(raw).map(format_duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_names_follow_the_pattern() {
        assert!(ProfileName::new("quick").is_ok());
        assert!(ProfileName::new("deep_clean-2").is_ok());
        assert!(ProfileName::new("").is_err());
        assert!(ProfileName::new("has space").is_err());
        assert!(ProfileName::new("a".repeat(51)).is_err());
        assert!(ProfileName::new("a".repeat(50)).is_ok());
    }

    #[test]
    fn generation_count_range() {
        assert!(GenerationCount::new(0).is_err());
        assert_eq!(GenerationCount::new(3).map(|g| g.get()).ok(), Some(3));
        assert!(GenerationCount::new(100).is_ok());
        assert!(GenerationCount::new(101).is_err());
    }

    #[test]
    fn disk_usage_policy_band() {
        assert!(MaxDiskUsagePercent::new(101).is_err());
        assert!(!MaxDiskUsagePercent::new(5).unwrap().within_policy());
        assert!(MaxDiskUsagePercent::new(50).unwrap().within_policy());
        assert!(!MaxDiskUsagePercent::new(96).unwrap().within_policy());
    }

    #[test]
    fn durations_parse_and_canonicalize() {
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(7 * 86_400));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_duration(" 500ms ").unwrap(), Duration::from_millis(500));
        assert!(parse_duration("7 days").is_err());
        assert!(parse_duration("d7").is_err());
        assert!(parse_duration("").is_err());

        assert_eq!(canonical_duration("168h").unwrap(), "7d");
        assert_eq!(canonical_duration("1h30m").unwrap(), "90m");
        assert_eq!(canonical_duration("2w").unwrap(), "14d");
        assert_eq!(canonical_duration("0s").unwrap(), "0s");
        let once = canonical_duration("1500ms").unwrap();
        assert_eq!(canonical_duration(&once).unwrap(), once);
    }
}
