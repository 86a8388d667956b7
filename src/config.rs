// src/config.rs

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CleanError, Result};

pub const HARD_MAX_PATH_LENGTH: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    None,
    Basic,
    Comprehensive,
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub level: ValidationLevel,          // Default: comprehensive
    pub enable_sanitization: bool,       // Default: true
    pub enable_cache: bool,              // Default: true
    pub cache_ttl_secs: u64,             // Default: 300 seconds
    pub cache_capacity: usize,           // Default: 64 configurations
    pub required_protected_paths: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            level: ValidationLevel::Comprehensive,
            enable_sanitization: true,
            enable_cache: true,
            cache_ttl_secs: 300,
            cache_capacity: 64,
            required_protected_paths: vec!["/System".into(), "/Library".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,              // Default: num_cpus::get() * 4 (I/O bound)
    pub buffer_factor: usize,        // Default: 2
    pub shutdown_timeout_secs: u64,  // Default: 30 seconds
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            workers: num_cpus::get().max(1) * 4,
            buffer_factor: 2,
            shutdown_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub rps: f64,    // Default: 10 backend calls per second
    pub burst: u32,  // Default: 5
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig { rps: 10.0, burst: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,        // Default: 3
    pub initial_delay_ms: u64,   // Default: 100ms
    pub max_delay_ms: u64,       // Default: 5s
    pub backoff_factor: f64,     // Default: 2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_history: usize,            // Default: 1000 records
    pub cleanup_older_than_secs: u64,  // Default: 24 hours
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            max_history: 1000,
            cleanup_older_than_secs: 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub max_path_length: usize,        // Default: 4096
    pub strict_path_checking: bool,    // Default: true
    pub blocked_patterns: Vec<String>, // regexes matched against whole paths
    pub allowed_extensions: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            max_path_length: 4096,
            strict_path_checking: true,
            blocked_patterns: vec![r"\x00".into(), r"(^|/)\.ssh(/|$)".into(), r"(^|/)\.gnupg(/|$)".into()],
            allowed_extensions: Vec::new(),
        }
    }
}

/// Everything that governs engine behavior, grouped by subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub validation: ValidationConfig,
    pub pool: PoolConfig,
    pub rate: RateLimitConfig,
    pub retry: RetryConfig,
    pub history: HistoryConfig,
    pub security: SecurityConfig,
    pub default_timeout_secs: u64, // Default: 300 seconds
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            validation: ValidationConfig::default(),
            pool: PoolConfig::default(),
            rate: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            history: HistoryConfig::default(),
            security: SecurityConfig::default(),
            default_timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_timeout(&self) -> Duration {
        match self.default_timeout_secs {
            0 => Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.workers == 0 {
            return Err(CleanError::config("pool.workers must be at least 1"));
        }
        if self.pool.buffer_factor == 0 {
            return Err(CleanError::config("pool.buffer_factor must be at least 1"));
        }
        if self.rate.rps.is_nan() || self.rate.rps < 0.0 {
            return Err(CleanError::config("rate.rps must be a non-negative number"));
        }
        if self.rate.burst == 0 {
            return Err(CleanError::config("rate.burst must be at least 1"));
        }
        if self.retry.backoff_factor.is_nan() || self.retry.backoff_factor < 1.0 {
            return Err(CleanError::config("retry.backoff_factor must be >= 1.0"));
        }
        if self.security.max_path_length == 0
            || self.security.max_path_length > HARD_MAX_PATH_LENGTH
        {
            return Err(CleanError::config(format!(
                "security.max_path_length must be within 1..={}",
                HARD_MAX_PATH_LENGTH
            )));
        }
        for pattern in &self.security.blocked_patterns {
            Regex::new(pattern)?;
        }
        Ok(())
    }
}

// Global configuration
lazy_static! {
    pub static ref DEFAULT_ENGINE_CONFIG: EngineConfig = EngineConfig::default();
}
