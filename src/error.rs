// src/error.rs

use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, CleanError>;

/// Closed set of failure kinds shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Unknown,
    Timeout,
    Cancelled,
    Retryable,
    Validation,
    InvalidInput,
    InvalidState,
    NotFound,
    AlreadyExists,
    Conflict,
    Unauthorized,
    Forbidden,
    Denied,
    Config,
    Profile,
    Settings,
    Operation,
    Execution,
    Recovery,
    Security,
    Threat,
    Block,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unknown => "UNKNOWN",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Retryable => "RETRYABLE",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::Denied => "DENIED",
            ErrorKind::Config => "CONFIG",
            ErrorKind::Profile => "PROFILE",
            ErrorKind::Settings => "SETTINGS",
            ErrorKind::Operation => "OPERATION",
            ErrorKind::Execution => "EXECUTION",
            ErrorKind::Recovery => "RECOVERY",
            ErrorKind::Security => "SECURITY",
            ErrorKind::Threat => "THREAT",
            ErrorKind::Block => "BLOCK",
        }
    }

    /// Kinds that are retryable unless a backend says otherwise.
    pub fn retryable_by_default(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Retryable)
    }

    /// Kinds that must never be retried, whatever the error's own flag says.
    pub fn is_never_retried(&self) -> bool {
        matches!(
            self,
            ErrorKind::Cancelled
                | ErrorKind::Denied
                | ErrorKind::Forbidden
                | ErrorKind::InvalidState
                | ErrorKind::NotFound
                | ErrorKind::Validation
        )
    }

    fn default_severity(&self) -> Severity {
        match self {
            ErrorKind::Cancelled => Severity::Warning,
            ErrorKind::Threat | ErrorKind::Block => Severity::Critical,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Typed failure with severity, retryability and a causal chain.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {details}")]
pub struct CleanError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub context: BTreeMap<String, String>,
    pub details: String,
    #[source]
    pub cause: Option<Box<CleanError>>,
    pub timestamp: DateTime<Utc>,
    pub retryable: bool,
    pub stack_trace: Option<String>,
}

impl CleanError {
    pub fn new(kind: ErrorKind, details: impl Into<String>) -> Self {
        CleanError {
            kind,
            severity: kind.default_severity(),
            context: BTreeMap::new(),
            details: details.into(),
            cause: None,
            timestamp: Utc::now(),
            retryable: kind.retryable_by_default(),
            stack_trace: None,
        }
        .capture_trace_if_critical()
    }

    pub fn timeout(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, details)
    }

    pub fn cancelled(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, details)
    }

    pub fn validation(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, details)
    }

    pub fn invalid_input(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, details)
    }

    pub fn invalid_state(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, details)
    }

    pub fn not_found(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, details)
    }

    pub fn forbidden(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, details)
    }

    pub fn denied(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Denied, details)
    }

    pub fn operation(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Operation, details)
    }

    pub fn execution(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, details)
    }

    pub fn security(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Security, details)
    }

    pub fn config(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, details)
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn with_cause(mut self, cause: CleanError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self.capture_trace_if_critical()
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Whether a retry policy may re-attempt the failed work.
    pub fn is_retryable(&self) -> bool {
        self.retryable && !self.kind.is_never_retried()
    }

    /// Walks the causal chain, innermost last.
    pub fn chain(&self) -> impl Iterator<Item = &CleanError> {
        std::iter::successors(Some(self), |e| e.cause.as_deref())
    }

    fn capture_trace_if_critical(mut self) -> Self {
        if self.severity == Severity::Critical && self.stack_trace.is_none() {
            self.stack_trace = Some(Backtrace::force_capture().to_string());
        }
        self
    }
}

impl From<std::io::Error> for CleanError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::Forbidden,
            _ => ErrorKind::Execution,
        };
        CleanError::new(kind, err.to_string())
    }
}

impl From<serde_json::Error> for CleanError {
    fn from(err: serde_json::Error) -> Self {
        CleanError::config(format!("invalid JSON: {}", err))
    }
}

impl From<regex::Error> for CleanError {
    fn from(err: regex::Error) -> Self {
        CleanError::config(format!("invalid pattern: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn timeout_is_retryable_but_validation_is_not() {
        assert!(CleanError::timeout("slow").is_retryable());
        assert!(!CleanError::validation("bad").is_retryable());
        // an explicit flag cannot override the never-retry list
        assert!(!CleanError::cancelled("stop").with_retryable(true).is_retryable());
        assert!(CleanError::operation("flaky").with_retryable(true).is_retryable());
    }

    #[test]
    fn critical_errors_carry_a_stack_trace() {
        let err = CleanError::execution("worker panicked").with_severity(Severity::Critical);
        assert!(err.stack_trace.is_some());
        assert!(CleanError::execution("plain").stack_trace.is_none());
    }

    #[test]
    fn cause_is_exposed_as_source() {
        let inner = CleanError::timeout("backend call");
        let outer = CleanError::operation("cleanup failed")
            .with_cause(inner)
            .with_context("operation", "homebrew");
        assert_eq!(outer.chain().count(), 2);
        let source = outer.source().map(|s| s.to_string()).unwrap_or_default();
        assert_eq!(source, "TIMEOUT: backend call");
        assert_eq!(outer.context.get("operation").map(String::as_str), Some("homebrew"));
    }

    #[test]
    fn io_errors_map_onto_kinds() {
        let err: CleanError = std::io::Error::new(std::io::ErrorKind::TimedOut, "t").into();
        assert_eq!(err.kind, ErrorKind::Timeout);
        let err: CleanError = std::io::Error::new(std::io::ErrorKind::Other, "x").into();
        assert_eq!(err.kind, ErrorKind::Execution);
    }
}
