use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CleanError;

/// Wire form accepted for every closed enumeration: a token or its ordinal.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EnumToken {
    Ordinal(u64),
    Text(String),
}

// Closed enums serialize as lowercase tokens and parse case-insensitively,
// accepting '-' for '_' and a bare ordinal as well.
macro_rules! token_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $token:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "EnumToken", into = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $token),+
                }
            }

            pub fn ordinal(&self) -> u64 {
                *self as u64
            }

            pub fn from_ordinal(ordinal: u64) -> Option<Self> {
                usize::try_from(ordinal)
                    .ok()
                    .and_then(|idx| Self::ALL.get(idx).copied())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CleanError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let token = raw.trim();
                if let Ok(ordinal) = token.parse::<u64>() {
                    return Self::from_ordinal(ordinal).ok_or_else(|| {
                        CleanError::invalid_input(format!(
                            "{} ordinal {} out of range",
                            stringify!($name),
                            ordinal
                        ))
                    });
                }
                let normalized = token.replace('-', "_");
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(&normalized))
                    .ok_or_else(|| {
                        CleanError::invalid_input(format!(
                            "unknown {} '{}'",
                            stringify!($name),
                            raw
                        ))
                    })
            }
        }

        impl TryFrom<EnumToken> for $name {
            type Error = CleanError;

            fn try_from(token: EnumToken) -> Result<Self, Self::Error> {
                match token {
                    EnumToken::Text(text) => text.parse(),
                    EnumToken::Ordinal(n) => Self::from_ordinal(n).ok_or_else(|| {
                        CleanError::invalid_input(format!(
                            "{} ordinal {} out of range",
                            stringify!($name),
                            n
                        ))
                    }),
                }
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.as_str().to_string()
            }
        }
    };
}

token_enum! {
    /// Ordered: `Low < Medium < High < Critical`.
    RiskLevel {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

token_enum! {
    Status {
        Disabled => "disabled",
        Enabled => "enabled",
        Inherited => "inherited",
    }
}

token_enum! {
    /// Ordered: `Disabled < Enabled < Strict < Paranoid`.
    SafetyLevel {
        Disabled => "disabled",
        Enabled => "enabled",
        Strict => "strict",
        Paranoid => "paranoid",
    }
}

token_enum! {
    ExecutionMode {
        DryRun => "dry_run",
        Simulate => "simulate",
        Execute => "execute",
        Force => "force",
    }
}

token_enum! {
    CleanStrategy {
        Aggressive => "aggressive",
        Conservative => "conservative",
        DryRun => "dry_run",
    }
}

token_enum! {
    OptimizationLevel {
        None => "none",
        Conservative => "conservative",
        Aggressive => "aggressive",
    }
}

token_enum! {
    FileSelection {
        All => "all",
        UnusedOnly => "unused_only",
        Manual => "manual",
    }
}

token_enum! {
    /// Lifecycle of a recorded operation.
    OperationState {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Rollback => "rollback",
        RolledBack => "rolled_back",
    }
}

token_enum! {
    AggregateState {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Partial => "partial",
        Failed => "failed",
    }
}

impl SafetyLevel {
    /// Highest per-operation risk a configuration at this level admits.
    pub fn risk_ceiling(&self) -> RiskLevel {
        match self {
            SafetyLevel::Disabled => RiskLevel::Critical,
            SafetyLevel::Enabled => RiskLevel::High,
            SafetyLevel::Strict => RiskLevel::Medium,
            SafetyLevel::Paranoid => RiskLevel::Low,
        }
    }
}

impl ExecutionMode {
    /// Modes in which backends must not mutate anything.
    pub fn is_dry(&self) -> bool {
        matches!(self, ExecutionMode::DryRun | ExecutionMode::Simulate)
    }

    /// Modes that must pass the confirmation gate before deleting.
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, ExecutionMode::Execute)
    }
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed | OperationState::RolledBack
        )
    }

    pub fn can_transition_to(&self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Failed, Rollback)
                | (Rollback, RolledBack)
                | (Rollback, Failed)
                | (Failed, Pending)
        )
    }
}

impl AggregateState {
    /// `Completed` iff nothing failed, `Failed` iff nothing succeeded.
    pub fn from_counts(completed: usize, failed: usize) -> Self {
        if failed == 0 {
            AggregateState::Completed
        } else if completed == 0 {
            AggregateState::Failed
        } else {
            AggregateState::Partial
        }
    }
}
