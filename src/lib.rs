pub mod backend;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ops;
pub mod pool;
pub mod rate_limit;
pub mod recovery;
pub mod security;
pub mod validation;

pub use backend::{BackendRegistry, CleanerBackend, RegistryBuilder};
pub use config::{EngineConfig, ValidationLevel, DEFAULT_ENGINE_CONFIG};
pub use domain::{
    AggregateState, CleanResult, CleanStrategy, Configuration, ExecutionMode, MaxDiskUsagePercent,
    Operation, OperationSettings, OperationState, Profile, RiskLevel, SafetyLevel, SettingsKind,
    Status,
};
pub use engine::{
    AutoApprove, CleanupEngine, ConcurrentExecutionResult, Confirmation, ConfirmationCallback,
    ConfirmationContext, EngineBuilder, OperationOutcome, ScanEntry, ScanReport,
};
pub use error::{CleanError, ErrorKind, Result, Severity};
pub use ops::{
    Clock, ManualClock, OperationId, OperationIdGenerator, RandomSource, SeededRandom, SystemClock,
    SystemRandom,
};
pub use pool::{optimal_worker_count, PoolStats, TaskHandle, WorkerPool, WorkloadKind};
pub use rate_limit::RateLimiter;
pub use recovery::{rollback_fn, OperationSnapshot, RecoveryStatistics, RollbackFn, RollbackManager};
pub use security::SecurityValidator;
pub use validation::{ConfigSanitizer, ConfigValidator, SanitizeOptions, SanitizedDiff, ValidationResult};
