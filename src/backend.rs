// src/backend.rs

mod registry;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{CleanResult, OperationSettings};
use crate::error::Result;
use crate::recovery::RollbackFn;

pub use registry::{BackendRegistry, RegistryBuilder};

/// One pluggable cleaner. Instances are shared across a run and may be
/// called concurrently, so implementations handle their own locking.
#[async_trait]
pub trait CleanerBackend: Send + Sync {
    /// Registry key, matching the operation name it serves.
    fn name(&self) -> &str;

    async fn is_available(&self, cancel: &CancellationToken) -> bool;

    /// Bytes a cleanup would free right now; 0 when unknown.
    async fn estimated_size(&self, cancel: &CancellationToken) -> u64;

    /// Checks operation settings before anything is dispatched.
    fn validate(&self, settings: Option<&OperationSettings>) -> Result<()>;

    /// Performs the cleanup. `settings.execution_mode` is always set by the
    /// engine; dry modes must not mutate anything and must report the
    /// `dry_run` strategy.
    async fn cleanup(&self, cancel: &CancellationToken, settings: &OperationSettings) -> Result<CleanResult>;

    /// Whether failures of this backend may be retried.
    fn retryable(&self) -> bool {
        true
    }

    /// Closure able to undo a failed cleanup, captured before dispatch.
    fn rollback(&self, _settings: &OperationSettings) -> Option<RollbackFn> {
        None
    }
}
