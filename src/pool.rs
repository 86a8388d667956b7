// src/pool.rs

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::{CleanError, ErrorKind, Result, Severity};

type Job = Box<dyn FnOnce(usize) -> BoxFuture<'static, ()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    CpuBound,
    IoBound,
    Mixed,
}

/// Worker count for a workload given the available parallelism.
pub fn optimal_worker_count(kind: WorkloadKind) -> usize {
    let cores = num_cpus::get().max(1);
    match kind {
        WorkloadKind::CpuBound => cores,
        WorkloadKind::IoBound => cores * 4,
        WorkloadKind::Mixed => cores * 2,
    }
}

/// Snapshot of the pool counters.
///
/// `total_tasks` counts every submission, including the ones in `rejected_tasks`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub workers: usize,
    pub capacity: usize,
    pub total_tasks: u64,
    pub pending_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub rejected_tasks: u64,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    pending: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Result of a submitted task.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").finish_non_exhaustive()
    }
}

impl<T> TaskHandle<T> {
    /// Waits for the task; a task dropped before running reports `CANCELLED`.
    pub async fn join(self) -> Result<T> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(CleanError::cancelled("task dropped before completion")),
        }
    }
}

/// Fixed set of tokio workers pulling from a bounded queue.
///
/// Must be created inside a tokio runtime.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    worker_count: usize,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(workers: usize, buffer_factor: usize) -> Self {
        let worker_count = workers.max(1);
        let capacity = worker_count * buffer_factor.max(1);
        let (tx, rx) = mpsc::channel::<Job>(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let handles = (0..worker_count)
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let cancel = cancel.clone();
                let counters = Arc::clone(&counters);
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => None,
                                job = rx.recv() => job,
                            }
                        };
                        let Some(job) = job else { break };
                        counters.pending.fetch_sub(1, Ordering::SeqCst);
                        job(worker_id).await;
                    }
                    log::debug!("pool worker {} exiting", worker_id);
                })
            })
            .collect();

        log::debug!("worker pool started: {} workers, capacity {}", worker_count, capacity);
        WorkerPool {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            cancel,
            counters,
            worker_count,
            capacity,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.workers, config.buffer_factor)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.worker_count,
            capacity: self.capacity,
            total_tasks: self.counters.total.load(Ordering::SeqCst),
            pending_tasks: self.counters.pending.load(Ordering::SeqCst),
            completed_tasks: self.counters.completed.load(Ordering::SeqCst),
            failed_tasks: self.counters.failed.load(Ordering::SeqCst),
            rejected_tasks: self.counters.rejected.load(Ordering::SeqCst),
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<Job>>> {
        self.sender.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wrap<F, T>(&self, task: F) -> (Job, TaskHandle<T>)
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let counters = Arc::clone(&self.counters);
        let cancel = self.cancel.clone();
        let job: Job = Box::new(move |worker_id| {
            async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(CleanError::cancelled("worker pool stopped")),
                    caught = AssertUnwindSafe(task).catch_unwind() => match caught {
                        Ok(result) => result,
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            log::error!("task panicked on worker {}: {}", worker_id, message);
                            Err(CleanError::new(ErrorKind::Execution, format!("task panicked: {}", message))
                                .with_severity(Severity::Critical)
                                .with_context("worker_id", worker_id))
                        }
                    },
                };
                match &outcome {
                    Ok(_) => counters.completed.fetch_add(1, Ordering::SeqCst),
                    Err(_) => counters.failed.fetch_add(1, Ordering::SeqCst),
                };
                let _ = tx.send(outcome);
            }
            .boxed()
        });
        (job, TaskHandle { rx })
    }

    fn admitted(&self) {
        self.counters.total.fetch_add(1, Ordering::SeqCst);
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn rejected(&self, err: CleanError) -> CleanError {
        self.counters.pending.fetch_sub(1, Ordering::SeqCst);
        self.counters.rejected.fetch_add(1, Ordering::SeqCst);
        err
    }

    /// Enqueues without waiting: `EXECUTION` when full, `CANCELLED` when stopping.
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.admitted();
        if self.cancel.is_cancelled() {
            return Err(self.rejected(CleanError::cancelled("worker pool is shutting down")));
        }
        let (job, handle) = self.wrap(task);
        let guard = self.sender();
        let sender = match guard.as_ref() {
            Some(sender) => sender,
            None => return Err(self.rejected(CleanError::cancelled("worker pool is shutting down"))),
        };
        match sender.try_send(job) {
            Ok(()) => Ok(handle),
            Err(mpsc::error::TrySendError::Full(_)) => Err(self.rejected(CleanError::execution(format!(
                "worker pool buffer is full ({} queued)",
                self.capacity
            )))),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(self.rejected(CleanError::cancelled("worker pool is shutting down")))
            }
        }
    }

    /// Waits up to `timeout` for buffer space, then fails with `TIMEOUT`.
    pub async fn submit_with_timeout<F, T>(&self, task: F, timeout: Duration) -> Result<TaskHandle<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.admitted();
        let sender = match self.sender().clone().filter(|_| !self.cancel.is_cancelled()) {
            Some(sender) => sender,
            None => return Err(self.rejected(CleanError::cancelled("worker pool is shutting down"))),
        };
        let (job, handle) = self.wrap(task);
        let sent = tokio::select! {
            _ = self.cancel.cancelled() => Err(CleanError::cancelled("worker pool is shutting down")),
            sent = tokio::time::timeout(timeout, sender.send(job)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(CleanError::cancelled("worker pool is shutting down")),
                Err(_) => Err(CleanError::timeout(format!(
                    "no worker pool capacity within {:?}",
                    timeout
                ))),
            },
        };
        sent.map(|()| handle).map_err(|err| self.rejected(err))
    }

    fn close(&self) {
        self.sender().take();
    }

    fn take_workers(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()))
    }

    async fn join_workers(&self, timeout: Duration) -> Result<()> {
        let handles = self.take_workers();
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(_) => Ok(()),
            Err(_) => Err(CleanError::timeout(format!(
                "workers did not stop within {:?}",
                timeout
            ))),
        }
    }

    /// Cancels in-flight and queued tasks, then waits for the workers.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        self.cancel.cancel();
        self.close();
        self.join_workers(timeout).await
    }

    /// Closes submission and lets workers drain the queue; cancels on timeout.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.close();
        let drained = self.join_workers(timeout).await;
        if drained.is_err() {
            self.cancel.cancel();
        }
        drained
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn runs_tasks_and_counts() {
        let pool = WorkerPool::new(2, 2);
        let ok = pool.submit(async { Ok(21 * 2) }).unwrap();
        let bad = pool
            .submit(async { Err::<u32, _>(CleanError::execution("nope")) })
            .unwrap();
        assert_eq!(ok.join().await.unwrap(), 42);
        assert_eq!(bad.join().await.unwrap_err().kind, ErrorKind::Execution);

        pool.shutdown(Duration::from_secs(5)).await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.pending_tasks, 0);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.failed_tasks, 1);
        assert_eq!(stats.rejected_tasks, 0);
        assert!(format!("{:?}", pool.submit(async { Ok(()) })).contains("Err"));
    }

    #[tokio::test]
    async fn panics_become_critical_execution_errors() {
        let pool = WorkerPool::new(1, 2);
        let handle = pool
            .submit(async {
                if true {
                    panic!("backend exploded");
                }
                Ok(())
            })
            .unwrap();
        let err = handle.join().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Execution);
        assert_eq!(err.severity, Severity::Critical);
        assert_eq!(err.context.get("worker_id").map(String::as_str), Some("0"));
        assert!(err.details.contains("backend exploded"));

        // the worker survives
        let after = pool.submit(async { Ok("still here") }).unwrap();
        assert_eq!(after.join().await.unwrap(), "still here");
        assert_eq!(pool.stats().failed_tasks, 1);
    }

    #[tokio::test]
    async fn full_buffer_rejects_with_execution() {
        let pool = WorkerPool::new(1, 1);
        let gate = Arc::new(tokio::sync::Notify::new());

        let blocker = {
            let gate = gate.clone();
            pool.submit(async move {
                gate.notified().await;
                Ok(())
            })
            .unwrap()
        };
        // let the worker pick up the blocker
        while pool.stats().pending_tasks > 0 {
            tokio::task::yield_now().await;
        }
        let queued = pool.submit(async { Ok(()) }).unwrap();
        let err = pool.submit(async { Ok(()) }).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Execution);

        let err = pool
            .submit_with_timeout(async { Ok(()) }, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        let stats = pool.stats();
        assert_eq!(stats.total_tasks, 4);
        assert_eq!(stats.rejected_tasks, 2);
        assert_eq!(stats.pending_tasks, 1);

        gate.notify_one();
        blocker.join().await.unwrap();
        queued.join().await.unwrap();
    }

    #[tokio::test]
    async fn stop_cancels_and_refuses_new_work() {
        let pool = WorkerPool::new(2, 2);
        let started = Arc::new(AtomicUsize::new(0));
        let handle = {
            let started = started.clone();
            pool.submit(async move {
                started.fetch_add(1, Ordering::SeqCst);
                futures::future::pending::<()>().await;
                Ok(())
            })
            .unwrap()
        };
        while started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        pool.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(handle.join().await.unwrap_err().kind, ErrorKind::Cancelled);
        assert_eq!(pool.submit(async { Ok(()) }).unwrap_err().kind, ErrorKind::Cancelled);
        let stats = pool.stats();
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.rejected_tasks, 1);
    }

    #[test]
    fn worker_counts_scale_with_workload() {
        let cpu = optimal_worker_count(WorkloadKind::CpuBound);
        assert_eq!(optimal_worker_count(WorkloadKind::Mixed), cpu * 2);
        assert_eq!(optimal_worker_count(WorkloadKind::IoBound), cpu * 4);
    }
}
