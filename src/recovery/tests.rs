use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::domain::CleanStrategy;
use crate::error::ErrorKind;
use crate::ops::{ManualClock, OperationIdGenerator};

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()))
}

fn ok_result() -> CleanResult {
    CleanResult::new(CleanStrategy::Conservative, Utc::now()).with_freed(2048, 2)
}

fn counting_rollback(counter: Arc<AtomicUsize>) -> RollbackFn {
    rollback_fn(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(CleanResult::new(CleanStrategy::Conservative, Utc::now()))
        }
    })
}

#[test]
fn lifecycle_start_complete() {
    let clock = clock();
    let manager = RollbackManager::with_clock(10, clock.clone());
    let ids = OperationIdGenerator::new();
    let id = ids.next_id();

    manager.record(id, "temp-files", None, BTreeMap::new(), true);
    assert_eq!(manager.state(id), Some(OperationState::Pending));

    manager.start(id).unwrap();
    clock.advance(Duration::from_secs(3));
    manager.complete(id, ok_result()).unwrap();

    let snap = manager.get(id).unwrap();
    assert_eq!(snap.state, OperationState::Completed);
    assert_eq!(snap.duration, Some(Duration::from_secs(3)));
    assert!(matches!(snap.outcome, Some(Ok(_))));
}

#[test]
fn invalid_transitions_are_rejected() {
    let manager = RollbackManager::new(10);
    let id = OperationIdGenerator::new().next_id();
    manager.record(id, "homebrew", None, BTreeMap::new(), true);

    let err = manager.complete(id, ok_result()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidState);

    manager.start(id).unwrap();
    assert_eq!(manager.start(id).unwrap_err().kind, ErrorKind::InvalidState);
    manager.fail(id, CleanError::execution("boom")).unwrap();
    assert_eq!(manager.complete(id, ok_result()).unwrap_err().kind, ErrorKind::InvalidState);
}

#[test]
fn unknown_ids_are_not_found() {
    let manager = RollbackManager::new(10);
    let id = OperationIdGenerator::new().next_id();
    assert_eq!(manager.start(id).unwrap_err().kind, ErrorKind::NotFound);
    assert!(manager.get(id).is_none());
}

#[test]
fn duplicate_record_keeps_original() {
    let manager = RollbackManager::new(10);
    let id = OperationIdGenerator::new().next_id();
    manager.record(id, "first", None, BTreeMap::new(), true);
    manager.start(id).unwrap();
    manager.record(id, "second", None, BTreeMap::new(), false);
    let snap = manager.get(id).unwrap();
    assert_eq!(snap.name, "first");
    assert_eq!(snap.state, OperationState::Running);
    assert_eq!(manager.len(), 1);
}

#[test]
fn history_evicts_oldest_first() {
    let clock = clock();
    let manager = RollbackManager::with_clock(3, clock.clone());
    let gen = OperationIdGenerator::new();
    let ids: Vec<_> = (0..5).map(|_| gen.next_id()).collect();
    for id in &ids {
        manager.record(*id, "temp-files", None, BTreeMap::new(), true);
        clock.advance(Duration::from_secs(1));
    }
    assert_eq!(manager.len(), 3);
    assert_eq!(manager.ids(), ids[2..].to_vec());
    assert_eq!(manager.statistics().pending, 3);
}

#[tokio::test]
async fn rollback_moves_failed_to_rolled_back() {
    let manager = RollbackManager::new(10);
    let counter = Arc::new(AtomicUsize::new(0));
    let id = OperationIdGenerator::new().next_id();
    manager.record(id, "nix-generations", Some(counting_rollback(counter.clone())), BTreeMap::new(), true);
    manager.start(id).unwrap();
    manager.fail(id, CleanError::execution("nix-env failed")).unwrap();

    manager.rollback(&CancellationToken::new(), id).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(manager.state(id), Some(OperationState::RolledBack));

    let err = manager.rollback(&CancellationToken::new(), id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidState);
}

#[tokio::test]
async fn rollback_without_closure_is_an_operation_error() {
    let manager = RollbackManager::new(10);
    let id = OperationIdGenerator::new().next_id();
    manager.record(id, "temp-files", None, BTreeMap::new(), true);
    manager.start(id).unwrap();
    manager.fail(id, CleanError::execution("x")).unwrap();

    let err = manager.rollback(&CancellationToken::new(), id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Operation);
    assert_eq!(manager.state(id), Some(OperationState::Failed));
}

#[tokio::test]
async fn failing_rollback_returns_to_failed() {
    let manager = RollbackManager::new(10);
    let id = OperationIdGenerator::new().next_id();
    let broken = rollback_fn(|| async { Err(CleanError::new(ErrorKind::Recovery, "cannot restore")) });
    manager.record(id, "homebrew", Some(broken), BTreeMap::new(), true);
    manager.start(id).unwrap();
    manager.fail(id, CleanError::execution("x")).unwrap();

    let err = manager.rollback(&CancellationToken::new(), id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Recovery);
    let snap = manager.get(id).unwrap();
    assert_eq!(snap.state, OperationState::Failed);
    assert_eq!(snap.error().map(|e| e.kind), Some(ErrorKind::Recovery));
}

#[tokio::test]
async fn retry_resets_and_reruns() {
    let manager = RollbackManager::new(10);
    let id = OperationIdGenerator::new().next_id();
    manager.record(id, "temp-files", None, BTreeMap::new(), true);
    manager.start(id).unwrap();
    manager.fail(id, CleanError::timeout("slow")).unwrap();

    let result = manager
        .retry(&CancellationToken::new(), id, || async { Ok(ok_result()) })
        .await
        .unwrap();
    assert_eq!(result.freed_bytes, 2048);
    assert_eq!(manager.state(id), Some(OperationState::Completed));
    assert_eq!(manager.retry_count(id), Some(1));
}

#[tokio::test]
async fn retry_refuses_non_retryable_records() {
    let manager = RollbackManager::new(10);
    let id = OperationIdGenerator::new().next_id();
    manager.record(id, "system-temp", None, BTreeMap::new(), false);
    manager.start(id).unwrap();
    manager.fail(id, CleanError::timeout("slow")).unwrap();

    let err = manager
        .retry(&CancellationToken::new(), id, || async { Ok(ok_result()) })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Operation);
    assert_eq!(manager.retry_count(id), Some(0));
}

#[tokio::test]
async fn cancelled_retry_records_failure() {
    let manager = RollbackManager::new(10);
    let id = OperationIdGenerator::new().next_id();
    manager.record(id, "temp-files", None, BTreeMap::new(), true);
    manager.start(id).unwrap();
    manager.fail(id, CleanError::timeout("slow")).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = manager
        .retry(&cancel, id, || async { Ok(ok_result()) })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(manager.state(id), Some(OperationState::Failed));
}

#[tokio::test]
async fn rollback_all_covers_every_failed_record() {
    let manager = RollbackManager::new(10);
    let gen = OperationIdGenerator::new();
    let counter = Arc::new(AtomicUsize::new(0));

    let done = gen.next_id();
    manager.record(done, "temp-files", Some(counting_rollback(counter.clone())), BTreeMap::new(), true);
    manager.start(done).unwrap();
    manager.complete(done, ok_result()).unwrap();

    let with_rb = gen.next_id();
    manager.record(with_rb, "nix-generations", Some(counting_rollback(counter.clone())), BTreeMap::new(), true);
    manager.start(with_rb).unwrap();
    manager.fail(with_rb, CleanError::execution("x")).unwrap();

    let without_rb = gen.next_id();
    manager.record(without_rb, "homebrew", None, BTreeMap::new(), true);
    manager.start(without_rb).unwrap();
    manager.fail(without_rb, CleanError::execution("y")).unwrap();

    let outcomes = manager.rollback_all(&CancellationToken::new()).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[&with_rb].is_ok());
    assert_eq!(outcomes[&without_rb].as_ref().unwrap_err().kind, ErrorKind::Operation);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(manager.state(done), Some(OperationState::Completed));
    assert_eq!(manager.state(with_rb), Some(OperationState::RolledBack));
}

#[test]
fn cleanup_removes_only_old_finished_records() {
    let clock = clock();
    let manager = RollbackManager::with_clock(10, clock.clone());
    let gen = OperationIdGenerator::new();

    let old_done = gen.next_id();
    manager.record(old_done, "temp-files", None, BTreeMap::new(), true);
    manager.start(old_done).unwrap();
    manager.complete(old_done, ok_result()).unwrap();

    let old_pending = gen.next_id();
    manager.record(old_pending, "homebrew", None, BTreeMap::new(), true);

    clock.advance(Duration::from_secs(7200));
    let fresh = gen.next_id();
    manager.record(fresh, "temp-files", None, BTreeMap::new(), true);
    manager.start(fresh).unwrap();
    manager.fail(fresh, CleanError::execution("x")).unwrap();

    assert_eq!(manager.cleanup(Duration::from_secs(3600)), 1);
    assert!(manager.get(old_done).is_none());
    assert!(manager.get(old_pending).is_some());
    assert!(manager.get(fresh).is_some());
}

#[test]
fn statistics_sum_to_len() {
    let manager = RollbackManager::new(10);
    let gen = OperationIdGenerator::new();
    for i in 0..4 {
        let id = gen.next_id();
        manager.record(id, "temp-files", None, BTreeMap::new(), true);
        if i > 0 {
            manager.start(id).unwrap();
        }
        if i > 1 {
            manager.complete(id, ok_result()).unwrap();
        }
    }
    let stats = manager.statistics();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.running, 1);
    assert_eq!(stats.completed, 2);
    assert_eq!(
        stats.pending + stats.running + stats.completed + stats.failed + stats.rollback + stats.rolled_back,
        manager.len()
    );
}
