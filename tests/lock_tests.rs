//! Advisory lock manager invariants (spec.md §4.1, §8 "Concurrent actions on
//! the same cluster never run simultaneously").

#![cfg(feature = "test-support")]

use std::sync::Arc;

use senlin_core::testing::InMemoryRepository;
use senlin_core::{Action, ActionStatus, LockManager, LockScope, Repository};
use uuid::Uuid;

async fn pending_action(repo: &InMemoryRepository) -> Uuid {
    let action = Action::new(Uuid::new_v4(), "CLUSTER_SCALE_OUT", "test");
    let id = action.id;
    repo.create_action(action).await.unwrap();
    id
}

#[tokio::test]
async fn cluster_scope_is_exclusive() {
    let repo = Arc::new(InMemoryRepository::new());
    let lock = LockManager::new(Arc::clone(&repo));
    let resource = Uuid::new_v4();

    let a = pending_action(&repo).await;
    let b = pending_action(&repo).await;

    lock.acquire(resource, LockScope::Cluster, a, false).await.unwrap();
    let err = lock.acquire(resource, LockScope::Cluster, b, false).await.unwrap_err();
    assert!(err.is_lock_busy());

    lock.release(resource, LockScope::Cluster, a).await.unwrap();
    lock.acquire(resource, LockScope::Cluster, b, false).await.unwrap();
    assert!(lock.is_held(resource, LockScope::Cluster).await);
}

#[tokio::test]
async fn forced_acquire_steals_from_the_current_owner() {
    let repo = Arc::new(InMemoryRepository::new());
    let lock = LockManager::new(Arc::clone(&repo));
    let resource = Uuid::new_v4();

    let a = pending_action(&repo).await;
    let b = pending_action(&repo).await;

    lock.acquire(resource, LockScope::Cluster, a, false).await.unwrap();
    lock.steal(resource, LockScope::Cluster, b).await.unwrap();

    // `a` no longer owns the lock; a plain (non-forced) acquire by `a` must
    // now fail since `b` holds it.
    let err = lock.acquire(resource, LockScope::Cluster, a, false).await.unwrap_err();
    assert!(err.is_lock_busy());
}

#[tokio::test]
async fn orphaned_cluster_lock_is_reclaimed_once_the_owner_action_is_terminal() {
    let repo = Arc::new(InMemoryRepository::new());
    let lock = LockManager::new(Arc::clone(&repo));
    let resource = Uuid::new_v4();

    let a = pending_action(&repo).await;
    let b = pending_action(&repo).await;

    lock.acquire(resource, LockScope::Cluster, a, false).await.unwrap();
    // Simulate `a`'s owning action reaching a terminal status without ever
    // calling `release` (e.g. the process crashed mid-action).
    repo.update_action_status(a, ActionStatus::Cancelled, None).await.unwrap();

    // A plain, non-forced acquire must succeed: the prior owner is orphaned.
    lock.acquire(resource, LockScope::Cluster, b, false).await.unwrap();
}

#[tokio::test]
async fn node_scope_allows_multiple_concurrent_owners() {
    let repo = Arc::new(InMemoryRepository::new());
    let lock = LockManager::new(Arc::clone(&repo));
    let resource = Uuid::new_v4();

    let a = pending_action(&repo).await;
    let b = pending_action(&repo).await;

    lock.acquire(resource, LockScope::Node, a, false).await.unwrap();
    lock.acquire(resource, LockScope::Node, b, false).await.unwrap();
    assert!(lock.is_held(resource, LockScope::Node).await);

    lock.release(resource, LockScope::Node, a).await.unwrap();
    assert!(lock.is_held(resource, LockScope::Node).await);
    lock.release(resource, LockScope::Node, b).await.unwrap();
    assert!(!lock.is_held(resource, LockScope::Node).await);
}
