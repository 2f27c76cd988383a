//! Node Action Runtime (C4, spec §4.4). Executes the atomic node operations
//! against the [`InfrastructureDriver`]. Each operation is atomic from the
//! cluster's perspective even though it may drive the underlying driver
//! through multiple calls.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::domain::{Node, NodeStatus, RequestContext};
use crate::driver::{InfrastructureDriver, ServerSpec};
use crate::error::{EngineError, Result};
use crate::repository::Repository;
use crate::scheduler::ResultCode;

pub struct NodeRuntime<R: Repository, D: InfrastructureDriver> {
    repo: Arc<R>,
    driver: Arc<D>,
}

impl<R: Repository, D: InfrastructureDriver> NodeRuntime<R, D> {
    pub fn new(repo: Arc<R>, driver: Arc<D>) -> Self {
        NodeRuntime { repo, driver }
    }

    /// Pre: node persisted in INIT. Post (success): physical-id populated,
    /// status ACTIVE. Rollback on failure: status ERROR, physical resource
    /// best-effort deleted.
    #[instrument(skip(self, ctx, cancel))]
    pub async fn node_create(&self, ctx: &RequestContext, node_id: Uuid, cancel: &CancellationToken) -> Result<ResultCode> {
        let mut node = self.repo.get_node(ctx, node_id).await?;
        let profile = self.repo.get_profile(ctx, node.profile_id).await?;

        let spec = ServerSpec {
            name: node.name.clone(),
            image: profile.spec.get("image").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            flavor: profile.spec.get("flavor").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            metadata: node.metadata.get("tags").cloned().unwrap_or(json!({})),
        };

        if cancel.is_cancelled() {
            return Ok(ResultCode::Cancel);
        }

        match self.driver.server_create(ctx, &spec).await {
            Ok(handle) => {
                node.physical_id = Some(handle.physical_id);
                node.status = NodeStatus::Active;
                self.repo.update_node(ctx, node).await?;
                Ok(ResultCode::Ok)
            }
            Err(e) => {
                node.status = NodeStatus::Error;
                let _ = self.repo.update_node(ctx, node.clone()).await;
                if let Some(physical_id) = &node.physical_id {
                    let _ = self.driver.server_delete(ctx, physical_id).await;
                }
                warn!(%node_id, error = %e, "node create failed");
                Err(e)
            }
        }
    }

    /// Pre: any non-terminal status. Post (success): physical resource
    /// gone, record tombstoned. Rollback: status ERROR.
    #[instrument(skip(self, ctx, cancel))]
    pub async fn node_delete(&self, ctx: &RequestContext, node_id: Uuid, cancel: &CancellationToken) -> Result<ResultCode> {
        let node = self.repo.get_node(ctx, node_id).await?;
        if cancel.is_cancelled() {
            return Ok(ResultCode::Cancel);
        }
        if let Some(physical_id) = &node.physical_id {
            if let Err(e) = self.driver.server_delete(ctx, physical_id).await {
                let mut node = node;
                node.status = NodeStatus::Error;
                let _ = self.repo.update_node(ctx, node).await;
                return Err(e);
            }
            let _ = self.driver.wait_for_server_delete(ctx, physical_id).await;
        }
        self.repo.delete_node(ctx, node_id).await?;
        Ok(ResultCode::Ok)
    }

    /// Pre: status ACTIVE. Post (success): profile-id swapped, properties
    /// refreshed. Rollback: status ERROR, prior profile retained.
    #[instrument(skip(self, ctx, cancel))]
    pub async fn node_update(&self, ctx: &RequestContext, node_id: Uuid, new_profile_id: Uuid, cancel: &CancellationToken) -> Result<ResultCode> {
        let mut node = self.repo.get_node(ctx, node_id).await?;
        if node.status != NodeStatus::Active {
            return Err(EngineError::Conflict(format!(
                "node {node_id} must be ACTIVE to update, is {:?}",
                node.status
            )));
        }
        let prior_profile_id = node.profile_id;
        let profile = self.repo.get_profile(ctx, new_profile_id).await?;
        if cancel.is_cancelled() {
            return Ok(ResultCode::Cancel);
        }
        let spec = ServerSpec {
            name: node.name.clone(),
            image: profile.spec.get("image").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            flavor: profile.spec.get("flavor").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            metadata: json!({}),
        };
        let physical_id = node.physical_id.clone().unwrap_or_default();
        match self.driver.server_rebuild(ctx, &physical_id, &spec).await {
            Ok(()) => {
                node.profile_id = new_profile_id;
                self.repo.update_node(ctx, node).await?;
                Ok(ResultCode::Ok)
            }
            Err(e) => {
                node.status = NodeStatus::Error;
                node.profile_id = prior_profile_id;
                let _ = self.repo.update_node(ctx, node).await;
                Err(e)
            }
        }
    }

    /// Pre: node has no cluster. Post: cluster-id set, index assigned via
    /// `cluster.next_index`; `cluster.desired_capacity` incremented only
    /// when this join is user-initiated (not part of a CLUSTER_CREATE
    /// fan-out, which already accounts for capacity up front).
    #[instrument(skip(self, ctx))]
    pub async fn node_join(&self, ctx: &RequestContext, node_id: Uuid, cluster_id: Uuid, user_initiated: bool) -> Result<ResultCode> {
        let mut node = self.repo.get_node(ctx, node_id).await?;
        if !node.is_orphan() {
            return Err(EngineError::Conflict(format!(
                "node {node_id} is already owned by cluster {}",
                node.cluster_id.unwrap()
            )));
        }
        let index = self.repo.cluster_next_index(cluster_id).await?;
        node.join(cluster_id, index);
        self.repo.update_node(ctx, node).await?;

        if user_initiated {
            let mut cluster = self.repo.get_cluster(ctx, cluster_id).await?;
            cluster.desired_capacity += 1;
            self.repo.update_cluster(ctx, cluster).await?;
        }
        Ok(ResultCode::Ok)
    }

    /// Pre: node in a cluster. Post: cluster-id cleared, index = -1.
    /// Status is left unchanged (spec §4.4).
    #[instrument(skip(self, ctx))]
    pub async fn node_leave(&self, ctx: &RequestContext, node_id: Uuid) -> Result<ResultCode> {
        let mut node = self.repo.get_node(ctx, node_id).await?;
        if node.is_orphan() {
            return Err(EngineError::Conflict(format!("node {node_id} is not in a cluster")));
        }
        node.leave();
        self.repo.update_node(ctx, node).await?;
        Ok(ResultCode::Ok)
    }
}
