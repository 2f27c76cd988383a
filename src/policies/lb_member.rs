//! Load-balancer member policy, ported from
//! `senlin/policies/lb_member_policy_v1.py`.
//!
//! On attach, registers every existing node as a pool member; on detach,
//! deregisters them; on post_op (AFTER `ADD_NODES`/`DEL_NODES`/
//! `SCALE_OUT`/`SCALE_IN`/`RESIZE`), reconciles pool membership against
//! `outputs.nodes_added`/`outputs.nodes_removed`, recording the assigned
//! member id in `node.data["lb_member"]`.
//!
//! The source's `_add_members`/`_remove_members` log a local named
//! `node_id` that is never assigned — a bug (spec §9 open question). We do
//! not port it; we log `node.id`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::{Cluster, RequestContext};
use crate::driver::LoadBalancingDriver;
use crate::error::Result;
use crate::policy_engine::{decision_keys, PolicyKind};
use crate::repository::Repository;

pub struct LbMemberPolicy<R: Repository, D: LoadBalancingDriver> {
    repo: Arc<R>,
    driver: Arc<D>,
}

impl<R: Repository, D: LoadBalancingDriver> LbMemberPolicy<R, D> {
    pub fn new(repo: Arc<R>, driver: Arc<D>) -> Self {
        LbMemberPolicy { repo, driver }
    }

    fn pool_id(spec: &Value) -> Option<String> {
        spec.get("pool").and_then(|v| v.as_str()).map(str::to_string)
    }

    fn protocol_port(spec: &Value) -> u16 {
        spec.get("protocol_port").and_then(|v| v.as_u64()).unwrap_or(80) as u16
    }

    async fn add_members(&self, ctx: &RequestContext, pool_id: &str, port: u16, node_ids: &[Uuid], binding_data: &mut Value) -> Result<()> {
        let mut members = binding_data
            .get("lb_members")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        for node_id in node_ids {
            let mut node = self.repo.get_node(ctx, *node_id).await?;
            let address = node.physical_id.clone().unwrap_or_default();
            match self.driver.member_add(ctx, &address, pool_id, port).await {
                Ok(member_id) => {
                    node.data.insert("lb_member".into(), Value::String(member_id.clone()));
                    self.repo.update_node(ctx, node).await?;
                    members.insert(node_id.to_string(), Value::String(member_id));
                    info!(node_id = %node_id, "added node as LB pool member");
                }
                Err(e) => {
                    error!(node_id = %node_id, error = %e, "failed to add node as LB pool member");
                    return Err(e);
                }
            }
        }
        binding_data["lb_members"] = Value::Object(members);
        Ok(())
    }

    async fn remove_members(&self, ctx: &RequestContext, node_ids: &[Uuid], binding_data: &mut Value) -> Result<()> {
        let mut members = binding_data
            .get("lb_members")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        for node_id in node_ids {
            let member_id = members.remove(&node_id.to_string());
            if let Some(Value::String(member_id)) = member_id {
                if let Err(e) = self.driver.member_remove(ctx, &member_id).await {
                    error!(node_id = %node_id, error = %e, "failed to remove node as LB pool member");
                    return Err(e);
                }
                info!(node_id = %node_id, "removed node as LB pool member");
            }
            if let Ok(mut node) = self.repo.get_node(ctx, *node_id).await {
                node.data.remove("lb_member");
                let _ = self.repo.update_node(ctx, node).await;
            }
        }
        binding_data["lb_members"] = Value::Object(members);
        Ok(())
    }
}

#[async_trait]
impl<R: Repository, D: LoadBalancingDriver> PolicyKind for LbMemberPolicy<R, D> {
    fn type_tag(&self) -> &str {
        "senlin.policy.loadbalance"
    }

    async fn attach(&self, ctx: &RequestContext, cluster: &Cluster, policy_spec: &Value, binding_data: &mut Value) -> Result<()> {
        let Some(pool_id) = Self::pool_id(policy_spec) else {
            return Ok(());
        };
        let port = Self::protocol_port(policy_spec);
        let nodes = self.repo.list_nodes_in_cluster(ctx, cluster.id).await?;
        let ids: Vec<Uuid> = nodes.iter().map(|n| n.id).collect();
        self.add_members(ctx, &pool_id, port, &ids, binding_data).await
    }

    async fn detach(&self, ctx: &RequestContext, cluster: &Cluster, _policy_spec: &Value, binding_data: &Value) -> Result<()> {
        let nodes = self.repo.list_nodes_in_cluster(ctx, cluster.id).await?;
        let ids: Vec<Uuid> = nodes.iter().map(|n| n.id).collect();
        let mut scratch = binding_data.clone();
        self.remove_members(ctx, &ids, &mut scratch).await
    }

    async fn post_op(
        &self,
        ctx: &RequestContext,
        _cluster_id: Uuid,
        action: &mut crate::domain::Action,
        policy_spec: &Value,
        binding_data: &mut Value,
    ) -> Result<()> {
        let Some(pool_id) = Self::pool_id(policy_spec) else {
            return Ok(());
        };
        let port = Self::protocol_port(policy_spec);

        let added: Vec<Uuid> = action
            .outputs
            .get("nodes_added")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).filter_map(|s| Uuid::parse_str(s).ok()).collect())
            .unwrap_or_default();
        let removed: Vec<Uuid> = action
            .outputs
            .get("nodes_removed")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).filter_map(|s| Uuid::parse_str(s).ok()).collect())
            .unwrap_or_default();

        if !added.is_empty() {
            if let Err(e) = self.add_members(ctx, &pool_id, port, &added, binding_data).await {
                action.data[decision_keys::STATUS] = Value::String(decision_keys::CHECK_ERROR.into());
                action.data[decision_keys::REASON] = Value::String(e.to_string());
                return Ok(());
            }
        }
        if !removed.is_empty() {
            self.remove_members(ctx, &removed, binding_data).await?;
        }
        Ok(())
    }
}
