//! Deletion candidate-selection policy (supplemented; see
//! `SPEC_FULL.md`). Populates `deletion.candidates` for `SCALE_IN`/
//! `DEL_NODES`/`RESIZE`: newest-index-first, tie-broken by creation time
//! ascending (spec §4.5 point 5).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{Action, RequestContext};
use crate::error::Result;
use crate::policy_engine::{decision_keys, PolicyKind};
use crate::repository::Repository;

pub struct DeletionPolicy<R: Repository> {
    repo: Arc<R>,
}

impl<R: Repository> DeletionPolicy<R> {
    pub fn new(repo: Arc<R>) -> Self {
        DeletionPolicy { repo }
    }
}

#[async_trait]
impl<R: Repository> PolicyKind for DeletionPolicy<R> {
    fn type_tag(&self) -> &str {
        "senlin.policy.deletion"
    }

    async fn pre_op(
        &self,
        ctx: &RequestContext,
        cluster_id: Uuid,
        action: &mut Action,
        policy_spec: &Value,
        _binding_data: &Value,
    ) -> Result<()> {
        let count = action
            .data
            .get(decision_keys::DELETION_COUNT)
            .and_then(|v| v.as_u64())
            .or_else(|| action.inputs.get("count").and_then(|v| v.as_u64()))
            .unwrap_or(1) as usize;

        let destroy_after_deletion = policy_spec
            .get("destroy_after_deletion")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let mut nodes = self.repo.list_nodes_in_cluster(ctx, cluster_id).await?;
        nodes.sort_by(|a, b| b.index.cmp(&a.index).then(a.created_at.cmp(&b.created_at)));
        let candidates: Vec<Value> = nodes
            .into_iter()
            .take(count)
            .map(|n| Value::String(n.id.to_string()))
            .collect();

        action.data[decision_keys::DELETION_CANDIDATES] = Value::Array(candidates);
        action.data[decision_keys::DELETION_DESTROY_AFTER_DELETION] = Value::Bool(destroy_after_deletion);
        Ok(())
    }
}
