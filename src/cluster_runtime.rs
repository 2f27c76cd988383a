//! Cluster Action Runtime (C5, spec §4.5): decomposes cluster intents into
//! node sub-actions, manages dependents, and commits cluster status.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::domain::{Action, Cluster, ClusterStatus, Node, NodeStatus, Phase, RequestContext};
use crate::error::{EngineError, Result};
use crate::lock::{LockManager, LockScope};
use crate::policy_engine::{decision_keys, PolicyEngine};
use crate::repository::Repository;
use crate::scheduler::{wait_for_dependents, ActionExecutor, Dispatcher, ResultCode};

/// Key under `Action::data` that records the child action ids a fanned-out
/// cluster action is waiting on. Its presence is also how a resumed
/// invocation tells apart "first run, spawn children" from "woken up after
/// suspension, go check on them" (spec §4.3).
const PENDING_CHILDREN_KEY: &str = "_pending_children";

/// Decomposes a cluster action into node sub-actions dispatched back through
/// the scheduler; it never calls an [`crate::node_runtime::NodeRuntime`]
/// directly; `NODE_*` children are routed to it by whatever composes the
/// scheduler's [`ActionExecutor`] (see `crate::engine`).
pub struct ClusterRuntime<R: Repository> {
    repo: Arc<R>,
    lock: Arc<LockManager<R>>,
    policy_engine: Arc<PolicyEngine<R>>,
    dispatcher: Dispatcher,
}

impl<R: Repository> ClusterRuntime<R> {
    pub fn new(repo: Arc<R>, lock: Arc<LockManager<R>>, policy_engine: Arc<PolicyEngine<R>>, dispatcher: Dispatcher) -> Self {
        ClusterRuntime { repo, lock, policy_engine, dispatcher }
    }

    /// Background execution happens as the system, not as any particular
    /// tenant: the intent call that created the parent action already
    /// authorized the operation with the caller's own `RequestContext`.
    fn system_ctx(&self, cluster: &Cluster) -> RequestContext {
        RequestContext::new(cluster.owner_user.clone(), cluster.owner_project.clone(), cluster.owner_domain.clone())
            .with_admin(true)
    }

    async fn spawn_child(&self, parent: &Action, target_id: Uuid, action_name: &str, inputs: Value) -> Result<Uuid> {
        let mut child = Action::new(target_id, action_name, parent.id.to_string());
        child.inputs = inputs;
        child.timeout = parent.timeout;
        let child_id = child.id;
        self.repo.create_action(child).await?;
        self.repo.action_add_dependency(child_id, parent.id).await?;
        self.dispatcher.start(child_id);
        Ok(child_id)
    }

    /// Children recorded by a prior, now-suspended invocation of this same
    /// action, if any.
    fn resumed_children(action: &Action) -> Option<Vec<Uuid>> {
        action.data.get(PENDING_CHILDREN_KEY).and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .filter_map(|s| Uuid::parse_str(s).ok())
                .collect()
        })
    }

    /// Persists the freshly spawned child set so a later resumption can find
    /// it without re-deriving (and re-spawning) it.
    async fn record_children(&self, action: &mut Action, children: &[Uuid]) -> Result<()> {
        let mut data = if action.data.is_object() { action.data.clone() } else { json!({}) };
        data[PENDING_CHILDREN_KEY] = json!(children.iter().map(Uuid::to_string).collect::<Vec<_>>());
        action.data = data.clone();
        self.repo.action_update(action.id, None, None, Some(data)).await
    }

    /// Maps child action ids back to the node they targeted; used to
    /// reassemble outputs after a resume, when the locals that built the
    /// node id list in the first place are long gone.
    async fn children_targets(&self, children: &[Uuid]) -> Result<Vec<Uuid>> {
        let mut targets = Vec::with_capacity(children.len());
        for id in children {
            targets.push(self.repo.get_action(*id).await?.target_id);
        }
        Ok(targets)
    }

    /// A single, non-blocking look at `children`'s current status (spec
    /// §4.3): `ResultCode::Ok` once all have succeeded, `Error`/`Cancel` as
    /// soon as any one has failed/been cancelled, `Suspended` otherwise — the
    /// caller must propagate `Suspended` straight up without finalizing
    /// anything, since the worker is about to be freed and this same action
    /// will run again once the repository's dependency cascade promotes it
    /// back to READY.
    async fn wait_children(&self, children: &[Uuid], cancel: &CancellationToken) -> (ResultCode, String) {
        wait_for_dependents(&*self.repo, children, cancel).await
    }

    /// The normative execution wrapper from spec §4.5:
    /// acquire cluster lock -> BEFORE policy -> body -> AFTER policy ->
    /// commit cluster status -> release cluster lock.
    ///
    /// A body that fans out NODE_* children may not finish on this call: it
    /// returns `ResultCode::Suspended` as soon as the children are spawned,
    /// and this function returns immediately too, holding the cluster lock
    /// but doing none of the AFTER-policy/commit/release steps yet. The next
    /// time this same action reaches RUNNING — because the dependency
    /// cascade promoted it WAITING -> READY and a worker picked it back up —
    /// `resuming` is true, the lock/BEFORE-policy steps are skipped (already
    /// done), and the body resumes from where it parked.
    #[instrument(skip(self, cancel))]
    async fn run_wrapped(&self, action_id: Uuid, cancel: CancellationToken) -> Result<ResultCode> {
        let mut action = self.repo.get_action(action_id).await?;
        let cluster_id = action.target_id;
        let probe_ctx = RequestContext::new("system", "system", "system").with_admin(true);
        let mut cluster = self.repo.get_cluster(&probe_ctx, cluster_id).await?;
        let ctx = self.system_ctx(&cluster);
        let forced = action.data.get("forced").and_then(|v| v.as_bool()).unwrap_or(false);
        let resuming = Self::resumed_children(&action).is_some();

        if !resuming {
            self.lock
                .acquire(cluster_id, LockScope::Cluster, action_id, forced)
                .await?;

            let before = self
                .policy_engine
                .evaluate(&ctx, cluster_id, Phase::Before, &mut action)
                .await?;
            self.repo
                .action_update(action_id, None, None, Some(action.data.clone()))
                .await?;

            if before.vetoed {
                self.lock.release(cluster_id, LockScope::Cluster, action_id).await?;
                return Err(EngineError::PolicyVeto(format!("Policy check failure: {}", before.reason)));
            }
        }

        let body_result = self.dispatch_body(&ctx, &mut cluster, &mut action, &cancel).await;

        if matches!(body_result, Ok(ResultCode::Suspended)) {
            return Ok(ResultCode::Suspended);
        }

        let (mut final_code, mut reason) = match &body_result {
            Ok(code) => (*code, String::new()),
            Err(e) => (ResultCode::Error, e.to_string()),
        };

        if final_code == ResultCode::Ok {
            let after = self
                .policy_engine
                .evaluate(&ctx, cluster_id, Phase::After, &mut action)
                .await?;
            self.repo
                .action_update(action_id, None, None, Some(action.data.clone()))
                .await?;
            if after.vetoed {
                final_code = ResultCode::Error;
                reason = format!("Policy check failure: {}", after.reason);
            }
        }

        self.commit_cluster_status(&ctx, &mut cluster, final_code, &reason).await?;
        self.lock.release(cluster_id, LockScope::Cluster, action_id).await?;

        if final_code == ResultCode::Error {
            return Ok(ResultCode::Error);
        }
        Ok(final_code)
    }

    async fn dispatch_body(
        &self,
        ctx: &RequestContext,
        cluster: &mut Cluster,
        action: &mut Action,
        cancel: &CancellationToken,
    ) -> Result<ResultCode> {
        match action.action_name.as_str() {
            "CLUSTER_CREATE" => self.do_create(ctx, cluster, action, cancel).await,
            "CLUSTER_DELETE" => self.do_delete(ctx, cluster, action, cancel).await,
            "CLUSTER_UPDATE" => self.do_update(ctx, cluster, action, cancel).await,
            "CLUSTER_ADD_NODES" => self.do_add_nodes(ctx, cluster, action, cancel).await,
            "CLUSTER_DEL_NODES" => self.do_del_nodes(ctx, cluster, action, cancel).await,
            "CLUSTER_RESIZE" => self.do_resize(ctx, cluster, action, cancel).await,
            "CLUSTER_SCALE_OUT" => self.do_scale_out(ctx, cluster, action, cancel).await,
            "CLUSTER_SCALE_IN" => self.do_scale_in(ctx, cluster, action, cancel).await,
            "CLUSTER_ATTACH_POLICY" => self.do_attach_policy(ctx, cluster, action).await,
            "CLUSTER_DETACH_POLICY" => self.do_detach_policy(ctx, cluster, action).await,
            "CLUSTER_UPDATE_POLICY" => self.do_update_policy(ctx, cluster, action).await,
            other => Err(EngineError::Validation(format!("unknown cluster action {other}"))),
        }
    }

    async fn commit_cluster_status(&self, ctx: &RequestContext, cluster: &mut Cluster, code: ResultCode, reason: &str) -> Result<()> {
        match code {
            ResultCode::Ok => {
                if cluster.status != ClusterStatus::Warning {
                    cluster.status = ClusterStatus::Active;
                }
                cluster.status_reason = String::new();
            }
            ResultCode::Error => {
                // A body may have already downgraded this to WARNING (spec
                // §7: partial, recoverable failures like CLUSTER_DELETE
                // leaving a node behind do not escalate to ERROR).
                if cluster.status != ClusterStatus::Warning {
                    cluster.status = ClusterStatus::Error;
                    cluster.status_reason = reason.to_string();
                }
            }
            ResultCode::Cancel | ResultCode::Timeout => {
                cluster.status = ClusterStatus::Warning;
                cluster.status_reason = reason.to_string();
            }
            ResultCode::Retry => {}
            ResultCode::Suspended => {
                // run_wrapped returns before reaching here whenever the body
                // suspends; this arm only exists to keep the match exhaustive.
            }
        }
        self.repo.update_cluster(ctx, cluster.clone()).await
    }

    #[instrument(skip(self, ctx, cluster, action, cancel))]
    async fn do_create(&self, ctx: &RequestContext, cluster: &mut Cluster, action: &mut Action, cancel: &CancellationToken) -> Result<ResultCode> {
        let children = if let Some(children) = Self::resumed_children(action) {
            children
        } else {
            cluster.status = ClusterStatus::Creating;
            self.repo.update_cluster(ctx, cluster.clone()).await?;

            let placements = action
                .data
                .get(decision_keys::CREATION_PLACEMENTS)
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            let mut children = Vec::with_capacity(cluster.desired_capacity.max(0) as usize);
            for i in 0..cluster.desired_capacity.max(0) {
                let mut node = Node::new_orphan(format!("{}-node-{}", cluster.name, i), cluster.profile_id, "member");
                let index = self.repo.cluster_next_index(cluster.id).await?;
                cluster.next_node_index = index + 1;
                node.cluster_id = Some(cluster.id);
                node.index = index;
                let node_id = node.id;
                self.repo.create_node(ctx, node).await?;

                let placement = placements.get(i as usize).cloned().unwrap_or(Value::Null);
                let inputs = json!({ "cluster_id": cluster.id, "user_initiated": false, "placement": placement });
                let child_id = self.spawn_child(action, node_id, "NODE_CREATE", inputs).await?;
                children.push(child_id);
            }

            self.record_children(action, &children).await?;
            children
        };

        let (code, reason) = self.wait_children(&children, cancel).await;
        if code == ResultCode::Suspended {
            return Ok(ResultCode::Suspended);
        }
        if code == ResultCode::Ok {
            action.outputs = json!({ "nodes_created": children });
        } else {
            action.outputs = json!({ "reason": reason });
        }
        self.repo.action_update(action.id, None, Some(action.outputs.clone()), None).await?;
        Ok(code)
    }

    #[instrument(skip(self, ctx, cluster, action, cancel))]
    async fn do_delete(&self, ctx: &RequestContext, cluster: &mut Cluster, action: &mut Action, cancel: &CancellationToken) -> Result<ResultCode> {
        let children = if let Some(children) = Self::resumed_children(action) {
            children
        } else {
            cluster.status = ClusterStatus::Deleting;
            self.repo.update_cluster(ctx, cluster.clone()).await?;

            let destroy_after_deletion = action
                .data
                .get(decision_keys::DELETION_DESTROY_AFTER_DELETION)
                .and_then(|v| v.as_bool())
                .unwrap_or(true);

            let nodes = self.repo.list_nodes_in_cluster(ctx, cluster.id).await?;
            let mut children = Vec::with_capacity(nodes.len());
            for node in &nodes {
                let op = if destroy_after_deletion { "NODE_DELETE" } else { "NODE_LEAVE" };
                let child_id = self.spawn_child(action, node.id, op, Value::Null).await?;
                children.push(child_id);
            }

            self.record_children(action, &children).await?;
            children
        };

        let (code, reason) = self.wait_children(&children, cancel).await;
        if code == ResultCode::Suspended {
            return Ok(ResultCode::Suspended);
        }
        if code == ResultCode::Ok {
            self.repo.delete_cluster(ctx, cluster.id).await?;
            Ok(ResultCode::Ok)
        } else {
            warn!(cluster_id = %cluster.id, %reason, "cluster delete left nodes lingering");
            cluster.status = ClusterStatus::Warning;
            cluster.status_reason = reason;
            Ok(ResultCode::Error)
        }
    }

    #[instrument(skip(self, ctx, cluster, action, cancel))]
    async fn do_update(&self, ctx: &RequestContext, cluster: &mut Cluster, action: &mut Action, cancel: &CancellationToken) -> Result<ResultCode> {
        let children = if let Some(children) = Self::resumed_children(action) {
            children
        } else {
            let new_profile_id: Uuid = action
                .inputs
                .get("profile_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| EngineError::Validation("CLUSTER_UPDATE requires inputs.profile_id".into()))?;

            cluster.status = ClusterStatus::Updating;
            self.repo.update_cluster(ctx, cluster.clone()).await?;

            let nodes = self.repo.list_nodes_in_cluster(ctx, cluster.id).await?;
            let mut children = Vec::with_capacity(nodes.len());
            for node in &nodes {
                let inputs = json!({ "profile_id": new_profile_id });
                children.push(self.spawn_child(action, node.id, "NODE_UPDATE", inputs).await?);
            }

            self.record_children(action, &children).await?;
            children
        };

        let (code, _reason) = self.wait_children(&children, cancel).await;
        if code == ResultCode::Suspended {
            return Ok(ResultCode::Suspended);
        }
        if code == ResultCode::Ok {
            let new_profile_id: Uuid = action
                .inputs
                .get("profile_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| EngineError::Validation("CLUSTER_UPDATE requires inputs.profile_id".into()))?;
            cluster.profile_id = new_profile_id;
        }
        Ok(code)
    }

    #[instrument(skip(self, ctx, cluster, action, cancel))]
    async fn do_add_nodes(&self, ctx: &RequestContext, cluster: &mut Cluster, action: &mut Action, cancel: &CancellationToken) -> Result<ResultCode> {
        let children = if let Some(children) = Self::resumed_children(action) {
            children
        } else {
            let node_ids: Vec<Uuid> = action
                .inputs
                .get("node_ids")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str()).filter_map(|s| Uuid::parse_str(s).ok()).collect())
                .unwrap_or_default();

            for id in &node_ids {
                let node = self.repo.get_node(ctx, *id).await?;
                if !node.is_orphan() {
                    return Err(EngineError::Conflict(format!(
                        "Node [{id}] is already owned by cluster [{}]",
                        node.cluster_id.unwrap()
                    )));
                }
                if node.status != NodeStatus::Active {
                    return Err(EngineError::Validation(format!("node {id} must be ACTIVE to be added")));
                }
            }

            let mut children = Vec::with_capacity(node_ids.len());
            for id in &node_ids {
                let inputs = json!({ "cluster_id": cluster.id, "user_initiated": true });
                children.push(self.spawn_child(action, *id, "NODE_JOIN", inputs).await?);
            }

            self.record_children(action, &children).await?;
            children
        };

        let (code, reason) = self.wait_children(&children, cancel).await;
        if code == ResultCode::Suspended {
            return Ok(ResultCode::Suspended);
        }
        if code == ResultCode::Ok {
            // Each NODE_JOIN child assigned its index through
            // `cluster_next_index`, which writes the cluster row directly;
            // refresh our cached copy of that counter so the final commit
            // doesn't stomp it back to its pre-join value.
            let refreshed = self.repo.get_cluster(ctx, cluster.id).await?;
            cluster.next_node_index = refreshed.next_node_index;
            cluster.desired_capacity += children.len() as i64;
            let node_ids = self.children_targets(&children).await?;
            action.outputs = json!({ "nodes_added": node_ids });
            self.repo.action_update(action.id, None, Some(action.outputs.clone()), None).await?;
        } else {
            action.outputs = json!({ "reason": reason });
        }
        Ok(code)
    }

    #[instrument(skip(self, ctx, cluster, action, cancel))]
    async fn do_del_nodes(&self, ctx: &RequestContext, cluster: &mut Cluster, action: &mut Action, cancel: &CancellationToken) -> Result<ResultCode> {
        let children = if let Some(children) = Self::resumed_children(action) {
            children
        } else {
            let candidate_ids: Vec<Uuid> = action
                .data
                .get(decision_keys::DELETION_CANDIDATES)
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str()).filter_map(|s| Uuid::parse_str(s).ok()).collect())
                .unwrap_or_else(|| {
                    action
                        .inputs
                        .get("node_ids")
                        .and_then(|v| v.as_array())
                        .map(|a| a.iter().filter_map(|v| v.as_str()).filter_map(|s| Uuid::parse_str(s).ok()).collect())
                        .unwrap_or_default()
                });

            if let Some(grace) = action.data.get(decision_keys::DELETION_GRACE_PERIOD).and_then(|v| v.as_u64()) {
                if grace > 0 {
                    self.repo
                        .update_action_status(action.id, crate::domain::ActionStatus::Suspended, None)
                        .await?;
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(grace)) => {}
                        _ = cancel.cancelled() => return Ok(ResultCode::Cancel),
                    }
                    self.repo
                        .update_action_status(action.id, crate::domain::ActionStatus::Running, None)
                        .await?;
                }
            }

            let destroy_after_deletion = action
                .data
                .get(decision_keys::DELETION_DESTROY_AFTER_DELETION)
                .and_then(|v| v.as_bool())
                .unwrap_or(true);

            let mut children = Vec::with_capacity(candidate_ids.len());
            for id in &candidate_ids {
                let op = if destroy_after_deletion { "NODE_DELETE" } else { "NODE_LEAVE" };
                children.push(self.spawn_child(action, *id, op, Value::Null).await?);
            }

            self.record_children(action, &children).await?;
            children
        };

        let (code, reason) = self.wait_children(&children, cancel).await;
        if code == ResultCode::Suspended {
            return Ok(ResultCode::Suspended);
        }
        if code == ResultCode::Ok {
            cluster.desired_capacity = (cluster.desired_capacity - children.len() as i64).max(0);
            let node_ids = self.children_targets(&children).await?;
            action.outputs = json!({ "nodes_removed": node_ids });
            self.repo.action_update(action.id, None, Some(action.outputs.clone()), None).await?;
        } else {
            action.outputs = json!({ "reason": reason });
        }
        Ok(code)
    }

    /// spec §4.5 CLUSTER_RESIZE: parse request into (target, delta), then
    /// behave as SCALE_OUT/SCALE_IN.
    #[instrument(skip(self, ctx, cluster, action, cancel))]
    async fn do_resize(&self, ctx: &RequestContext, cluster: &mut Cluster, action: &mut Action, cancel: &CancellationToken) -> Result<ResultCode> {
        let strict = action.inputs.get("strict").and_then(|v| v.as_bool()).unwrap_or(false);
        let new_min = action.inputs.get("min_size").and_then(|v| v.as_i64());
        let new_max = action.inputs.get("max_size").and_then(|v| v.as_i64());
        let min = new_min.unwrap_or(cluster.min_size);
        let max = new_max.unwrap_or(cluster.max_size);

        let current = cluster.desired_capacity;
        let mut target = if let Some(abs) = action.inputs.get("desired_capacity").and_then(|v| v.as_i64()) {
            abs
        } else if let Some(delta) = action.inputs.get("adjustment").and_then(|v| v.as_i64()) {
            current + delta
        } else if let Some(pct) = action.inputs.get("adjustment_percentage").and_then(|v| v.as_f64()) {
            let min_step = action.inputs.get("min_step").and_then(|v| v.as_i64()).unwrap_or(1);
            let raw = (current as f64 * pct / 100.0).round() as i64;
            let magnitude = raw.unsigned_abs().max(min_step as u64) as i64;
            current + magnitude * raw.signum()
        } else {
            current
        };

        if strict {
            if target < min {
                return Err(EngineError::Validation(format!(
                    "target capacity ({target}) is less than the specified min_size ({min})"
                )));
            }
            if max != crate::domain::cluster::UNBOUNDED && target > max {
                return Err(EngineError::Validation(format!(
                    "target capacity ({target}) is greater than the specified max_size ({max})"
                )));
            }
        }
        if !strict {
            target = target.max(min);
            if max != crate::domain::cluster::UNBOUNDED {
                target = target.min(max);
            }
        }

        let delta = target - current;
        let code = if delta > 0 {
            action.inputs["count"] = json!(delta);
            self.do_scale_out(ctx, cluster, action, cancel).await?
        } else if delta < 0 {
            action.inputs["count"] = json!(-delta);
            self.do_scale_in(ctx, cluster, action, cancel).await?
        } else {
            ResultCode::Ok
        };

        if code == ResultCode::Ok {
            cluster.desired_capacity = target;
            if new_min.is_some() {
                cluster.min_size = min;
            }
            if new_max.is_some() {
                cluster.max_size = max;
            }
        }
        Ok(code)
    }

    #[instrument(skip(self, ctx, cluster, action, cancel))]
    async fn do_scale_out(&self, ctx: &RequestContext, cluster: &mut Cluster, action: &mut Action, cancel: &CancellationToken) -> Result<ResultCode> {
        let children = if let Some(children) = Self::resumed_children(action) {
            children
        } else {
            let count = action
                .inputs
                .get("count")
                .and_then(|v| v.as_i64())
                .or_else(|| action.data.get(decision_keys::CREATION_COUNT).and_then(|v| v.as_i64()))
                .unwrap_or(1);
            if count < 0 {
                return Err(EngineError::Validation("scale_out count must not be negative".into()));
            }

            cluster.status = ClusterStatus::Resizing;
            self.repo.update_cluster(ctx, cluster.clone()).await?;

            let placements = action
                .data
                .get(decision_keys::CREATION_PLACEMENTS)
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            let mut children = Vec::with_capacity(count as usize);
            for i in 0..count {
                let index = self.repo.cluster_next_index(cluster.id).await?;
                cluster.next_node_index = index + 1;
                let mut node = Node::new_orphan(format!("{}-node-{}", cluster.name, index), cluster.profile_id, "member");
                node.cluster_id = Some(cluster.id);
                node.index = index;
                let node_id = node.id;
                self.repo.create_node(ctx, node).await?;

                let placement = placements.get(i as usize).cloned().unwrap_or(Value::Null);
                let inputs = json!({ "placement": placement });
                children.push(self.spawn_child(action, node_id, "NODE_CREATE", inputs).await?);
            }

            self.record_children(action, &children).await?;
            children
        };

        let (code, reason) = self.wait_children(&children, cancel).await;
        if code == ResultCode::Suspended {
            return Ok(ResultCode::Suspended);
        }
        if code == ResultCode::Ok {
            cluster.desired_capacity += children.len() as i64;
            let node_ids = self.children_targets(&children).await?;
            action.outputs = json!({ "nodes_added": node_ids });
            self.repo.action_update(action.id, None, Some(action.outputs.clone()), None).await?;
        } else {
            action.outputs = json!({ "reason": reason });
        }
        Ok(code)
    }

    #[instrument(skip(self, ctx, cluster, action, cancel))]
    async fn do_scale_in(&self, ctx: &RequestContext, cluster: &mut Cluster, action: &mut Action, cancel: &CancellationToken) -> Result<ResultCode> {
        let children = if let Some(children) = Self::resumed_children(action) {
            children
        } else {
            let count = action
                .inputs
                .get("count")
                .and_then(|v| v.as_i64())
                .or_else(|| action.data.get(decision_keys::DELETION_COUNT).and_then(|v| v.as_i64()))
                .unwrap_or(1);
            if count < 0 {
                return Err(EngineError::Validation("scale_in count must not be negative".into()));
            }

            cluster.status = ClusterStatus::Resizing;
            self.repo.update_cluster(ctx, cluster.clone()).await?;

            let mut candidates: Vec<Uuid> = action
                .data
                .get(decision_keys::DELETION_CANDIDATES)
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str()).filter_map(|s| Uuid::parse_str(s).ok()).collect())
                .unwrap_or_default();

            if candidates.is_empty() {
                // No policy selected candidates: newest |delta| nodes by
                // index descending, tie-break creation time ascending (spec
                // §4.5.5).
                let mut nodes = self.repo.list_nodes_in_cluster(ctx, cluster.id).await?;
                nodes.sort_by(|a, b| b.index.cmp(&a.index).then(a.created_at.cmp(&b.created_at)));
                candidates = nodes.into_iter().take(count as usize).map(|n| n.id).collect();
            } else {
                candidates.truncate(count as usize);
            }

            let best_effort = action.inputs.get("best_effort").and_then(|v| v.as_bool()).unwrap_or(false);
            if !best_effort {
                let available = self.repo.list_nodes_in_cluster(ctx, cluster.id).await?.len();
                if (count as usize) > available {
                    return Err(EngineError::Validation(format!(
                        "cannot remove {count} nodes, only {available} present"
                    )));
                }
            }

            let destroy_after_deletion = action
                .data
                .get(decision_keys::DELETION_DESTROY_AFTER_DELETION)
                .and_then(|v| v.as_bool())
                .unwrap_or(true);

            let mut children = Vec::with_capacity(candidates.len());
            for id in &candidates {
                let op = if destroy_after_deletion { "NODE_DELETE" } else { "NODE_LEAVE" };
                children.push(self.spawn_child(action, *id, op, Value::Null).await?);
            }

            self.record_children(action, &children).await?;
            children
        };

        let (code, reason) = self.wait_children(&children, cancel).await;
        if code == ResultCode::Suspended {
            return Ok(ResultCode::Suspended);
        }
        if code == ResultCode::Ok {
            cluster.desired_capacity = (cluster.desired_capacity - children.len() as i64).max(0);
            let node_ids = self.children_targets(&children).await?;
            action.outputs = json!({ "nodes_removed": node_ids });
            self.repo.action_update(action.id, None, Some(action.outputs.clone()), None).await?;
        } else {
            action.outputs = json!({ "reason": reason });
        }
        Ok(code)
    }

    /// ATTACH/DETACH/UPDATE_POLICY are not fanned out into children (spec
    /// §4.5).
    async fn do_attach_policy(&self, ctx: &RequestContext, cluster: &mut Cluster, action: &mut Action) -> Result<ResultCode> {
        let policy_id: Uuid = action
            .inputs
            .get("policy_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| EngineError::Validation("CLUSTER_ATTACH_POLICY requires inputs.policy_id".into()))?;

        let mut binding = crate::domain::ClusterPolicyBinding::new(cluster.id, policy_id);
        if let Some(priority) = action.inputs.get("priority").and_then(|v| v.as_u64()) {
            binding.priority = priority as u8;
        }
        if let Some(cooldown) = action.inputs.get("cooldown").and_then(|v| v.as_u64()) {
            binding.cooldown = std::time::Duration::from_secs(cooldown);
        }
        self.policy_engine.attach(ctx, cluster, policy_id, &mut binding.data).await?;
        self.repo.attach_policy(ctx, binding).await?;
        Ok(ResultCode::Ok)
    }

    async fn do_detach_policy(&self, ctx: &RequestContext, cluster: &mut Cluster, action: &mut Action) -> Result<ResultCode> {
        let policy_id: Uuid = action
            .inputs
            .get("policy_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| EngineError::Validation("CLUSTER_DETACH_POLICY requires inputs.policy_id".into()))?;

        let binding = self.repo.get_binding(ctx, cluster.id, policy_id).await?;
        self.policy_engine.detach(ctx, cluster, policy_id, &binding.data).await?;
        self.repo.detach_policy(ctx, cluster.id, policy_id).await?;
        Ok(ResultCode::Ok)
    }

    async fn do_update_policy(&self, ctx: &RequestContext, cluster: &mut Cluster, action: &mut Action) -> Result<ResultCode> {
        let policy_id: Uuid = action
            .inputs
            .get("policy_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| EngineError::Validation("CLUSTER_UPDATE_POLICY requires inputs.policy_id".into()))?;

        let mut binding = self.repo.get_binding(ctx, cluster.id, policy_id).await?;
        if let Some(priority) = action.inputs.get("priority").and_then(|v| v.as_u64()) {
            binding.priority = priority as u8;
        }
        if let Some(level) = action.inputs.get("level").and_then(|v| v.as_u64()) {
            binding.level = level as u8;
        }
        if let Some(cooldown) = action.inputs.get("cooldown").and_then(|v| v.as_u64()) {
            binding.cooldown = std::time::Duration::from_secs(cooldown);
        }
        if let Some(enabled) = action.inputs.get("enabled").and_then(|v| v.as_bool()) {
            binding.enabled = enabled;
        }
        self.repo.update_binding(ctx, binding).await?;
        Ok(ResultCode::Ok)
    }
}

#[async_trait]
impl<R: Repository> ActionExecutor for ClusterRuntime<R> {
    async fn execute(&self, action_id: Uuid, cancel: CancellationToken) -> Result<ResultCode> {
        self.run_wrapped(action_id, cancel).await
    }
}
