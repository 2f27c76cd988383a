//! Persistence repository (spec §6): a narrow set of operations keyed by
//! type, each taking a [`RequestContext`] that carries the caller's
//! project/user for multi-tenant scoping. The concrete relational driver is
//! out of scope (spec §1); this module defines the trait every subsystem
//! programs against plus [`InMemoryRepository`], a reference implementation
//! used by tests and by [`crate::testing`].
//!
//! Organized as one submodule per entity, singular names for CRUD and
//! plural/adjacent names for bulk listing, following the per-entity
//! submodule convention used by persistence layers for systems in this
//! domain (cluster/node/action/etc. each own their storage concerns).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    Action, ActionStatus, Cluster, ClusterPolicyBinding, CredentialBundle, Event, Node, Policy,
    Profile, Receiver, RequestContext,
};
use crate::error::{EngineError, Result};

#[async_trait]
pub trait Repository: Send + Sync {
    // --- Cluster ---
    async fn create_cluster(&self, ctx: &RequestContext, cluster: Cluster) -> Result<()>;
    async fn get_cluster(&self, ctx: &RequestContext, id: Uuid) -> Result<Cluster>;
    async fn list_clusters(&self, ctx: &RequestContext) -> Result<Vec<Cluster>>;
    async fn update_cluster(&self, ctx: &RequestContext, cluster: Cluster) -> Result<()>;
    async fn delete_cluster(&self, ctx: &RequestContext, id: Uuid) -> Result<()>;
    /// Atomic fetch-and-add of a cluster's node-index counter (spec §4.7).
    async fn cluster_next_index(&self, id: Uuid) -> Result<i64>;

    // --- Node ---
    async fn create_node(&self, ctx: &RequestContext, node: Node) -> Result<()>;
    async fn get_node(&self, ctx: &RequestContext, id: Uuid) -> Result<Node>;
    async fn list_nodes(&self, ctx: &RequestContext) -> Result<Vec<Node>>;
    async fn list_nodes_in_cluster(&self, ctx: &RequestContext, cluster_id: Uuid) -> Result<Vec<Node>>;
    async fn update_node(&self, ctx: &RequestContext, node: Node) -> Result<()>;
    async fn delete_node(&self, ctx: &RequestContext, id: Uuid) -> Result<()>;

    // --- Profile ---
    async fn create_profile(&self, ctx: &RequestContext, profile: Profile) -> Result<()>;
    async fn get_profile(&self, ctx: &RequestContext, id: Uuid) -> Result<Profile>;
    async fn list_profiles(&self, ctx: &RequestContext) -> Result<Vec<Profile>>;
    async fn update_profile(&self, ctx: &RequestContext, profile: Profile) -> Result<()>;
    async fn delete_profile(&self, ctx: &RequestContext, id: Uuid) -> Result<()>;

    // --- Policy ---
    async fn create_policy(&self, ctx: &RequestContext, policy: Policy) -> Result<()>;
    async fn get_policy(&self, ctx: &RequestContext, id: Uuid) -> Result<Policy>;
    async fn list_policies(&self, ctx: &RequestContext) -> Result<Vec<Policy>>;
    async fn update_policy(&self, ctx: &RequestContext, policy: Policy) -> Result<()>;
    async fn delete_policy(&self, ctx: &RequestContext, id: Uuid) -> Result<()>;

    // --- ClusterPolicyBinding ---
    async fn attach_policy(&self, ctx: &RequestContext, binding: ClusterPolicyBinding) -> Result<()>;
    async fn get_binding(&self, ctx: &RequestContext, cluster_id: Uuid, policy_id: Uuid) -> Result<ClusterPolicyBinding>;
    async fn list_bindings(&self, ctx: &RequestContext, cluster_id: Uuid) -> Result<Vec<ClusterPolicyBinding>>;
    async fn update_binding(&self, ctx: &RequestContext, binding: ClusterPolicyBinding) -> Result<()>;
    async fn detach_policy(&self, ctx: &RequestContext, cluster_id: Uuid, policy_id: Uuid) -> Result<()>;
    /// On-demand convenience lookups replacing the source's denormalized
    /// `cluster_name`/`policy_name`/`policy_type` fields (DESIGN.md).
    async fn cluster_policy_cluster_name(&self, ctx: &RequestContext, cluster_id: Uuid) -> Result<String> {
        Ok(self.get_cluster(ctx, cluster_id).await?.name)
    }
    async fn cluster_policy_policy_name(&self, ctx: &RequestContext, policy_id: Uuid) -> Result<String> {
        Ok(self.get_policy(ctx, policy_id).await?.name)
    }
    async fn cluster_policy_policy_type(&self, ctx: &RequestContext, policy_id: Uuid) -> Result<String> {
        Ok(self.get_policy(ctx, policy_id).await?.type_tag)
    }

    // --- Action ---
    async fn create_action(&self, action: Action) -> Result<()>;
    async fn get_action(&self, id: Uuid) -> Result<Action>;
    async fn list_actions_for_target(&self, target_id: Uuid) -> Result<Vec<Action>>;
    /// Declares that `parent` waits on `child`; transitions `child` to
    /// READY automatically if it has no other unmet dependencies (spec
    /// §4.2).
    async fn action_add_dependency(&self, child_id: Uuid, parent_id: Uuid) -> Result<()>;
    async fn action_update(&self, id: Uuid, inputs: Option<Value>, outputs: Option<Value>, data: Option<Value>) -> Result<()>;
    async fn set_action_data_field(&self, id: Uuid, key: &str, value: Value) -> Result<()>;
    /// Validates the spec §4.2 transition table; invalid transitions return
    /// `EngineError::InvalidTransition`, never a silent clip.
    async fn update_action_status(&self, id: Uuid, status: ActionStatus, reason: Option<String>) -> Result<()>;
    /// Shortcut used by runtimes after creating a child with no
    /// dependencies.
    async fn mark_ready(&self, id: Uuid) -> Result<()> {
        self.update_action_status(id, ActionStatus::Ready, None).await
    }
    /// READY actions ordered by (priority desc, creation-time asc); this
    /// reference implementation has no priority field on `Action` so it
    /// orders by creation time only, which is the priority-ties-broken-by-
    /// creation-time degenerate case.
    async fn get_ready(&self) -> Result<Vec<Uuid>>;
    async fn list_dependents(&self, id: Uuid) -> Result<Vec<Uuid>>;
    async fn list_dependencies(&self, id: Uuid) -> Result<Vec<Uuid>>;

    // --- Receiver ---
    async fn create_receiver(&self, ctx: &RequestContext, receiver: Receiver) -> Result<()>;
    async fn get_receiver(&self, ctx: &RequestContext, id: Uuid) -> Result<Receiver>;
    async fn list_receivers(&self, ctx: &RequestContext) -> Result<Vec<Receiver>>;
    async fn delete_receiver(&self, ctx: &RequestContext, id: Uuid) -> Result<()>;

    // --- Credential ---
    async fn get_credential(&self, user: &str, project: &str) -> Result<CredentialBundle>;
    async fn put_credential(&self, user: &str, project: &str, bundle: CredentialBundle) -> Result<()>;

    // --- Event ---
    async fn record_event(&self, event: Event) -> Result<()>;
    async fn list_events(&self, entity_id: Uuid) -> Result<Vec<Event>>;
}

#[derive(Default)]
struct Tables {
    clusters: HashMap<Uuid, Cluster>,
    nodes: HashMap<Uuid, Node>,
    profiles: HashMap<Uuid, Profile>,
    policies: HashMap<Uuid, Policy>,
    bindings: HashMap<(Uuid, Uuid), ClusterPolicyBinding>,
    actions: HashMap<Uuid, Action>,
    receivers: HashMap<Uuid, Receiver>,
    credentials: HashMap<(String, String), CredentialBundle>,
    events: Vec<Event>,
}

/// Reference [`Repository`] implementation backed by in-process tables
/// behind a single `RwLock`. Not multi-tenant-isolating beyond filtering on
/// `ctx.project` for listing calls; sufficient for tests and the
/// `test-support` fixtures, explicitly not the relational driver spec §1
/// scopes out.
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
    next_indices: RwLock<HashMap<Uuid, Arc<AtomicI64>>>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        InMemoryRepository {
            tables: RwLock::new(Tables::default()),
            next_indices: RwLock::new(HashMap::new()),
        }
    }

    async fn recompute_readiness(&self, tables: &mut Tables, child_id: Uuid) {
        if let Some(child) = tables.actions.get(&child_id) {
            if child.status == ActionStatus::Init && child.depends_on.is_empty() {
                if let Some(child) = tables.actions.get_mut(&child_id) {
                    child.status = ActionStatus::Ready;
                    child.updated_at = chrono::Utc::now();
                }
            }
        }
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_cluster(&self, _ctx: &RequestContext, cluster: Cluster) -> Result<()> {
        let mut tables = self.tables.write().await;
        self.next_indices
            .write()
            .await
            .insert(cluster.id, Arc::new(AtomicI64::new(cluster.next_node_index)));
        tables.clusters.insert(cluster.id, cluster);
        Ok(())
    }

    async fn get_cluster(&self, _ctx: &RequestContext, id: Uuid) -> Result<Cluster> {
        self.tables
            .read()
            .await
            .clusters
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("cluster {id}")))
    }

    async fn list_clusters(&self, ctx: &RequestContext) -> Result<Vec<Cluster>> {
        Ok(self
            .tables
            .read()
            .await
            .clusters
            .values()
            .filter(|c| c.owner_project == ctx.project)
            .cloned()
            .collect())
    }

    async fn update_cluster(&self, _ctx: &RequestContext, cluster: Cluster) -> Result<()> {
        cluster.check_invariants()?;
        let mut tables = self.tables.write().await;
        if !tables.clusters.contains_key(&cluster.id) {
            return Err(EngineError::NotFound(format!("cluster {}", cluster.id)));
        }
        tables.clusters.insert(cluster.id, cluster);
        Ok(())
    }

    async fn delete_cluster(&self, _ctx: &RequestContext, id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .clusters
            .remove(&id)
            .ok_or_else(|| EngineError::NotFound(format!("cluster {id}")))?;
        self.next_indices.write().await.remove(&id);
        Ok(())
    }

    async fn cluster_next_index(&self, id: Uuid) -> Result<i64> {
        let counter = {
            let mut indices = self.next_indices.write().await;
            Arc::clone(
                indices
                    .entry(id)
                    .or_insert_with(|| Arc::new(AtomicI64::new(1))),
            )
        };
        let value = counter.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.tables.write().await;
        if let Some(cluster) = tables.clusters.get_mut(&id) {
            cluster.next_node_index = value + 1;
        }
        Ok(value)
    }

    async fn create_node(&self, _ctx: &RequestContext, node: Node) -> Result<()> {
        node.check_invariants()?;
        self.tables.write().await.nodes.insert(node.id, node);
        Ok(())
    }

    async fn get_node(&self, _ctx: &RequestContext, id: Uuid) -> Result<Node> {
        self.tables
            .read()
            .await
            .nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("node {id}")))
    }

    async fn list_nodes(&self, _ctx: &RequestContext) -> Result<Vec<Node>> {
        Ok(self.tables.read().await.nodes.values().cloned().collect())
    }

    async fn list_nodes_in_cluster(&self, _ctx: &RequestContext, cluster_id: Uuid) -> Result<Vec<Node>> {
        Ok(self
            .tables
            .read()
            .await
            .nodes
            .values()
            .filter(|n| n.cluster_id == Some(cluster_id))
            .cloned()
            .collect())
    }

    async fn update_node(&self, _ctx: &RequestContext, node: Node) -> Result<()> {
        node.check_invariants()?;
        let mut tables = self.tables.write().await;
        if !tables.nodes.contains_key(&node.id) {
            return Err(EngineError::NotFound(format!("node {}", node.id)));
        }
        tables.nodes.insert(node.id, node);
        Ok(())
    }

    async fn delete_node(&self, _ctx: &RequestContext, id: Uuid) -> Result<()> {
        self.tables
            .write()
            .await
            .nodes
            .remove(&id)
            .ok_or_else(|| EngineError::NotFound(format!("node {id}")))?;
        Ok(())
    }

    async fn create_profile(&self, _ctx: &RequestContext, profile: Profile) -> Result<()> {
        self.tables.write().await.profiles.insert(profile.id, profile);
        Ok(())
    }

    async fn get_profile(&self, _ctx: &RequestContext, id: Uuid) -> Result<Profile> {
        self.tables
            .read()
            .await
            .profiles
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("profile {id}")))
    }

    async fn list_profiles(&self, _ctx: &RequestContext) -> Result<Vec<Profile>> {
        Ok(self.tables.read().await.profiles.values().cloned().collect())
    }

    async fn update_profile(&self, _ctx: &RequestContext, profile: Profile) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.profiles.contains_key(&profile.id) {
            return Err(EngineError::NotFound(format!("profile {}", profile.id)));
        }
        tables.profiles.insert(profile.id, profile);
        Ok(())
    }

    async fn delete_profile(&self, _ctx: &RequestContext, id: Uuid) -> Result<()> {
        self.tables
            .write()
            .await
            .profiles
            .remove(&id)
            .ok_or_else(|| EngineError::NotFound(format!("profile {id}")))?;
        Ok(())
    }

    async fn create_policy(&self, _ctx: &RequestContext, policy: Policy) -> Result<()> {
        self.tables.write().await.policies.insert(policy.id, policy);
        Ok(())
    }

    async fn get_policy(&self, _ctx: &RequestContext, id: Uuid) -> Result<Policy> {
        self.tables
            .read()
            .await
            .policies
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("policy {id}")))
    }

    async fn list_policies(&self, _ctx: &RequestContext) -> Result<Vec<Policy>> {
        Ok(self.tables.read().await.policies.values().cloned().collect())
    }

    async fn update_policy(&self, _ctx: &RequestContext, policy: Policy) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.policies.contains_key(&policy.id) {
            return Err(EngineError::NotFound(format!("policy {}", policy.id)));
        }
        tables.policies.insert(policy.id, policy);
        Ok(())
    }

    async fn delete_policy(&self, _ctx: &RequestContext, id: Uuid) -> Result<()> {
        self.tables
            .write()
            .await
            .policies
            .remove(&id)
            .ok_or_else(|| EngineError::NotFound(format!("policy {id}")))?;
        Ok(())
    }

    async fn attach_policy(&self, _ctx: &RequestContext, binding: ClusterPolicyBinding) -> Result<()> {
        let mut tables = self.tables.write().await;
        let key = (binding.cluster_id, binding.policy_id);
        if tables.bindings.contains_key(&key) {
            return Err(EngineError::Conflict(format!(
                "policy {} already attached to cluster {}",
                binding.policy_id, binding.cluster_id
            )));
        }
        tables.bindings.insert(key, binding);
        Ok(())
    }

    async fn get_binding(&self, _ctx: &RequestContext, cluster_id: Uuid, policy_id: Uuid) -> Result<ClusterPolicyBinding> {
        self.tables
            .read()
            .await
            .bindings
            .get(&(cluster_id, policy_id))
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("binding {cluster_id}/{policy_id}")))
    }

    async fn list_bindings(&self, _ctx: &RequestContext, cluster_id: Uuid) -> Result<Vec<ClusterPolicyBinding>> {
        Ok(self
            .tables
            .read()
            .await
            .bindings
            .values()
            .filter(|b| b.cluster_id == cluster_id)
            .cloned()
            .collect())
    }

    async fn update_binding(&self, _ctx: &RequestContext, binding: ClusterPolicyBinding) -> Result<()> {
        let mut tables = self.tables.write().await;
        let key = (binding.cluster_id, binding.policy_id);
        if !tables.bindings.contains_key(&key) {
            return Err(EngineError::NotFound(format!("binding {}/{}", key.0, key.1)));
        }
        tables.bindings.insert(key, binding);
        Ok(())
    }

    async fn detach_policy(&self, _ctx: &RequestContext, cluster_id: Uuid, policy_id: Uuid) -> Result<()> {
        self.tables
            .write()
            .await
            .bindings
            .remove(&(cluster_id, policy_id))
            .ok_or_else(|| EngineError::NotFound(format!("binding {cluster_id}/{policy_id}")))?;
        Ok(())
    }

    async fn create_action(&self, action: Action) -> Result<()> {
        let mut tables = self.tables.write().await;
        let id = action.id;
        tables.actions.insert(id, action);
        self.recompute_readiness(&mut tables, id).await;
        Ok(())
    }

    async fn get_action(&self, id: Uuid) -> Result<Action> {
        self.tables
            .read()
            .await
            .actions
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("action {id}")))
    }

    async fn list_actions_for_target(&self, target_id: Uuid) -> Result<Vec<Action>> {
        Ok(self
            .tables
            .read()
            .await
            .actions
            .values()
            .filter(|a| a.target_id == target_id)
            .cloned()
            .collect())
    }

    async fn action_add_dependency(&self, child_id: Uuid, parent_id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        {
            let parent = tables
                .actions
                .get_mut(&parent_id)
                .ok_or_else(|| EngineError::NotFound(format!("action {parent_id}")))?;
            parent.depends_on.insert(child_id);
            if !parent.status.is_terminal() {
                parent.status = ActionStatus::Waiting;
            }
        }
        {
            let child = tables
                .actions
                .get_mut(&child_id)
                .ok_or_else(|| EngineError::NotFound(format!("action {child_id}")))?;
            child.depended_by.insert(parent_id);
        }
        self.recompute_readiness(&mut tables, child_id).await;
        Ok(())
    }

    async fn action_update(&self, id: Uuid, inputs: Option<Value>, outputs: Option<Value>, data: Option<Value>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let action = tables
            .actions
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("action {id}")))?;
        if action.status.is_terminal() {
            return Err(EngineError::InvariantViolation(format!(
                "action {id} outputs are frozen once terminal"
            )));
        }
        if let Some(inputs) = inputs {
            action.inputs = inputs;
        }
        if let Some(outputs) = outputs {
            action.outputs = outputs;
        }
        if let Some(data) = data {
            action.data = data;
        }
        action.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn set_action_data_field(&self, id: Uuid, key: &str, value: Value) -> Result<()> {
        let mut tables = self.tables.write().await;
        let action = tables
            .actions
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("action {id}")))?;
        if !action.data.is_object() {
            action.data = Value::Object(Default::default());
        }
        action.data.as_object_mut().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn update_action_status(&self, id: Uuid, status: ActionStatus, reason: Option<String>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let parents_to_check: Vec<Uuid>;
        {
            let action = tables
                .actions
                .get_mut(&id)
                .ok_or_else(|| EngineError::NotFound(format!("action {id}")))?;
            if action.status == status {
                return Ok(());
            }
            if !action.status.can_transition_to(status) {
                return Err(EngineError::InvalidTransition {
                    action: id,
                    from: action.status,
                    to: status,
                });
            }
            action.status = status;
            if reason.is_some() {
                action.result_reason = reason;
            }
            action.updated_at = chrono::Utc::now();
            parents_to_check = action.depended_by.iter().copied().collect();
        }

        // A WAITING parent is woken (promoted back to READY, never pushed
        // straight to a terminal status) as soon as either all of its
        // dependencies have succeeded, or any one of them has not — the
        // parent's own executor is what decides how to finalize a failed or
        // cancelled dependency (spec §4.3: the worker that spawned the
        // children is also the one that must release their cluster lock and
        // commit cluster status, so it has to run again rather than have the
        // repository short-circuit it to FAILED directly).
        if matches!(status, ActionStatus::Succeeded | ActionStatus::Failed | ActionStatus::Cancelled) {
            for parent_id in parents_to_check {
                let deps_and_status = tables
                    .actions
                    .get(&parent_id)
                    .map(|p| (p.depends_on.clone(), p.status));
                let Some((deps, parent_status)) = deps_and_status else {
                    continue;
                };
                if parent_status != ActionStatus::Waiting {
                    continue;
                }
                let any_unsuccessful = deps.iter().any(|dep| {
                    tables
                        .actions
                        .get(dep)
                        .map(|a| matches!(a.status, ActionStatus::Failed | ActionStatus::Cancelled))
                        .unwrap_or(false)
                });
                let all_done = deps
                    .iter()
                    .all(|dep| tables.actions.get(dep).map(|a| a.status.is_terminal_success()).unwrap_or(false));
                if any_unsuccessful || all_done {
                    if let Some(parent) = tables.actions.get_mut(&parent_id) {
                        parent.status = ActionStatus::Ready;
                        parent.updated_at = chrono::Utc::now();
                    }
                }
            }
        }
        Ok(())
    }

    async fn get_ready(&self) -> Result<Vec<Uuid>> {
        let tables = self.tables.read().await;
        let mut ready: Vec<&Action> = tables
            .actions
            .values()
            .filter(|a| a.status == ActionStatus::Ready)
            .collect();
        ready.sort_by_key(|a| a.created_at);
        Ok(ready.into_iter().map(|a| a.id).collect())
    }

    async fn list_dependents(&self, id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .tables
            .read()
            .await
            .actions
            .get(&id)
            .map(|a| a.depended_by.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn list_dependencies(&self, id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .tables
            .read()
            .await
            .actions
            .get(&id)
            .map(|a| a.depends_on.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn create_receiver(&self, _ctx: &RequestContext, receiver: Receiver) -> Result<()> {
        self.tables.write().await.receivers.insert(receiver.id, receiver);
        Ok(())
    }

    async fn get_receiver(&self, _ctx: &RequestContext, id: Uuid) -> Result<Receiver> {
        self.tables
            .read()
            .await
            .receivers
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("receiver {id}")))
    }

    async fn list_receivers(&self, ctx: &RequestContext) -> Result<Vec<Receiver>> {
        Ok(self
            .tables
            .read()
            .await
            .receivers
            .values()
            .filter(|r| r.project == ctx.project)
            .cloned()
            .collect())
    }

    async fn delete_receiver(&self, _ctx: &RequestContext, id: Uuid) -> Result<()> {
        self.tables
            .write()
            .await
            .receivers
            .remove(&id)
            .ok_or_else(|| EngineError::NotFound(format!("receiver {id}")))?;
        Ok(())
    }

    async fn get_credential(&self, user: &str, project: &str) -> Result<CredentialBundle> {
        self.tables
            .read()
            .await
            .credentials
            .get(&(user.to_string(), project.to_string()))
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("credential {user}/{project}")))
    }

    async fn put_credential(&self, user: &str, project: &str, bundle: CredentialBundle) -> Result<()> {
        self.tables
            .write()
            .await
            .credentials
            .insert((user.to_string(), project.to_string()), bundle);
        Ok(())
    }

    async fn record_event(&self, event: Event) -> Result<()> {
        self.tables.write().await.events.push(event);
        Ok(())
    }

    async fn list_events(&self, entity_id: Uuid) -> Result<Vec<Event>> {
        Ok(self
            .tables
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .cloned()
            .collect())
    }
}
