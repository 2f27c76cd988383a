//! `Engine`: the single facade every caller constructs from (spec §6's
//! intent surface), wiring together the repository, infrastructure driver,
//! lock manager, policy engine, and scheduler. One async method per listed
//! intent; each returns the id of the (possibly child) `Action` created so
//! the caller can poll it for progress, matching spec §4.2/§4.3.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::cluster_runtime::ClusterRuntime;
use crate::config::EngineConfig;
use crate::domain::{Action, ActionStatus, Cluster, Node, RequestContext};
use crate::driver::InfrastructureDriver;
use crate::error::{EngineError, Result};
use crate::lock::{LockManager, LockScope};
use crate::node_runtime::NodeRuntime;
use crate::policies::{DeletionPolicy, LbMemberPolicy};
use crate::policy_engine::PolicyEngine;
use crate::repository::Repository;
use crate::scheduler::{ActionExecutor, Dispatcher, ResultCode, Scheduler};

/// Routes an action to whichever runtime owns its `action_name` namespace.
/// `ClusterRuntime` and `NodeRuntime` are deliberately unaware of each other
/// (spec §4.4/§4.5 describe them as separate components); this is the only
/// place that needs to know both exist.
struct EngineExecutor<R: Repository, D: InfrastructureDriver> {
    repo: Arc<R>,
    node_runtime: Arc<NodeRuntime<R, D>>,
    node_lock: Arc<LockManager<R>>,
    cluster_runtime: Arc<ClusterRuntime<R>>,
}

impl<R: Repository, D: InfrastructureDriver> EngineExecutor<R, D> {
    /// Top-level intents stash the caller's `RequestContext` under
    /// `action.data["ctx"]` (see `Engine::spawn_root`); children fanned out
    /// by `ClusterRuntime` carry none, so we fall back to deriving one from
    /// the node's owning cluster, the same way `ClusterRuntime::system_ctx`
    /// does for cluster actions.
    async fn resolve_ctx(&self, action: &Action, node: &Node) -> Result<RequestContext> {
        if let Some(raw) = action.data.get("ctx") {
            if let Ok(ctx) = serde_json::from_value::<RequestContext>(raw.clone()) {
                return Ok(ctx);
            }
        }
        let cluster_id = node.cluster_id.or_else(|| {
            action
                .inputs
                .get("cluster_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
        });
        if let Some(cluster_id) = cluster_id {
            let probe = RequestContext::new("system", "system", "system").with_admin(true);
            let cluster = self.repo.get_cluster(&probe, cluster_id).await?;
            return Ok(RequestContext::new(cluster.owner_user, cluster.owner_project, cluster.owner_domain).with_admin(true));
        }
        Ok(RequestContext::new("system", "system", "system").with_admin(true))
    }

    async fn execute_node(&self, action_id: Uuid, cancel: CancellationToken) -> Result<ResultCode> {
        let action = self.repo.get_action(action_id).await?;
        let node_id = action.target_id;
        let node = self.repo.get_node(&RequestContext::new("system", "system", "system").with_admin(true), node_id).await?;
        let ctx = self.resolve_ctx(&action, &node).await?;

        self.node_lock.acquire(node_id, LockScope::Node, action_id, false).await?;
        let result = self.dispatch_node(&ctx, &action, &cancel).await;
        self.node_lock.release(node_id, LockScope::Node, action_id).await?;
        result
    }

    async fn dispatch_node(&self, ctx: &RequestContext, action: &Action, cancel: &CancellationToken) -> Result<ResultCode> {
        let node_id = action.target_id;
        match action.action_name.as_str() {
            "NODE_CREATE" => self.node_runtime.node_create(ctx, node_id, cancel).await,
            "NODE_DELETE" => self.node_runtime.node_delete(ctx, node_id, cancel).await,
            "NODE_UPDATE" => {
                let profile_id = parse_uuid_field(&action.inputs, "profile_id")?;
                self.node_runtime.node_update(ctx, node_id, profile_id, cancel).await
            }
            "NODE_JOIN" => {
                let cluster_id = parse_uuid_field(&action.inputs, "cluster_id")?;
                let user_initiated = action.inputs.get("user_initiated").and_then(|v| v.as_bool()).unwrap_or(false);
                self.node_runtime.node_join(ctx, node_id, cluster_id, user_initiated).await
            }
            "NODE_LEAVE" => self.node_runtime.node_leave(ctx, node_id).await,
            other => Err(EngineError::Validation(format!("unknown node action {other}"))),
        }
    }
}

fn parse_uuid_field(value: &Value, field: &str) -> Result<Uuid> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| EngineError::Validation(format!("missing or invalid inputs.{field}")))
}

#[async_trait]
impl<R: Repository, D: InfrastructureDriver> ActionExecutor for EngineExecutor<R, D> {
    async fn execute(&self, action_id: Uuid, cancel: CancellationToken) -> Result<ResultCode> {
        let action = self.repo.get_action(action_id).await?;
        if action.action_name.starts_with("NODE_") {
            self.execute_node(action_id, cancel).await
        } else {
            self.cluster_runtime.execute(action_id, cancel).await
        }
    }
}

/// Request parameters for `cluster_resize` (spec §4.5 CLUSTER_RESIZE),
/// built the way the teacher builds its multi-field request bodies (see
/// `CreateDatabaseRequest` in `bdb.rs`): everything but `strict` optional,
/// `None` fields left out of the serialized inputs entirely.
#[derive(Debug, Clone, Serialize, TypedBuilder)]
pub struct ResizeParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option))]
    pub desired_capacity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option))]
    pub adjustment: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option))]
    pub adjustment_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option))]
    pub min_step: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option))]
    pub min_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option))]
    pub max_size: Option<i64>,
    #[builder(default)]
    pub strict: bool,
}

/// Construction knobs for [`Engine::new`]: the two collaborators the spec
/// treats as external (spec §1, §6).
pub struct EngineDeps<R: Repository, D: InfrastructureDriver> {
    pub repo: Arc<R>,
    pub driver: Arc<D>,
}

/// The facade. One per running process; holds every coordinator the Action
/// Engine needs and exposes an async method per spec §6 intent.
pub struct Engine<R: Repository + 'static, D: InfrastructureDriver + 'static> {
    repo: Arc<R>,
    lock: Arc<LockManager<R>>,
    policy_engine: Arc<PolicyEngine<R>>,
    scheduler: Arc<Scheduler<R>>,
    dispatcher: Dispatcher,
    config: EngineConfig,
    _driver: std::marker::PhantomData<D>,
}

impl<R: Repository + 'static, D: InfrastructureDriver + 'static> Engine<R, D> {
    /// Wires every collaborator together per the defaults in `config`, then
    /// registers the policy kinds this crate ships (`senlin.policy.loadbalance`,
    /// `senlin.policy.deletion`). The caller is responsible for running
    /// [`Engine::run`] in its own task to drive the scheduler's worker pool.
    pub fn new(deps: EngineDeps<R, D>, config: EngineConfig) -> Self {
        let EngineDeps { repo, driver } = deps;
        let lock = Arc::new(LockManager::new(Arc::clone(&repo)));

        let mut policy_engine = PolicyEngine::new(Arc::clone(&repo));
        policy_engine.register(Arc::new(LbMemberPolicy::new(Arc::clone(&repo), Arc::clone(&driver))));
        policy_engine.register(Arc::new(DeletionPolicy::new(Arc::clone(&repo))));
        let policy_engine = Arc::new(policy_engine);

        let node_runtime = Arc::new(NodeRuntime::new(Arc::clone(&repo), Arc::clone(&driver)));

        // `ClusterRuntime` needs a `Dispatcher` to fan out children, but the
        // `Scheduler` that owns the receiving half isn't built until the
        // executor (which needs `ClusterRuntime`) exists. Mint the channel
        // up front and wire both halves through `Scheduler::with_dispatcher`.
        let (dispatcher, dispatch_rx) = Dispatcher::channel();

        let cluster_runtime = Arc::new(ClusterRuntime::new(
            Arc::clone(&repo),
            Arc::clone(&lock),
            Arc::clone(&policy_engine),
            dispatcher.clone(),
        ));

        let executor: Arc<dyn ActionExecutor> = Arc::new(EngineExecutor {
            repo: Arc::clone(&repo),
            node_runtime,
            node_lock: Arc::clone(&lock),
            cluster_runtime,
        });
        let scheduler = Arc::new(Scheduler::with_dispatcher(
            Arc::clone(&repo),
            executor,
            config.to_scheduler_config(),
            dispatcher.clone(),
            dispatch_rx,
        ));

        Engine {
            repo,
            lock,
            policy_engine,
            scheduler,
            dispatcher,
            config,
            _driver: std::marker::PhantomData,
        }
    }

    /// Runs the scheduler's worker pool until `shutdown` fires. Intended to
    /// be spawned as its own task alongside intent calls.
    pub async fn run(&self, shutdown: CancellationToken) {
        Arc::clone(&self.scheduler).run(shutdown).await;
    }

    pub async fn cancel_action(&self, action_id: Uuid) {
        self.scheduler.cancel(action_id).await
    }

    pub fn lock_manager(&self) -> &Arc<LockManager<R>> {
        &self.lock
    }

    pub fn policy_engine(&self) -> &Arc<PolicyEngine<R>> {
        &self.policy_engine
    }

    async fn spawn_root(&self, ctx: &RequestContext, target_id: Uuid, action_name: &str, inputs: Value, cause: impl Into<String>) -> Result<Uuid> {
        self.spawn_root_with_data(ctx, target_id, action_name, inputs, json!({}), cause).await
    }

    /// Like `spawn_root` but merges `extra_data` (policy decision keys such
    /// as `deletion.grace_period`) alongside the stashed `RequestContext`
    /// into `action.data`.
    async fn spawn_root_with_data(
        &self,
        ctx: &RequestContext,
        target_id: Uuid,
        action_name: &str,
        inputs: Value,
        mut extra_data: Value,
        cause: impl Into<String>,
    ) -> Result<Uuid> {
        let mut action = Action::new(target_id, action_name, cause);
        action.inputs = inputs;
        action.timeout = self.config.default_action_timeout;
        if let Some(obj) = extra_data.as_object_mut() {
            obj.insert("ctx".into(), serde_json::to_value(ctx)?);
        }
        action.data = extra_data;
        let action_id = action.id;
        self.repo.create_action(action).await?;
        self.repo.mark_ready(action_id).await?;
        self.dispatcher.start(action_id);
        Ok(action_id)
    }

    // --- CLUSTER_* intents ---

    #[instrument(skip(self, ctx))]
    pub async fn cluster_create(
        &self,
        ctx: &RequestContext,
        name: impl Into<String> + std::fmt::Debug,
        profile_id: Uuid,
        desired_capacity: i64,
        min_size: i64,
        max_size: i64,
    ) -> Result<Uuid> {
        let cluster = Cluster::new(name, profile_id, desired_capacity, min_size, max_size, ctx.user.clone(), ctx.project.clone(), ctx.domain.clone())?;
        let cluster_id = cluster.id;
        self.repo.create_cluster(ctx, cluster).await?;
        self.spawn_root(ctx, cluster_id, "CLUSTER_CREATE", Value::Null, ctx.user.clone()).await
    }

    pub async fn cluster_delete(&self, ctx: &RequestContext, cluster_id: Uuid) -> Result<Uuid> {
        self.spawn_root(ctx, cluster_id, "CLUSTER_DELETE", Value::Null, ctx.user.clone()).await
    }

    pub async fn cluster_update(&self, ctx: &RequestContext, cluster_id: Uuid, profile_id: Uuid) -> Result<Uuid> {
        let inputs = json!({ "profile_id": profile_id });
        self.spawn_root(ctx, cluster_id, "CLUSTER_UPDATE", inputs, ctx.user.clone()).await
    }

    pub async fn cluster_add_nodes(&self, ctx: &RequestContext, cluster_id: Uuid, node_ids: &[Uuid]) -> Result<Uuid> {
        let inputs = json!({ "node_ids": node_ids });
        self.spawn_root(ctx, cluster_id, "CLUSTER_ADD_NODES", inputs, ctx.user.clone()).await
    }

    pub async fn cluster_del_nodes(&self, ctx: &RequestContext, cluster_id: Uuid, node_ids: &[Uuid], grace_period: Option<Duration>) -> Result<Uuid> {
        let inputs = json!({ "node_ids": node_ids });
        let extra_data = json!({ "deletion.grace_period": grace_period.map(|d| d.as_secs()) });
        self.spawn_root_with_data(ctx, cluster_id, "CLUSTER_DEL_NODES", inputs, extra_data, ctx.user.clone()).await
    }

    pub async fn cluster_resize(&self, ctx: &RequestContext, cluster_id: Uuid, params: ResizeParams) -> Result<Uuid> {
        let inputs = serde_json::to_value(&params)?;
        self.spawn_root(ctx, cluster_id, "CLUSTER_RESIZE", inputs, ctx.user.clone()).await
    }

    pub async fn cluster_scale_out(&self, ctx: &RequestContext, cluster_id: Uuid, count: i64) -> Result<Uuid> {
        let inputs = json!({ "count": count });
        self.spawn_root(ctx, cluster_id, "CLUSTER_SCALE_OUT", inputs, ctx.user.clone()).await
    }

    pub async fn cluster_scale_in(&self, ctx: &RequestContext, cluster_id: Uuid, count: i64) -> Result<Uuid> {
        let inputs = json!({ "count": count });
        self.spawn_root(ctx, cluster_id, "CLUSTER_SCALE_IN", inputs, ctx.user.clone()).await
    }

    pub async fn cluster_attach_policy(&self, ctx: &RequestContext, cluster_id: Uuid, policy_id: Uuid, priority: Option<u8>, cooldown: Option<Duration>) -> Result<Uuid> {
        let inputs = json!({ "policy_id": policy_id, "priority": priority, "cooldown": cooldown.map(|d| d.as_secs()) });
        self.spawn_root(ctx, cluster_id, "CLUSTER_ATTACH_POLICY", inputs, ctx.user.clone()).await
    }

    pub async fn cluster_detach_policy(&self, ctx: &RequestContext, cluster_id: Uuid, policy_id: Uuid) -> Result<Uuid> {
        let inputs = json!({ "policy_id": policy_id });
        self.spawn_root(ctx, cluster_id, "CLUSTER_DETACH_POLICY", inputs, ctx.user.clone()).await
    }

    pub async fn cluster_update_policy(
        &self,
        ctx: &RequestContext,
        cluster_id: Uuid,
        policy_id: Uuid,
        priority: Option<u8>,
        level: Option<u8>,
        cooldown: Option<Duration>,
        enabled: Option<bool>,
    ) -> Result<Uuid> {
        let inputs = json!({
            "policy_id": policy_id,
            "priority": priority,
            "level": level,
            "cooldown": cooldown.map(|d| d.as_secs()),
            "enabled": enabled,
        });
        self.spawn_root(ctx, cluster_id, "CLUSTER_UPDATE_POLICY", inputs, ctx.user.clone()).await
    }

    // --- NODE_* intents (standalone; spec §6 lists `node_join` directly) ---

    pub async fn node_create(&self, ctx: &RequestContext, name: impl Into<String>, profile_id: Uuid) -> Result<Uuid> {
        let node = Node::new_orphan(name, profile_id, "member");
        let node_id = node.id;
        self.repo.create_node(ctx, node).await?;
        self.spawn_root(ctx, node_id, "NODE_CREATE", Value::Null, ctx.user.clone()).await
    }

    pub async fn node_delete(&self, ctx: &RequestContext, node_id: Uuid) -> Result<Uuid> {
        self.spawn_root(ctx, node_id, "NODE_DELETE", Value::Null, ctx.user.clone()).await
    }

    pub async fn node_update(&self, ctx: &RequestContext, node_id: Uuid, profile_id: Uuid) -> Result<Uuid> {
        let inputs = json!({ "profile_id": profile_id });
        self.spawn_root(ctx, node_id, "NODE_UPDATE", inputs, ctx.user.clone()).await
    }

    pub async fn node_join(&self, ctx: &RequestContext, node_id: Uuid, cluster_id: Uuid) -> Result<Uuid> {
        let inputs = json!({ "cluster_id": cluster_id, "user_initiated": true });
        self.spawn_root(ctx, node_id, "NODE_JOIN", inputs, ctx.user.clone()).await
    }

    pub async fn node_leave(&self, ctx: &RequestContext, node_id: Uuid) -> Result<Uuid> {
        self.spawn_root(ctx, node_id, "NODE_LEAVE", Value::Null, ctx.user.clone()).await
    }

    /// Current status of any action, for polling (spec §6: "the caller polls
    /// actions for progress").
    pub async fn action_status(&self, action_id: Uuid) -> Result<ActionStatus> {
        Ok(self.repo.get_action(action_id).await?.status)
    }
}
