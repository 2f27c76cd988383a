//! Policy Engine (C6, spec §4.6): a pluggable pre/post check pipeline that
//! inspects pending actions, annotates them with decisions, and can veto.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{Action, Cluster, Phase, RequestContext};
use crate::error::Result;
use crate::repository::Repository;

/// Capability set a concrete policy may implement (spec §9: tagged
/// variants, not class inheritance). Default implementations are
/// "not applicable" no-ops so a policy need only override what it uses.
#[async_trait]
pub trait PolicyKind: Send + Sync {
    fn type_tag(&self) -> &str;

    async fn attach(&self, _ctx: &RequestContext, _cluster: &Cluster, _policy_spec: &Value, _binding_data: &mut Value) -> Result<()> {
        Ok(())
    }

    async fn detach(&self, _ctx: &RequestContext, _cluster: &Cluster, _policy_spec: &Value, _binding_data: &Value) -> Result<()> {
        Ok(())
    }

    async fn pre_op(&self, _ctx: &RequestContext, _cluster_id: Uuid, _action: &mut Action, _policy_spec: &Value, _binding_data: &Value) -> Result<()> {
        Ok(())
    }

    async fn post_op(&self, _ctx: &RequestContext, _cluster_id: Uuid, _action: &mut Action, _policy_spec: &Value, _binding_data: &mut Value) -> Result<()> {
        Ok(())
    }

    async fn validate(&self, _spec: &Value) -> Result<()> {
        Ok(())
    }
}

/// Recognized decision keys under `action.data` (spec §4.6), so callers
/// don't have to remember the string literals.
pub mod decision_keys {
    pub const STATUS: &str = "status";
    pub const REASON: &str = "reason";
    pub const CREATION_COUNT: &str = "creation.count";
    pub const CREATION_PLACEMENTS: &str = "creation.placements";
    pub const DELETION_COUNT: &str = "deletion.count";
    pub const DELETION_CANDIDATES: &str = "deletion.candidates";
    pub const DELETION_GRACE_PERIOD: &str = "deletion.grace_period";
    pub const DELETION_DESTROY_AFTER_DELETION: &str = "deletion.destroy_after_deletion";

    pub const CHECK_OK: &str = "CHECK_OK";
    pub const CHECK_ERROR: &str = "CHECK_ERROR";
}

/// The outcome of evaluating every attached binding at a given checkpoint.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub vetoed: bool,
    pub reason: String,
}

pub struct PolicyEngine<R: Repository> {
    repo: Arc<R>,
    kinds: Vec<Arc<dyn PolicyKind>>,
}

impl<R: Repository> PolicyEngine<R> {
    pub fn new(repo: Arc<R>) -> Self {
        PolicyEngine {
            repo,
            kinds: Vec::new(),
        }
    }

    /// Registers a concrete policy kind, keyed by its own `type_tag()`
    /// (spec §9's process-wide registry keyed by `(type, version)`,
    /// simplified here to `type` since this crate ships one version per
    /// kind).
    pub fn register(&mut self, kind: Arc<dyn PolicyKind>) {
        self.kinds.push(kind);
    }

    fn kind_for(&self, type_tag: &str) -> Option<Arc<dyn PolicyKind>> {
        self.kinds.iter().find(|k| k.type_tag() == type_tag).cloned()
    }

    /// Evaluates every enabled, non-cooling-down binding attached to
    /// `cluster_id` whose policy targets `(phase, action.action_name)`, in
    /// priority-descending order (ties by attach time). The first
    /// `CHECK_ERROR` short-circuits the remaining bindings.
    pub async fn evaluate(
        &self,
        ctx: &RequestContext,
        cluster_id: Uuid,
        phase: Phase,
        action: &mut Action,
    ) -> Result<EvaluationOutcome> {
        let mut bindings = self.repo.list_bindings(ctx, cluster_id).await?;
        bindings.retain(|b| b.enabled);
        bindings.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.attached_at.cmp(&b.attached_at)));

        let now = chrono::Utc::now();
        for binding in bindings {
            if binding.is_cooling_down(now) {
                debug!(policy_id = %binding.policy_id, "binding cooling down, skipped");
                continue;
            }
            let policy = self.repo.get_policy(ctx, binding.policy_id).await?;
            if !policy.targets_hook(phase, &action.action_name) {
                continue;
            }
            let Some(kind) = self.kind_for(&policy.type_tag) else {
                continue;
            };

            let mut binding_data = binding.data.clone();
            let hook_result = match phase {
                Phase::Before => kind.pre_op(ctx, cluster_id, action, &policy.spec, &binding_data).await,
                Phase::After => kind.post_op(ctx, cluster_id, action, &policy.spec, &mut binding_data).await,
            };

            let mut updated = binding.clone();
            updated.data = binding_data;

            let veto_reason = match hook_result {
                Ok(()) => None,
                Err(e) => {
                    warn!(policy_id = %binding.policy_id, error = %e, "policy hook errored, treated as CHECK_ERROR");
                    Some(e.to_string())
                }
            };

            let status = action
                .data
                .get(decision_keys::STATUS)
                .and_then(|v| v.as_str())
                .unwrap_or(decision_keys::CHECK_OK)
                .to_string();

            if veto_reason.is_none() && status != decision_keys::CHECK_ERROR {
                updated.mark_fired(now);
            }
            self.repo.update_binding(ctx, updated).await?;

            if let Some(reason) = veto_reason {
                return Ok(EvaluationOutcome { vetoed: true, reason });
            }
            if status == decision_keys::CHECK_ERROR {
                let reason = action
                    .data
                    .get(decision_keys::REASON)
                    .and_then(|v| v.as_str())
                    .unwrap_or("policy check failure")
                    .to_string();
                return Ok(EvaluationOutcome { vetoed: true, reason });
            }
        }

        Ok(EvaluationOutcome {
            vetoed: false,
            reason: String::new(),
        })
    }

    pub async fn attach(&self, ctx: &RequestContext, cluster: &Cluster, policy_id: Uuid, binding_data: &mut Value) -> Result<()> {
        let policy = self.repo.get_policy(ctx, policy_id).await?;
        if let Some(kind) = self.kind_for(&policy.type_tag) {
            kind.attach(ctx, cluster, &policy.spec, binding_data).await?;
        }
        Ok(())
    }

    pub async fn detach(&self, ctx: &RequestContext, cluster: &Cluster, policy_id: Uuid, binding_data: &Value) -> Result<()> {
        let policy = self.repo.get_policy(ctx, policy_id).await?;
        if let Some(kind) = self.kind_for(&policy.type_tag) {
            kind.detach(ctx, cluster, &policy.spec, binding_data).await?;
        }
        Ok(())
    }
}
