//! Policy Engine scenarios (spec.md §4.6, §8 "Policy veto on BEFORE").
//!
//! These drive `PolicyEngine` directly rather than through `Engine`, since a
//! test-only `PolicyKind` can only be registered before the engine's
//! `PolicyEngine` is wrapped in the `Arc` the facade hands out.

#![cfg(feature = "test-support")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use senlin_core::testing::{ClusterFixture, InMemoryRepository, PolicyFixture};
use senlin_core::{Action, Phase, PolicyEngine, PolicyKind, PolicyTarget, Repository, RequestContext};
use uuid::Uuid;

fn ctx() -> RequestContext {
    RequestContext::new("alice", "proj-1", "default").with_admin(true)
}

/// Always vetoes with a fixed reason and counts its own invocations, so tests
/// can also assert priority ordering / short-circuiting.
struct VetoPolicy {
    tag: &'static str,
    reason: &'static str,
    calls: AtomicUsize,
}

impl VetoPolicy {
    fn new(tag: &'static str, reason: &'static str) -> Self {
        VetoPolicy { tag, reason, calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl PolicyKind for VetoPolicy {
    fn type_tag(&self) -> &str {
        self.tag
    }

    async fn pre_op(
        &self,
        _ctx: &RequestContext,
        _cluster_id: Uuid,
        action: &mut Action,
        _policy_spec: &Value,
        _binding_data: &Value,
    ) -> senlin_core::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        action.data = serde_json::json!({ "status": "CHECK_ERROR", "reason": self.reason });
        Ok(())
    }
}

/// Never vetoes; used to confirm evaluation order stops at the first veto
/// and never reaches a lower-priority binding.
struct AllowPolicy {
    calls: AtomicUsize,
}

#[async_trait]
impl PolicyKind for AllowPolicy {
    fn type_tag(&self) -> &str {
        "test.policy.allow"
    }

    async fn pre_op(
        &self,
        _ctx: &RequestContext,
        _cluster_id: Uuid,
        _action: &mut Action,
        _policy_spec: &Value,
        _binding_data: &Value,
    ) -> senlin_core::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn policy_veto_on_before() {
    let repo = Arc::new(InMemoryRepository::new());
    let ctx = ctx();

    let profile_id = Uuid::new_v4();
    let cluster = ClusterFixture::new("guarded", profile_id).desired_capacity(1).min_size(0).max_size(-1).owner(ctx.clone()).build().unwrap();
    let cluster_id = cluster.id;
    repo.create_cluster(&ctx, cluster).await.unwrap();

    let policy = PolicyFixture::new("cooldown-guard", "test.policy.veto")
        .targets(vec![PolicyTarget { phase: Phase::Before, action_name: "CLUSTER_SCALE_OUT".into() }])
        .build();
    let policy_id = policy.id;
    repo.create_policy(&ctx, policy).await.unwrap();

    let binding = senlin_core::ClusterPolicyBinding::new(cluster_id, policy_id);
    repo.attach_policy(&ctx, binding).await.unwrap();

    let mut engine = PolicyEngine::new(Arc::clone(&repo));
    engine.register(Arc::new(VetoPolicy::new("test.policy.veto", "cooldown active")));

    let mut action = Action::new(cluster_id, "CLUSTER_SCALE_OUT", ctx.user.clone());
    let outcome = engine.evaluate(&ctx, cluster_id, Phase::Before, &mut action).await.unwrap();

    assert!(outcome.vetoed);
    assert_eq!(outcome.reason, "cooldown active");

    // The binding must not be marked as having fired: a veto is not a
    // successful check (spec §4.6).
    let binding = repo.get_binding(&ctx, cluster_id, policy_id).await.unwrap();
    assert!(binding.last_fired_at.is_none());
}

#[tokio::test]
async fn higher_priority_veto_short_circuits_lower_priority_binding() {
    let repo = Arc::new(InMemoryRepository::new());
    let ctx = ctx();

    let profile_id = Uuid::new_v4();
    let cluster = ClusterFixture::new("guarded2", profile_id).desired_capacity(1).min_size(0).max_size(-1).owner(ctx.clone()).build().unwrap();
    let cluster_id = cluster.id;
    repo.create_cluster(&ctx, cluster).await.unwrap();

    let target = vec![PolicyTarget { phase: Phase::Before, action_name: "CLUSTER_SCALE_OUT".into() }];

    let high_policy = PolicyFixture::new("high", "test.policy.veto").targets(target.clone()).build();
    let low_policy = PolicyFixture::new("low", "test.policy.allow").targets(target).build();
    repo.create_policy(&ctx, high_policy.clone()).await.unwrap();
    repo.create_policy(&ctx, low_policy.clone()).await.unwrap();

    let mut high_binding = senlin_core::ClusterPolicyBinding::new(cluster_id, high_policy.id);
    high_binding.priority = 80;
    let mut low_binding = senlin_core::ClusterPolicyBinding::new(cluster_id, low_policy.id);
    low_binding.priority = 20;
    repo.attach_policy(&ctx, low_binding).await.unwrap();
    repo.attach_policy(&ctx, high_binding).await.unwrap();

    let mut engine = PolicyEngine::new(Arc::clone(&repo));
    let veto = Arc::new(VetoPolicy::new("test.policy.veto", "blocked"));
    let allow = Arc::new(AllowPolicy { calls: AtomicUsize::new(0) });
    engine.register(Arc::clone(&veto) as Arc<dyn PolicyKind>);
    engine.register(Arc::clone(&allow) as Arc<dyn PolicyKind>);

    let mut action = Action::new(cluster_id, "CLUSTER_SCALE_OUT", ctx.user.clone());
    let outcome = engine.evaluate(&ctx, cluster_id, Phase::Before, &mut action).await.unwrap();

    assert!(outcome.vetoed);
    assert_eq!(veto.calls.load(Ordering::SeqCst), 1);
    assert_eq!(allow.calls.load(Ordering::SeqCst), 0, "lower-priority binding must not run once a higher-priority one vetoes");
}
