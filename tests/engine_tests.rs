//! End-to-end scenarios (spec.md §8) driven through the public `Engine`
//! facade against `InMemoryRepository` + `FakeInfrastructureDriver`.

#![cfg(feature = "test-support")]

use std::sync::Arc;
use std::time::Duration;

use senlin_core::testing::FakeInfrastructureDriver;
use senlin_core::{ActionStatus, Engine, EngineConfig, EngineDeps, InMemoryRepository, Repository, RequestContext, ResizeParams};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn ctx() -> RequestContext {
    RequestContext::new("alice", "proj-1", "default").with_admin(true)
}

struct Harness {
    engine: Arc<Engine<InMemoryRepository, FakeInfrastructureDriver>>,
    repo: Arc<InMemoryRepository>,
    driver: Arc<FakeInfrastructureDriver>,
    shutdown: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let driver = Arc::new(FakeInfrastructureDriver::new());
        let engine = Arc::new(Engine::new(
            EngineDeps { repo: Arc::clone(&repo), driver: Arc::clone(&driver) },
            EngineConfig::default(),
        ));
        let shutdown = CancellationToken::new();
        tokio::spawn({
            let engine = Arc::clone(&engine);
            let shutdown = shutdown.clone();
            async move { engine.run(shutdown).await }
        });
        Harness { engine, repo, driver, shutdown }
    }

    async fn wait_terminal(&self, action_id: Uuid) -> ActionStatus {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let status = self.engine.action_status(action_id).await.unwrap();
            if status.is_terminal() {
                return status;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("action {action_id} did not reach a terminal status in time (stuck at {status:?})");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn create_profile(repo: &InMemoryRepository, ctx: &RequestContext) -> Uuid {
    let profile = senlin_core::testing::ProfileFixture::new("web-profile", "senlin.profile.test").build();
    let id = profile.id;
    repo.create_profile(ctx, profile).await.unwrap();
    id
}

// Clusters are driven into existence through the engine entry points rather
// than seeded directly into the repository, since only `Engine::cluster_create`
// spawns the CLUSTER_CREATE action that actually provisions nodes through the
// driver.

#[tokio::test]
async fn create_empty_then_grow() {
    let h = Harness::new();
    let ctx = ctx();
    let profile_id = create_profile(&h.repo, &ctx).await;

    let create_action = h.engine.cluster_create(&ctx, "empty", profile_id, 0, 0, -1).await.unwrap();
    assert_eq!(h.wait_terminal(create_action).await, ActionStatus::Succeeded);

    let clusters = h.repo.list_clusters(&ctx).await.unwrap();
    let cluster = clusters.into_iter().find(|c| c.name == "empty").unwrap();
    assert_eq!(cluster.desired_capacity, 0);
    assert!(h.repo.list_nodes_in_cluster(&ctx, cluster.id).await.unwrap().is_empty());

    let grow_action = h.engine.cluster_scale_out(&ctx, cluster.id, 2).await.unwrap();
    assert_eq!(h.wait_terminal(grow_action).await, ActionStatus::Succeeded);

    let cluster = h.repo.get_cluster(&ctx, cluster.id).await.unwrap();
    assert_eq!(cluster.desired_capacity, 2);
    let nodes = h.repo.list_nodes_in_cluster(&ctx, cluster.id).await.unwrap();
    assert_eq!(nodes.len(), 2);
    // Node indices are assigned by `cluster_next_index` and must not collide
    // or have been clobbered back to a stale counter value.
    let mut indices: Vec<i64> = nodes.iter().map(|n| n.index).collect();
    indices.sort();
    assert_eq!(indices, vec![1, 2]);
}

#[tokio::test]
async fn resize_with_strict_min_violation() {
    let h = Harness::new();
    let ctx = ctx();
    let profile_id = create_profile(&h.repo, &ctx).await;

    let create_action = h.engine.cluster_create(&ctx, "strict", profile_id, 3, 1, 10).await.unwrap();
    assert_eq!(h.wait_terminal(create_action).await, ActionStatus::Succeeded);
    let cluster = h.repo.list_clusters(&ctx).await.unwrap().into_iter().find(|c| c.name == "strict").unwrap();

    let params = ResizeParams::builder().desired_capacity(0).strict(true).build();
    let resize_action = h.engine.cluster_resize(&ctx, cluster.id, params).await.unwrap();
    assert_eq!(h.wait_terminal(resize_action).await, ActionStatus::Failed);

    let action = h.repo.get_action(resize_action).await.unwrap();
    let reason = action.result_reason.expect("failed action must carry a result reason");
    assert!(reason.contains("less than the specified min_size"), "unexpected reason: {reason}");

    // A rejected resize must not have touched capacity or node count.
    let cluster = h.repo.get_cluster(&ctx, cluster.id).await.unwrap();
    assert_eq!(cluster.desired_capacity, 3);
    assert_eq!(h.repo.list_nodes_in_cluster(&ctx, cluster.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn add_pre_existing_node() {
    let h = Harness::new();
    let ctx = ctx();
    let profile_id = create_profile(&h.repo, &ctx).await;

    let node_action = h.engine.node_create(&ctx, "standalone", profile_id).await.unwrap();
    assert_eq!(h.wait_terminal(node_action).await, ActionStatus::Succeeded);
    let action = h.repo.get_action(node_action).await.unwrap();
    let node_id = action.target_id;
    assert!(h.repo.get_node(&ctx, node_id).await.unwrap().is_orphan());

    let create_action = h.engine.cluster_create(&ctx, "host", profile_id, 1, 0, -1).await.unwrap();
    assert_eq!(h.wait_terminal(create_action).await, ActionStatus::Succeeded);
    let cluster = h.repo.list_clusters(&ctx).await.unwrap().into_iter().find(|c| c.name == "host").unwrap();

    let add_action = h.engine.cluster_add_nodes(&ctx, cluster.id, &[node_id]).await.unwrap();
    assert_eq!(h.wait_terminal(add_action).await, ActionStatus::Succeeded);

    let node = h.repo.get_node(&ctx, node_id).await.unwrap();
    assert_eq!(node.cluster_id, Some(cluster.id));
    assert!(node.index >= 1);

    let cluster = h.repo.get_cluster(&ctx, cluster.id).await.unwrap();
    assert_eq!(cluster.desired_capacity, 2);
    assert_eq!(h.repo.list_nodes_in_cluster(&ctx, cluster.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn delete_with_one_node_stuck() {
    let h = Harness::new();
    let ctx = ctx();
    let profile_id = create_profile(&h.repo, &ctx).await;

    let create_action = h.engine.cluster_create(&ctx, "wobbly", profile_id, 2, 0, -1).await.unwrap();
    assert_eq!(h.wait_terminal(create_action).await, ActionStatus::Succeeded);
    let cluster = h.repo.list_clusters(&ctx).await.unwrap().into_iter().find(|c| c.name == "wobbly").unwrap();
    let nodes = h.repo.list_nodes_in_cluster(&ctx, cluster.id).await.unwrap();
    assert_eq!(nodes.len(), 2);

    let stuck_physical_id = nodes[0].physical_id.clone().expect("node should be provisioned");
    h.driver.fail_physical_id(&stuck_physical_id);

    let delete_action = h.engine.cluster_delete(&ctx, cluster.id).await.unwrap();
    h.wait_terminal(delete_action).await;

    // One node's driver-level delete is scripted to fail; the cluster must
    // not silently report full success, and the surviving node must still
    // be present.
    let cluster = h.repo.get_cluster(&ctx, cluster.id).await.unwrap();
    assert_ne!(cluster.status, senlin_core::ClusterStatus::Active);
    let remaining = h.repo.list_nodes_in_cluster(&ctx, cluster.id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].physical_id.as_deref(), Some(stuck_physical_id.as_str()));
}
