//! In-process test support (feature `test-support`), mirroring the way the
//! teacher's `testing` module bundled a mock server, fixtures, and response
//! helpers behind the same flag. Here the "server" is [`FakeInfrastructureDriver`]:
//! a scriptable, in-memory stand-in for the five driver capability traits, so
//! crate consumers can exercise `Engine`/`ClusterRuntime`/`NodeRuntime` without
//! a real cloud behind them. [`crate::repository::InMemoryRepository`] already
//! lives in `repository.rs` and is re-exported here for convenience, the way
//! the teacher re-exported its fixtures from `testing::mod`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{Cluster, Node, Policy, PolicyTarget, Profile, RequestContext};
use crate::driver::{ComputeDriver, IdentityDriver, LoadBalancingDriver, NetworkDriver, OrchestrationDriver, ServerHandle, ServerSpec};
use crate::error::{EngineError, Result};

pub use crate::repository::InMemoryRepository;

/// A scriptable double for the five driver traits `ClusterRuntime`/
/// `NodeRuntime`/policy kinds call through. Every operation is recorded in
/// `calls` and succeeds by default; failing a specific physical id or pool
/// member lets tests exercise rollback/retry paths (spec §8 boundary
/// behaviors) without a real infrastructure backend.
pub struct FakeInfrastructureDriver {
    servers: Mutex<HashMap<String, ServerHandle>>,
    lb_members: Mutex<HashMap<String, (String, u16)>>,
    next_id: AtomicU64,
    pub calls: Mutex<Vec<String>>,
    /// physical ids for which `server_create`/`server_delete`/etc. should
    /// return `EngineError::DriverError` instead of succeeding.
    fail_physical_ids: Mutex<Vec<String>>,
}

impl Default for FakeInfrastructureDriver {
    fn default() -> Self {
        FakeInfrastructureDriver {
            servers: Mutex::new(HashMap::new()),
            lb_members: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
            fail_physical_ids: Mutex::new(Vec::new()),
        }
    }
}

impl FakeInfrastructureDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the driver to fail every call that takes `physical_id` as an
    /// argument, so tests can drive e.g. `do_delete`'s per-node rollback
    /// path (spec §4.5 point 4, "Delete-with-one-node-stuck").
    pub fn fail_physical_id(&self, physical_id: impl Into<String>) {
        self.fail_physical_ids.lock().unwrap().push(physical_id.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn next_id(&self) -> String {
        format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn check_physical_id(&self, physical_id: &str) -> Result<()> {
        if self.fail_physical_ids.lock().unwrap().iter().any(|id| id == physical_id) {
            return Err(EngineError::DriverError(format!("scripted failure for {physical_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityDriver for FakeInfrastructureDriver {
    async fn trust_get_by_trustor(&self, _ctx: &RequestContext) -> Result<Option<String>> {
        self.record("trust_get_by_trustor");
        Ok(None)
    }

    async fn trust_create(&self, _ctx: &RequestContext) -> Result<String> {
        self.record("trust_create");
        Ok(self.next_id())
    }

    async fn get_user_id(&self, ctx: &RequestContext) -> Result<String> {
        self.record("get_user_id");
        Ok(ctx.user.clone())
    }
}

#[async_trait]
impl ComputeDriver for FakeInfrastructureDriver {
    async fn server_create(&self, _ctx: &RequestContext, spec: &ServerSpec) -> Result<ServerHandle> {
        self.record(format!("server_create:{}", spec.name));
        let handle = ServerHandle {
            physical_id: self.next_id(),
            addresses: vec!["10.0.0.1".to_string()],
        };
        self.servers.lock().unwrap().insert(handle.physical_id.clone(), handle.clone());
        Ok(handle)
    }

    async fn server_delete(&self, _ctx: &RequestContext, physical_id: &str) -> Result<()> {
        self.record(format!("server_delete:{physical_id}"));
        self.check_physical_id(physical_id)?;
        self.servers.lock().unwrap().remove(physical_id);
        Ok(())
    }

    async fn server_get(&self, _ctx: &RequestContext, physical_id: &str) -> Result<ServerHandle> {
        self.record(format!("server_get:{physical_id}"));
        self.servers
            .lock()
            .unwrap()
            .get(physical_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("no fake server {physical_id}")))
    }

    async fn wait_for_server_delete(&self, _ctx: &RequestContext, physical_id: &str) -> Result<()> {
        self.record(format!("wait_for_server_delete:{physical_id}"));
        self.check_physical_id(physical_id)?;
        Ok(())
    }

    async fn server_rebuild(&self, _ctx: &RequestContext, physical_id: &str, _spec: &ServerSpec) -> Result<()> {
        self.record(format!("server_rebuild:{physical_id}"));
        self.check_physical_id(physical_id)?;
        Ok(())
    }

    async fn server_interface_list(&self, _ctx: &RequestContext, physical_id: &str) -> Result<Vec<String>> {
        self.record(format!("server_interface_list:{physical_id}"));
        Ok(Vec::new())
    }

    async fn server_interface_create(&self, _ctx: &RequestContext, physical_id: &str, _network_id: &str) -> Result<String> {
        self.record(format!("server_interface_create:{physical_id}"));
        Ok(self.next_id())
    }

    async fn server_interface_delete(&self, _ctx: &RequestContext, physical_id: &str, _interface_id: &str) -> Result<()> {
        self.record(format!("server_interface_delete:{physical_id}"));
        Ok(())
    }

    async fn server_metadata_get(&self, _ctx: &RequestContext, physical_id: &str) -> Result<Value> {
        self.record(format!("server_metadata_get:{physical_id}"));
        Ok(Value::Null)
    }

    async fn server_metadata_update(&self, _ctx: &RequestContext, physical_id: &str, _metadata: Value) -> Result<()> {
        self.record(format!("server_metadata_update:{physical_id}"));
        Ok(())
    }

    async fn image_find(&self, _ctx: &RequestContext, name_or_id: &str) -> Result<String> {
        self.record(format!("image_find:{name_or_id}"));
        Ok(name_or_id.to_string())
    }

    async fn flavor_find(&self, _ctx: &RequestContext, name_or_id: &str) -> Result<String> {
        self.record(format!("flavor_find:{name_or_id}"));
        Ok(name_or_id.to_string())
    }
}

#[async_trait]
impl NetworkDriver for FakeInfrastructureDriver {
    async fn network_get(&self, _ctx: &RequestContext, id: &str) -> Result<Value> {
        self.record(format!("network_get:{id}"));
        Ok(Value::Null)
    }

    async fn subnet_get(&self, _ctx: &RequestContext, id: &str) -> Result<Value> {
        self.record(format!("subnet_get:{id}"));
        Ok(Value::Null)
    }

    async fn pool_member_create(&self, _ctx: &RequestContext, pool_id: &str, address: &str, port: u16) -> Result<String> {
        self.record(format!("pool_member_create:{pool_id}:{address}:{port}"));
        let id = self.next_id();
        self.lb_members.lock().unwrap().insert(id.clone(), (address.to_string(), port));
        Ok(id)
    }

    async fn pool_member_delete(&self, _ctx: &RequestContext, pool_id: &str, member_id: &str) -> Result<()> {
        self.record(format!("pool_member_delete:{pool_id}:{member_id}"));
        self.lb_members.lock().unwrap().remove(member_id);
        Ok(())
    }

    async fn load_balancer_create(&self, _ctx: &RequestContext, _spec: Value) -> Result<String> {
        self.record("load_balancer_create");
        Ok(self.next_id())
    }

    async fn load_balancer_delete(&self, _ctx: &RequestContext, id: &str) -> Result<()> {
        self.record(format!("load_balancer_delete:{id}"));
        Ok(())
    }

    async fn listener_create(&self, _ctx: &RequestContext, lb_id: &str, _spec: Value) -> Result<String> {
        self.record(format!("listener_create:{lb_id}"));
        Ok(self.next_id())
    }

    async fn listener_delete(&self, _ctx: &RequestContext, id: &str) -> Result<()> {
        self.record(format!("listener_delete:{id}"));
        Ok(())
    }

    async fn pool_create(&self, _ctx: &RequestContext, listener_id: &str, _spec: Value) -> Result<String> {
        self.record(format!("pool_create:{listener_id}"));
        Ok(self.next_id())
    }

    async fn pool_delete(&self, _ctx: &RequestContext, id: &str) -> Result<()> {
        self.record(format!("pool_delete:{id}"));
        Ok(())
    }

    async fn health_monitor_create(&self, _ctx: &RequestContext, pool_id: &str, _spec: Value) -> Result<String> {
        self.record(format!("health_monitor_create:{pool_id}"));
        Ok(self.next_id())
    }

    async fn health_monitor_delete(&self, _ctx: &RequestContext, id: &str) -> Result<()> {
        self.record(format!("health_monitor_delete:{id}"));
        Ok(())
    }
}

#[async_trait]
impl LoadBalancingDriver for FakeInfrastructureDriver {
    async fn member_add(&self, _ctx: &RequestContext, node_address: &str, pool_id: &str, port: u16) -> Result<String> {
        self.record(format!("member_add:{pool_id}:{node_address}:{port}"));
        let id = self.next_id();
        self.lb_members.lock().unwrap().insert(id.clone(), (node_address.to_string(), port));
        Ok(id)
    }

    async fn member_remove(&self, _ctx: &RequestContext, member_id: &str) -> Result<()> {
        self.record(format!("member_remove:{member_id}"));
        self.lb_members.lock().unwrap().remove(member_id);
        Ok(())
    }
}

#[async_trait]
impl OrchestrationDriver for FakeInfrastructureDriver {
    async fn stack_create(&self, _ctx: &RequestContext, _spec: Value) -> Result<String> {
        self.record("stack_create");
        Ok(self.next_id())
    }

    async fn stack_update(&self, _ctx: &RequestContext, id: &str, _spec: Value) -> Result<()> {
        self.record(format!("stack_update:{id}"));
        Ok(())
    }

    async fn stack_delete(&self, _ctx: &RequestContext, id: &str) -> Result<()> {
        self.record(format!("stack_delete:{id}"));
        Ok(())
    }

    async fn stack_get(&self, _ctx: &RequestContext, id: &str) -> Result<Value> {
        self.record(format!("stack_get:{id}"));
        Ok(Value::Null)
    }

    async fn wait_for_stack(&self, _ctx: &RequestContext, id: &str, _target_status: &str) -> Result<()> {
        self.record(format!("wait_for_stack:{id}"));
        Ok(())
    }
}

/// Builder-pattern fixtures for the domain entities, the way the teacher's
/// `DatabaseFixture`/`NodeFixture` built REST payloads with sane defaults
/// overridable field-by-field.
pub mod fixtures {
    use super::*;

    pub struct ClusterFixture {
        name: String,
        profile_id: Uuid,
        desired_capacity: i64,
        min_size: i64,
        max_size: i64,
        owner: RequestContext,
    }

    impl ClusterFixture {
        pub fn new(name: impl Into<String>, profile_id: Uuid) -> Self {
            ClusterFixture {
                name: name.into(),
                profile_id,
                desired_capacity: 1,
                min_size: 0,
                max_size: -1,
                owner: RequestContext::new("fixture-user", "fixture-project", "fixture-domain"),
            }
        }

        pub fn desired_capacity(mut self, n: i64) -> Self {
            self.desired_capacity = n;
            self
        }

        pub fn min_size(mut self, n: i64) -> Self {
            self.min_size = n;
            self
        }

        pub fn max_size(mut self, n: i64) -> Self {
            self.max_size = n;
            self
        }

        pub fn owner(mut self, ctx: RequestContext) -> Self {
            self.owner = ctx;
            self
        }

        pub fn build(self) -> Result<Cluster> {
            Cluster::new(
                self.name,
                self.profile_id,
                self.desired_capacity,
                self.min_size,
                self.max_size,
                self.owner.user,
                self.owner.project,
                self.owner.domain,
            )
        }
    }

    pub struct NodeFixture {
        name: String,
        profile_id: Uuid,
        role: String,
    }

    impl NodeFixture {
        pub fn new(name: impl Into<String>, profile_id: Uuid) -> Self {
            NodeFixture {
                name: name.into(),
                profile_id,
                role: "member".to_string(),
            }
        }

        pub fn role(mut self, role: impl Into<String>) -> Self {
            self.role = role.into();
            self
        }

        pub fn build_orphan(self) -> Node {
            Node::new_orphan(self.name, self.profile_id, self.role)
        }
    }

    pub struct ProfileFixture {
        name: String,
        type_tag: String,
        spec: Value,
    }

    impl ProfileFixture {
        pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
            ProfileFixture {
                name: name.into(),
                type_tag: type_tag.into(),
                spec: serde_json::json!({}),
            }
        }

        pub fn spec(mut self, spec: Value) -> Self {
            self.spec = spec;
            self
        }

        pub fn build(self) -> Profile {
            Profile::new(self.name, self.type_tag, "1.0", self.spec)
        }
    }

    pub struct PolicyFixture {
        name: String,
        type_tag: String,
        spec: Value,
        targets: Vec<PolicyTarget>,
    }

    impl PolicyFixture {
        pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
            PolicyFixture {
                name: name.into(),
                type_tag: type_tag.into(),
                spec: serde_json::json!({}),
                targets: Vec::new(),
            }
        }

        pub fn spec(mut self, spec: Value) -> Self {
            self.spec = spec;
            self
        }

        pub fn targets(mut self, targets: Vec<PolicyTarget>) -> Self {
            self.targets = targets;
            self
        }

        pub fn build(self) -> Policy {
            Policy::new(self.name, self.type_tag, "1.0", self.spec, self.targets)
        }
    }
}

pub use fixtures::{ClusterFixture, NodeFixture, PolicyFixture, ProfileFixture};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_driver_records_calls() {
        let driver = FakeInfrastructureDriver::new();
        let ctx = RequestContext::new("u", "p", "d");
        let spec = ServerSpec {
            name: "n1".into(),
            image: "img".into(),
            flavor: "flavor".into(),
            metadata: Value::Null,
        };
        let handle = driver.server_create(&ctx, &spec).await.unwrap();
        assert!(driver.calls().iter().any(|c| c.starts_with("server_create")));

        driver.fail_physical_id(&handle.physical_id);
        let err = driver.server_delete(&ctx, &handle.physical_id).await.unwrap_err();
        assert!(matches!(err, EngineError::DriverError(_)));
    }

    #[test]
    fn cluster_fixture_builds_valid_cluster() {
        let profile_id = Uuid::new_v4();
        let cluster = ClusterFixture::new("web", profile_id).desired_capacity(3).min_size(1).max_size(5).build().unwrap();
        assert_eq!(cluster.name, "web");
        assert_eq!(cluster.desired_capacity, 3);
    }

    #[test]
    fn node_fixture_builds_orphan() {
        let profile_id = Uuid::new_v4();
        let node = NodeFixture::new("n1", profile_id).role("member").build_orphan();
        assert!(node.is_orphan());
    }
}
