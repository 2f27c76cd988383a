//! Infrastructure Driver capability (spec §6): the interface to the
//! underlying cloud. Concrete adapters (compute/network/LB/identity/
//! orchestration) are out of scope (spec §1) — this module defines only
//! the traits C4/C5 call through and a [`crate::testing::FakeInfrastructureDriver`]
//! test double.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::RequestContext;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub name: String,
    pub image: String,
    pub flavor: String,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct ServerHandle {
    pub physical_id: String,
    pub addresses: Vec<String>,
}

#[async_trait]
pub trait IdentityDriver: Send + Sync {
    async fn trust_get_by_trustor(&self, ctx: &RequestContext) -> Result<Option<String>>;
    async fn trust_create(&self, ctx: &RequestContext) -> Result<String>;
    async fn get_user_id(&self, ctx: &RequestContext) -> Result<String>;
}

#[async_trait]
pub trait ComputeDriver: Send + Sync {
    async fn server_create(&self, ctx: &RequestContext, spec: &ServerSpec) -> Result<ServerHandle>;
    async fn server_delete(&self, ctx: &RequestContext, physical_id: &str) -> Result<()>;
    async fn server_get(&self, ctx: &RequestContext, physical_id: &str) -> Result<ServerHandle>;
    async fn wait_for_server_delete(&self, ctx: &RequestContext, physical_id: &str) -> Result<()>;
    async fn server_rebuild(&self, ctx: &RequestContext, physical_id: &str, spec: &ServerSpec) -> Result<()>;
    async fn server_interface_list(&self, ctx: &RequestContext, physical_id: &str) -> Result<Vec<String>>;
    async fn server_interface_create(&self, ctx: &RequestContext, physical_id: &str, network_id: &str) -> Result<String>;
    async fn server_interface_delete(&self, ctx: &RequestContext, physical_id: &str, interface_id: &str) -> Result<()>;
    async fn server_metadata_get(&self, ctx: &RequestContext, physical_id: &str) -> Result<Value>;
    async fn server_metadata_update(&self, ctx: &RequestContext, physical_id: &str, metadata: Value) -> Result<()>;
    async fn image_find(&self, ctx: &RequestContext, name_or_id: &str) -> Result<String>;
    async fn flavor_find(&self, ctx: &RequestContext, name_or_id: &str) -> Result<String>;
}

#[async_trait]
pub trait NetworkDriver: Send + Sync {
    async fn network_get(&self, ctx: &RequestContext, id: &str) -> Result<Value>;
    async fn subnet_get(&self, ctx: &RequestContext, id: &str) -> Result<Value>;
    async fn pool_member_create(&self, ctx: &RequestContext, pool_id: &str, address: &str, port: u16) -> Result<String>;
    async fn pool_member_delete(&self, ctx: &RequestContext, pool_id: &str, member_id: &str) -> Result<()>;
    async fn load_balancer_create(&self, ctx: &RequestContext, spec: Value) -> Result<String>;
    async fn load_balancer_delete(&self, ctx: &RequestContext, id: &str) -> Result<()>;
    async fn listener_create(&self, ctx: &RequestContext, lb_id: &str, spec: Value) -> Result<String>;
    async fn listener_delete(&self, ctx: &RequestContext, id: &str) -> Result<()>;
    async fn pool_create(&self, ctx: &RequestContext, listener_id: &str, spec: Value) -> Result<String>;
    async fn pool_delete(&self, ctx: &RequestContext, id: &str) -> Result<()>;
    async fn health_monitor_create(&self, ctx: &RequestContext, pool_id: &str, spec: Value) -> Result<String>;
    async fn health_monitor_delete(&self, ctx: &RequestContext, id: &str) -> Result<()>;
}

/// `member_add`/`member_remove` are the high-level pair `LbMemberPolicy`
/// actually drives; `network()`'s `pool_member_*` are the lower-level
/// primitives a fuller LB driver would compose them from.
#[async_trait]
pub trait LoadBalancingDriver: Send + Sync {
    async fn member_add(&self, ctx: &RequestContext, node_address: &str, pool_id: &str, port: u16) -> Result<String>;
    async fn member_remove(&self, ctx: &RequestContext, member_id: &str) -> Result<()>;
}

#[async_trait]
pub trait OrchestrationDriver: Send + Sync {
    async fn stack_create(&self, ctx: &RequestContext, spec: Value) -> Result<String>;
    async fn stack_update(&self, ctx: &RequestContext, id: &str, spec: Value) -> Result<()>;
    async fn stack_delete(&self, ctx: &RequestContext, id: &str) -> Result<()>;
    async fn stack_get(&self, ctx: &RequestContext, id: &str) -> Result<Value>;
    async fn wait_for_stack(&self, ctx: &RequestContext, id: &str, target_status: &str) -> Result<()>;
}

/// The full capability set C4/C5 depend on. A concrete adapter implements
/// all five; `FakeInfrastructureDriver` is the only implementation carried
/// in this crate.
pub trait InfrastructureDriver:
    IdentityDriver + ComputeDriver + NetworkDriver + LoadBalancingDriver + OrchestrationDriver
{
}

impl<T> InfrastructureDriver for T where
    T: IdentityDriver + ComputeDriver + NetworkDriver + LoadBalancingDriver + OrchestrationDriver
{
}
