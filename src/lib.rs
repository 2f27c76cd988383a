//! Core action engine, advisory locking layer, and pluggable policy
//! framework for a clustering-as-a-service control plane.
//!
//! This crate is the durable coordination core: given a [`Repository`] for
//! persistence and an [`InfrastructureDriver`] for the underlying cloud, it
//! turns cluster/node lifecycle intents into dependency-ordered [`Action`]
//! graphs, executes them through a worker pool with retry/backoff and
//! per-scope locking, and lets [`PolicyKind`] implementations veto or
//! annotate operations before and after they run.
//!
//! # Quick Start
//!
//! ```no_run
//! # #[cfg(feature = "test-support")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use senlin_core::{Engine, EngineConfig, EngineDeps, InMemoryRepository, RequestContext};
//! use senlin_core::testing::FakeInfrastructureDriver;
//! use tokio_util::sync::CancellationToken;
//!
//! let repo = Arc::new(InMemoryRepository::new());
//! let driver = Arc::new(FakeInfrastructureDriver::new());
//! let engine = Engine::new(EngineDeps { repo, driver }, EngineConfig::default());
//!
//! let shutdown = CancellationToken::new();
//! tokio::spawn({
//!     let shutdown = shutdown.clone();
//!     async move { engine.run(shutdown).await }
//! });
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - **Domain model**: [`domain`] — `Cluster`, `Node`, `Profile`, `Policy`,
//!   `ClusterPolicyBinding`, `Action`, `Receiver`, `Event`.
//! - **Persistence seam**: [`repository`] — the `Repository` trait and its
//!   `InMemoryRepository` reference implementation.
//! - **Infrastructure seam**: [`driver`] — capability traits a cloud adapter
//!   implements.
//! - **Scheduling**: [`scheduler`] — the worker pool, retry/backoff, and
//!   dependency-wait primitives.
//! - **Locking**: [`lock`] — the scope-aware advisory lock manager.
//! - **Policy**: [`policy_engine`] and [`policies`] — the pre/post-check
//!   framework and the policy kinds this crate ships.
//! - **Execution**: [`cluster_runtime`] and [`node_runtime`] — the operation
//!   bodies for cluster and node actions respectively.
//! - **Facade**: [`engine`] — `Engine`, the single entry point consumers
//!   construct from.
//! - **Configuration**: [`config`] — `EngineConfig`/`EngineConfigBuilder`.
//! - **Testing**: [`testing`] (behind `test-support`) — `FakeInfrastructureDriver`
//!   and entity fixture builders.

pub mod cluster_runtime;
pub mod config;
pub mod domain;
pub mod driver;
pub mod engine;
pub mod error;
pub mod lock;
pub mod node_runtime;
pub mod policies;
pub mod policy_engine;
pub mod repository;
pub mod scheduler;

#[cfg(feature = "test-support")]
pub mod testing;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use domain::{
    Action, ActionStatus, Cluster, ClusterPolicyBinding, ClusterStatus, CredentialBundle, Event,
    EventLevel, Node, NodeStatus, Phase, Policy, PolicyTarget, Profile, Receiver, RequestContext,
};
pub use driver::{
    ComputeDriver, IdentityDriver, InfrastructureDriver, LoadBalancingDriver, NetworkDriver,
    OrchestrationDriver, ServerHandle, ServerSpec,
};
pub use engine::{Engine, EngineDeps, ResizeParams};
pub use error::{EngineError, Result};
pub use lock::{LockManager, LockScope};
pub use policy_engine::{PolicyEngine, PolicyKind};
pub use repository::{InMemoryRepository, Repository};
pub use scheduler::{ActionExecutor, Dispatcher, ResultCode, Scheduler, SchedulerConfig};
