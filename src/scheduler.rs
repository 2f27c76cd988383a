//! Scheduler (C3) and Dispatcher (C8), spec §4.3, §2, §5.
//!
//! Scheduling model: parallel workers with cooperative suspension. A fixed
//! pool of workers drains READY actions; each worker runs one action to its
//! next suspension point (wait-on-dependents, driver call, sleep) and
//! returns. Resumption is the scheduler re-polling, not a continuation —
//! this is the "yield-and-reschedule" design from spec §9, deliberately not
//! modeled as a single long-lived `async fn` per action.
//!
//! `ResultCode::Suspended` is the wait-on-dependents suspension point: an
//! executor that has fanned out child actions returns it immediately rather
//! than blocking the worker until the children finish. The worker is freed;
//! the action stays in `ActionStatus::Waiting` (already persisted by
//! `Repository::action_add_dependency` when the child link was recorded) and
//! the repository's own dependency cascade in `update_action_status` promotes
//! it back to READY once its children resolve, so a later poll picks it back
//! up and the executor runs again to check on them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::ActionStatus;
use crate::error::{EngineError, Result};
use crate::repository::Repository;

/// Result codes surfaced by action execution (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Ok,
    Error,
    Cancel,
    Timeout,
    /// "Requeue me unchanged" — not a failure (spec §4.3).
    Retry,
    /// Fanned out to child actions and yielded; not terminal, not a retry of
    /// this same action — the worker is freed and the dependency cascade
    /// resumes it once its children resolve.
    Suspended,
}

/// Executes one action body to its next suspension point. Implemented by
/// the node and cluster runtimes; the scheduler is generic over this so it
/// has no knowledge of node/cluster semantics.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action_id: Uuid, cancel: CancellationToken) -> Result<ResultCode>;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub worker_count: usize,
    pub poll_floor: Duration,
    pub poll_ceiling: Duration,
    /// spec §5: `RES_RETRY` caps at 60s backoff, 5 attempts, then promotes
    /// to `RES_ERROR`.
    pub retry_backoff_cap: Duration,
    pub retry_max_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            worker_count: 4,
            poll_floor: Duration::from_millis(10),
            poll_ceiling: Duration::from_secs(1),
            retry_backoff_cap: Duration::from_secs(60),
            retry_max_attempts: 5,
        }
    }
}

struct CancelRegistry {
    tokens: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl CancelRegistry {
    fn new() -> Self {
        CancelRegistry {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    async fn token_for(&self, id: Uuid) -> CancellationToken {
        let mut tokens = self.tokens.write().await;
        tokens.entry(id).or_insert_with(CancellationToken::new).clone()
    }

    async fn cancel(&self, id: Uuid) {
        if let Some(token) = self.tokens.read().await.get(&id) {
            token.cancel();
        }
    }

    async fn forget(&self, id: Uuid) {
        self.tokens.write().await.remove(&id);
    }
}

/// C8: in-process fan-out of "start action" signals to the worker pool.
/// Constructed independently of `Scheduler` via [`Dispatcher::channel`] so
/// collaborators that need to enqueue actions (e.g. `ClusterRuntime`) can be
/// built before the `Scheduler` that will eventually drain the channel.
#[derive(Clone)]
pub struct Dispatcher {
    sender: mpsc::Sender<Uuid>,
}

impl Dispatcher {
    /// Mints a `Dispatcher`/receiver pair; the receiver is handed to
    /// `Scheduler::new`.
    pub fn channel() -> (Dispatcher, mpsc::Receiver<Uuid>) {
        let (tx, rx) = mpsc::channel(1024);
        (Dispatcher { sender: tx }, rx)
    }

    /// `start` is idempotent in spirit: a full channel just means the
    /// action will be picked up on the next `get_ready()` poll instead.
    pub fn start(&self, action_id: Uuid) {
        if self.sender.try_send(action_id).is_err() {
            debug!(%action_id, "dispatch channel full, falling back to poll");
        }
    }
}

pub struct Scheduler<R: Repository> {
    repo: Arc<R>,
    executor: Arc<dyn ActionExecutor>,
    config: SchedulerConfig,
    cancel_registry: Arc<CancelRegistry>,
    dispatch_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Uuid>>>,
    dispatcher: Dispatcher,
}

impl<R: Repository + 'static> Scheduler<R> {
    /// Builds a scheduler around a dispatch channel obtained from
    /// [`Dispatcher::channel`]; callers that spawn child actions before the
    /// scheduler exists (e.g. `Engine::new` wiring `ClusterRuntime`) mint the
    /// pair first and hand the receiver half in here.
    pub fn with_dispatcher(repo: Arc<R>, executor: Arc<dyn ActionExecutor>, config: SchedulerConfig, dispatcher: Dispatcher, rx: mpsc::Receiver<Uuid>) -> Self {
        Scheduler {
            repo,
            executor,
            config,
            cancel_registry: Arc::new(CancelRegistry::new()),
            dispatch_rx: tokio::sync::Mutex::new(Some(rx)),
            dispatcher,
        }
    }

    pub fn new(repo: Arc<R>, executor: Arc<dyn ActionExecutor>, config: SchedulerConfig) -> Self {
        let (dispatcher, rx) = Dispatcher::channel();
        Self::with_dispatcher(repo, executor, config, dispatcher, rx)
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Cooperative cancellation: sets a flag and wakes any worker polling
    /// this action. Workers must observe it at every suspension point.
    pub async fn cancel(&self, action_id: Uuid) {
        self.cancel_registry.cancel(action_id).await;
    }

    /// Runs the worker pool until `shutdown` fires. Each worker alternates
    /// between draining the dispatch channel and polling `get_ready()`.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let rx = self
            .dispatch_rx
            .lock()
            .await
            .take()
            .expect("Scheduler::run called more than once");
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(self.config.worker_count);
        for worker_id in 0..self.config.worker_count {
            let this = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                this.worker_loop(worker_id, rx, shutdown).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[instrument(skip(self, rx, shutdown))]
    async fn worker_loop(
        &self,
        worker_id: usize,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Uuid>>>,
        shutdown: CancellationToken,
    ) {
        let mut poll_backoff = self.config.poll_floor;
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            let dispatched = {
                let mut rx = rx.lock().await;
                tokio::time::timeout(Duration::from_millis(5), rx.recv())
                    .await
                    .ok()
                    .flatten()
            };

            let ready = match dispatched {
                Some(id) => vec![id],
                None => self.repo.get_ready().await.unwrap_or_default(),
            };

            if ready.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(poll_backoff) => {}
                    _ = shutdown.cancelled() => return,
                }
                poll_backoff = (poll_backoff * 2).min(self.config.poll_ceiling);
                continue;
            }
            poll_backoff = self.config.poll_floor;

            for action_id in ready {
                debug!(worker_id, %action_id, "dispatching action");
                if let Err(err) = self.run_one(action_id).await {
                    warn!(%action_id, error = %err, "action execution failed");
                }
            }
        }
    }

    async fn run_one(&self, action_id: Uuid) -> Result<()> {
        let action = self.repo.get_action(action_id).await?;
        if action.status.is_terminal() {
            return Ok(());
        }
        self.repo
            .update_action_status(action_id, ActionStatus::Running, None)
            .await?;

        let token = self.cancel_registry.token_for(action_id).await;
        let deadline = action.timeout;
        let outcome = tokio::time::timeout(deadline, self.executor.execute(action_id, token.clone())).await;

        let (result, reason) = match outcome {
            Ok(Ok(code)) => (code, None),
            Ok(Err(e)) => (e.result_code(), Some(e.to_string())),
            Err(_) => (ResultCode::Timeout, Some("RES_TIMEOUT".to_string())),
        };

        self.apply_result(action_id, result, reason).await?;
        if matches!(result, ResultCode::Ok | ResultCode::Error | ResultCode::Cancel | ResultCode::Timeout) {
            self.cancel_registry.forget(action_id).await;
        }
        Ok(())
    }

    /// `reason`, when present, is the error text the executor returned
    /// (spec §7: "user-visible failures arrive via action status +
    /// result-reason").
    async fn apply_result(&self, action_id: Uuid, code: ResultCode, reason: Option<String>) -> Result<()> {
        match code {
            ResultCode::Ok => {
                self.repo
                    .update_action_status(action_id, ActionStatus::Succeeded, None)
                    .await
            }
            ResultCode::Error => {
                self.repo
                    .update_action_status(action_id, ActionStatus::Failed, reason)
                    .await
            }
            ResultCode::Cancel => {
                self.repo
                    .update_action_status(action_id, ActionStatus::Cancelled, reason)
                    .await
            }
            ResultCode::Timeout => {
                self.repo
                    .update_action_status(action_id, ActionStatus::Failed, reason)
                    .await
            }
            ResultCode::Retry => {
                self.repo
                    .update_action_status(action_id, ActionStatus::Waiting, None)
                    .await?;
                self.requeue_with_backoff(action_id).await
            }
            ResultCode::Suspended => {
                // The executor already recorded the child dependency and the
                // WAITING status when it spawned the children (spec §4.3);
                // there is nothing left for the scheduler to persist here.
                // The repository's own dependency cascade promotes this
                // action back to READY once its children resolve.
                Ok(())
            }
        }
    }

    /// spec §5: retry with exponential backoff capped at 60s, up to 5
    /// attempts, then promote to `RES_ERROR`. The attempt count rides on
    /// the action's `data["retry_attempt"]` so it survives across the
    /// separate `run_one` invocations each retry produces.
    async fn requeue_with_backoff(&self, action_id: Uuid) -> Result<()> {
        let action = self.repo.get_action(action_id).await?;
        let attempt = action
            .data
            .get("retry_attempt")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;

        if attempt >= self.config.retry_max_attempts {
            self.repo
                .update_action_status(action_id, ActionStatus::Failed, Some("RES_ERROR: retry attempts exhausted".into()))
                .await?;
            return Ok(());
        }

        let backoff = (self.config.poll_floor * 2u32.pow(attempt)).min(self.config.retry_backoff_cap);
        self.repo
            .set_action_data_field(action_id, "retry_attempt", serde_json::json!(attempt + 1))
            .await?;
        tokio::time::sleep(backoff).await;
        self.repo
            .update_action_status(action_id, ActionStatus::Ready, None)
            .await?;
        self.dispatcher().start(action_id);
        Ok(())
    }
}

/// A single, non-blocking look at `ids`' current status (spec §4.3):
/// all-succeeded -> Ok; any-failed -> Error with a message naming the failed
/// action; any-cancelled -> Cancel; cancellation observed on `parent_token`
/// surfaces its own Cancel; otherwise -> Suspended, telling the caller to
/// yield rather than block the worker waiting for the rest to finish. The
/// repository's dependency cascade (`update_action_status`) is what wakes the
/// caller's action back up once its children resolve.
pub async fn wait_for_dependents<R: Repository>(repo: &R, ids: &[Uuid], parent_token: &CancellationToken) -> (ResultCode, String) {
    if parent_token.is_cancelled() {
        return (ResultCode::Cancel, "parent action cancelled".into());
    }
    let mut all_succeeded = true;
    for id in ids {
        let action = match repo.get_action(*id).await {
            Ok(a) => a,
            Err(_) => continue,
        };
        match action.status {
            ActionStatus::Succeeded => {}
            ActionStatus::Failed => {
                return (ResultCode::Error, format!("ACTION [{id}] failed"));
            }
            ActionStatus::Cancelled => {
                return (ResultCode::Cancel, format!("ACTION [{id}] cancelled"));
            }
            _ => all_succeeded = false,
        }
    }
    if all_succeeded {
        (ResultCode::Ok, String::new())
    } else {
        (ResultCode::Suspended, String::new())
    }
}

impl From<EngineError> for ResultCode {
    fn from(err: EngineError) -> Self {
        err.result_code()
    }
}
