//! Engine configuration: worker pool sizing, action timeouts, retry caps,
//! and lock behavior, built the way the teacher's `EnterpriseClientBuilder`/
//! `EnterpriseClient::from_env` pair builds client configuration — a plain
//! builder plus an environment-variable loader, both producing the same
//! [`EngineConfig`] value.

use std::time::Duration;

use crate::scheduler::SchedulerConfig;

/// Default action timeout applied when a caller doesn't set one on the
/// `Action` itself.
const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub worker_count: usize,
    pub default_action_timeout: Duration,
    pub poll_floor: Duration,
    pub poll_ceiling: Duration,
    pub retry_backoff_cap: Duration,
    pub retry_max_attempts: u32,
    /// Whether cluster-lock acquisition may steal from an owner whose action
    /// has not yet reached a terminal status (spec §4.1 deliberately leaves
    /// forced-steal as caller-opt-in; this only affects the *default* used
    /// by `Engine` when a caller doesn't pass `forced` explicitly).
    pub allow_forced_steal_by_default: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let scheduler_defaults = SchedulerConfig::default();
        EngineConfig {
            worker_count: scheduler_defaults.worker_count,
            default_action_timeout: DEFAULT_ACTION_TIMEOUT,
            poll_floor: scheduler_defaults.poll_floor,
            poll_ceiling: scheduler_defaults.poll_ceiling,
            retry_backoff_cap: scheduler_defaults.retry_backoff_cap,
            retry_max_attempts: scheduler_defaults.retry_max_attempts,
            allow_forced_steal_by_default: false,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            worker_count: self.worker_count,
            poll_floor: self.poll_floor,
            poll_ceiling: self.poll_ceiling,
            retry_backoff_cap: self.retry_backoff_cap,
            retry_max_attempts: self.retry_max_attempts,
        }
    }

    /// Builds configuration from environment variables, falling back to
    /// defaults for anything unset:
    /// - `SENLINRS_WORKER_COUNT`
    /// - `SENLINRS_DEFAULT_ACTION_TIMEOUT_SECS`
    /// - `SENLINRS_POLL_FLOOR_MS`
    /// - `SENLINRS_POLL_CEILING_MS`
    /// - `SENLINRS_RETRY_BACKOFF_CAP_SECS`
    /// - `SENLINRS_RETRY_MAX_ATTEMPTS`
    /// - `SENLINRS_ALLOW_FORCED_STEAL`: `"true"` to enable
    pub fn from_env() -> Self {
        use std::env;

        let mut builder = EngineConfigBuilder::new();
        if let Ok(v) = env::var("SENLINRS_WORKER_COUNT") {
            if let Ok(v) = v.parse() {
                builder = builder.worker_count(v);
            }
        }
        if let Ok(v) = env::var("SENLINRS_DEFAULT_ACTION_TIMEOUT_SECS") {
            if let Ok(v) = v.parse() {
                builder = builder.default_action_timeout(Duration::from_secs(v));
            }
        }
        if let Ok(v) = env::var("SENLINRS_POLL_FLOOR_MS") {
            if let Ok(v) = v.parse() {
                builder = builder.poll_floor(Duration::from_millis(v));
            }
        }
        if let Ok(v) = env::var("SENLINRS_POLL_CEILING_MS") {
            if let Ok(v) = v.parse() {
                builder = builder.poll_ceiling(Duration::from_millis(v));
            }
        }
        if let Ok(v) = env::var("SENLINRS_RETRY_BACKOFF_CAP_SECS") {
            if let Ok(v) = v.parse() {
                builder = builder.retry_backoff_cap(Duration::from_secs(v));
            }
        }
        if let Ok(v) = env::var("SENLINRS_RETRY_MAX_ATTEMPTS") {
            if let Ok(v) = v.parse() {
                builder = builder.retry_max_attempts(v);
            }
        }
        if let Ok(v) = env::var("SENLINRS_ALLOW_FORCED_STEAL") {
            builder = builder.allow_forced_steal_by_default(v == "true");
        }
        builder.build()
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    inner: EngineConfig,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        EngineConfigBuilder { inner: EngineConfig::default() }
    }
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker_count(mut self, n: usize) -> Self {
        self.inner.worker_count = n;
        self
    }

    pub fn default_action_timeout(mut self, d: Duration) -> Self {
        self.inner.default_action_timeout = d;
        self
    }

    pub fn poll_floor(mut self, d: Duration) -> Self {
        self.inner.poll_floor = d;
        self
    }

    pub fn poll_ceiling(mut self, d: Duration) -> Self {
        self.inner.poll_ceiling = d;
        self
    }

    pub fn retry_backoff_cap(mut self, d: Duration) -> Self {
        self.inner.retry_backoff_cap = d;
        self
    }

    pub fn retry_max_attempts(mut self, n: u32) -> Self {
        self.inner.retry_max_attempts = n;
        self
    }

    pub fn allow_forced_steal_by_default(mut self, allow: bool) -> Self {
        self.inner.allow_forced_steal_by_default = allow;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.inner
    }
}
