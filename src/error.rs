//! Error types for the engine core.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::action::ActionStatus;
use crate::lock::LockScope;
use crate::scheduler::ResultCode;

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("lock busy on {resource} (scope {scope:?})")]
    LockBusy { resource: Uuid, scope: LockScope },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("infrastructure driver error: {0}")]
    DriverError(String),

    #[error("policy check failed: {0}")]
    PolicyVeto(String),

    #[error("invalid action transition for {action}: {from:?} -> {to:?}")]
    InvalidTransition {
        action: Uuid,
        from: ActionStatus,
        to: ActionStatus,
    },

    #[error("action cancelled: {0}")]
    Cancelled(String),

    #[error("action timed out: {0}")]
    Timeout(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl EngineError {
    /// Validation, not-found, conflict and invariant errors never become
    /// retryable no matter how many times the scheduler revisits them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::NotFound(_)
                | EngineError::Conflict(_)
                | EngineError::InvariantViolation(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::LockBusy { .. } | EngineError::StoreUnavailable(_)
        )
    }

    pub fn is_lock_busy(&self) -> bool {
        matches!(self, EngineError::LockBusy { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }

    pub fn is_policy_veto(&self) -> bool {
        matches!(self, EngineError::PolicyVeto(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout(_))
    }

    /// Maps a failure onto the scheduler's result-code vocabulary.
    pub fn result_code(&self) -> ResultCode {
        match self {
            EngineError::LockBusy { .. } | EngineError::StoreUnavailable(_) => ResultCode::Retry,
            EngineError::Cancelled(_) => ResultCode::Cancel,
            EngineError::Timeout(_) => ResultCode::Timeout,
            _ => ResultCode::Error,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
