//! The `Action` entity: a persisted unit of work with inputs, outputs,
//! status, and dependencies (spec §3, §4.2).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::scheduler::ResultCode;

/// Action lifecycle. The transition table lives in
/// [`crate::repository::Repository::update_action_status`] and is normative;
/// this enum only names the legal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Init,
    Ready,
    Waiting,
    Running,
    Suspended,
    Succeeded,
    Failed,
    Cancelled,
}

impl ActionStatus {
    /// Terminal statuses are final: SUCCEEDED, FAILED, CANCELLED.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Succeeded | ActionStatus::Failed | ActionStatus::Cancelled
        )
    }

    pub fn is_terminal_success(self) -> bool {
        matches!(self, ActionStatus::Succeeded)
    }

    /// Whether `to` is a legal transition from `self` per spec §4.2's table.
    pub fn can_transition_to(self, to: ActionStatus) -> bool {
        use ActionStatus::*;
        matches!(
            (self, to),
            (Init, Ready)
                | (Init, Cancelled)
                | (Ready, Running)
                | (Ready, Cancelled)
                | (Waiting, Ready)
                | (Waiting, Failed)
                | (Waiting, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Suspended)
                | (Running, Waiting)
                | (Suspended, Running)
                | (Suspended, Cancelled)
        )
    }
}

/// A persisted unit of work. Targets either a cluster or a node (`target_id`
/// plus `action_name` disambiguate which).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub target_id: Uuid,
    pub action_name: String,
    pub inputs: Value,
    pub outputs: Value,
    /// Policy decisions and other scratch data ride here (spec §4.6).
    pub data: Value,
    pub status: ActionStatus,
    pub result_code: Option<ResultCode>,
    pub result_reason: Option<String>,
    /// Who/what caused this action (a user id, a receiver id, or a parent
    /// action id for fanned-out children).
    pub cause: String,
    pub owner: Option<String>,
    pub timeout: std::time::Duration,
    pub depends_on: HashSet<Uuid>,
    pub depended_by: HashSet<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    pub fn new(target_id: Uuid, action_name: impl Into<String>, cause: impl Into<String>) -> Self {
        let now = Utc::now();
        Action {
            id: Uuid::new_v4(),
            target_id,
            action_name: action_name.into(),
            inputs: Value::Null,
            outputs: Value::Null,
            data: Value::Null,
            status: ActionStatus::Init,
            result_code: None,
            result_reason: None,
            cause: cause.into(),
            owner: None,
            timeout: std::time::Duration::from_secs(3600),
            depends_on: HashSet::new(),
            depended_by: HashSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// True once every entry in `depends_on` has been recorded as
    /// terminal-success by the caller (the repository tracks this; this
    /// helper is for tests and in-memory bookkeeping).
    pub fn has_no_dependencies(&self) -> bool {
        self.depends_on.is_empty()
    }
}
