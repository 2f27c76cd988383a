//! The `Node` entity (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Init,
    Creating,
    Active,
    Updating,
    Deleting,
    Error,
    Warning,
}

/// `-1` when the node is an orphan (no owning cluster).
pub const ORPHAN_INDEX: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub name: String,
    pub profile_id: Uuid,
    pub cluster_id: Option<Uuid>,
    pub index: i64,
    pub role: String,
    /// Set once the Infrastructure Driver has provisioned the backing
    /// resource.
    pub physical_id: Option<String>,
    pub status: NodeStatus,
    /// Free-form runtime facts: load-balancer member id, placement hints.
    pub data: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new_orphan(name: impl Into<String>, profile_id: Uuid, role: impl Into<String>) -> Self {
        let now = Utc::now();
        Node {
            id: Uuid::new_v4(),
            name: name.into(),
            profile_id,
            cluster_id: None,
            index: ORPHAN_INDEX,
            role: role.into(),
            physical_id: None,
            status: NodeStatus::Init,
            data: HashMap::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// spec §3: `cluster_id` set ⇒ `index >= 1`; `cluster_id` unset ⇒
    /// `index == -1`.
    pub fn check_invariants(&self) -> Result<()> {
        match self.cluster_id {
            Some(_) if self.index < 1 => Err(EngineError::InvariantViolation(format!(
                "node {} belongs to a cluster but has index {}",
                self.id, self.index
            ))),
            None if self.index != ORPHAN_INDEX => Err(EngineError::InvariantViolation(format!(
                "orphan node {} has non-sentinel index {}",
                self.id, self.index
            ))),
            _ => Ok(()),
        }
    }

    pub fn is_orphan(&self) -> bool {
        self.cluster_id.is_none()
    }

    pub fn join(&mut self, cluster_id: Uuid, index: i64) {
        self.cluster_id = Some(cluster_id);
        self.index = index;
        self.updated_at = Utc::now();
    }

    pub fn leave(&mut self) {
        self.cluster_id = None;
        self.index = ORPHAN_INDEX;
        self.updated_at = Utc::now();
    }
}
