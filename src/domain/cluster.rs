//! The `Cluster` entity (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    Init,
    Creating,
    Active,
    Updating,
    Resizing,
    Deleting,
    Warning,
    Error,
}

/// `-1` means unbounded, matching the source's use of a sentinel rather than
/// an `Option` (max_size participates in arithmetic comparisons throughout
/// §4.5's resize logic, where `Option` would need unwrapping at every site).
pub const UNBOUNDED: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Uuid,
    pub name: String,
    pub profile_id: Uuid,
    pub desired_capacity: i64,
    pub min_size: i64,
    pub max_size: i64,
    pub timeout: std::time::Duration,
    pub parent_cluster_id: Option<Uuid>,
    pub metadata: HashMap<String, Value>,
    pub status: ClusterStatus,
    pub status_reason: String,
    /// Monotone counter read-and-incremented under the cluster lock to
    /// assign node indices (spec §4.4, §4.7).
    pub next_node_index: i64,
    pub owner_user: String,
    pub owner_project: String,
    pub owner_domain: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cluster {
    pub fn new(
        name: impl Into<String>,
        profile_id: Uuid,
        desired_capacity: i64,
        min_size: i64,
        max_size: i64,
        owner_user: impl Into<String>,
        owner_project: impl Into<String>,
        owner_domain: impl Into<String>,
    ) -> Result<Self> {
        let now = Utc::now();
        let cluster = Cluster {
            id: Uuid::new_v4(),
            name: name.into(),
            profile_id,
            desired_capacity,
            min_size,
            max_size,
            timeout: std::time::Duration::from_secs(3600),
            parent_cluster_id: None,
            metadata: HashMap::new(),
            status: ClusterStatus::Init,
            status_reason: String::new(),
            next_node_index: 1,
            owner_user: owner_user.into(),
            owner_project: owner_project.into(),
            owner_domain: owner_domain.into(),
            created_at: now,
            updated_at: now,
        };
        cluster.check_invariants()?;
        Ok(cluster)
    }

    /// spec §3: `min_size <= desired_capacity`; `max_size == -1` or
    /// `max_size >= desired_capacity && max_size >= min_size`.
    pub fn check_invariants(&self) -> Result<()> {
        if self.min_size > self.desired_capacity {
            return Err(EngineError::InvariantViolation(format!(
                "min_size ({}) exceeds desired_capacity ({})",
                self.min_size, self.desired_capacity
            )));
        }
        if self.max_size != UNBOUNDED
            && (self.max_size < self.desired_capacity || self.max_size < self.min_size)
        {
            return Err(EngineError::InvariantViolation(format!(
                "max_size ({}) must be -1 or >= desired_capacity ({}) and >= min_size ({})",
                self.max_size, self.desired_capacity, self.min_size
            )));
        }
        Ok(())
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_size == UNBOUNDED
    }
}
