//! The `ClusterPolicy` binding: the row joining a cluster with a policy
//! (spec §3, §4.6).
//!
//! The original `senlin.engine.cluster_policy.ClusterPolicy` stores
//! `cluster_name`/`policy_name`/`policy_type` denormalized on the row "for
//! convenience". We carry ids only (spec §9: "IDs only, plus repository
//! lookups — never bidirectional object pointers") and expose the same
//! convenience as on-demand accessors in [`crate::repository::Repository`]
//! instead (see `Repository::cluster_policy_cluster_name` and friends).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterPolicyBinding {
    pub cluster_id: Uuid,
    pub policy_id: Uuid,
    pub priority: u8,
    pub level: u8,
    pub cooldown: std::time::Duration,
    pub enabled: bool,
    /// Policy-private state, e.g. an LB-member policy's pool membership map.
    pub data: Value,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub attached_at: DateTime<Utc>,
}

impl ClusterPolicyBinding {
    pub fn new(cluster_id: Uuid, policy_id: Uuid) -> Self {
        ClusterPolicyBinding {
            cluster_id,
            policy_id,
            priority: 50,
            level: 50,
            cooldown: std::time::Duration::from_secs(0),
            enabled: true,
            data: Value::Null,
            last_fired_at: None,
            attached_at: Utc::now(),
        }
    }

    /// True when this binding fired successfully within the last
    /// `cooldown` seconds (spec §4.6).
    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        match self.last_fired_at {
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed.num_seconds() >= 0
                    && (elapsed.num_seconds() as u64) < self.cooldown.as_secs()
            }
            None => false,
        }
    }

    pub fn mark_fired(&mut self, now: DateTime<Utc>) {
        self.last_fired_at = Some(now);
    }
}
