//! The `Policy` entity: a typed checker identified by (type, version)
//! (spec §3, §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// `(phase, action_name)` the policy declares it should be invoked at,
/// mirroring the source's `TARGET` list (e.g. `[("AFTER", "CLUSTER_ADD_NODES")]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Before,
    After,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTarget {
    pub phase: Phase,
    pub action_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    /// Tag identifying the `PolicyKind` implementation (spec §9).
    pub type_tag: String,
    pub version: String,
    pub spec: Value,
    pub targets: Vec<PolicyTarget>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn new(
        name: impl Into<String>,
        type_tag: impl Into<String>,
        version: impl Into<String>,
        spec: Value,
        targets: Vec<PolicyTarget>,
    ) -> Self {
        let now = Utc::now();
        Policy {
            id: Uuid::new_v4(),
            name: name.into(),
            type_tag: type_tag.into(),
            version: version.into(),
            spec,
            targets,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn targets_hook(&self, phase: Phase, action_name: &str) -> bool {
        self.targets
            .iter()
            .any(|t| t.phase == phase && t.action_name == action_name)
    }
}
