//! `Event`: the chronological log entry referenced by spec §6/§7. Every
//! status transition on a `Cluster`, `Node`, or `Action` is expected to
//! append one of these so a caller can reconstruct "what happened" without
//! re-deriving it from status alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub entity_type: String,
    pub action: Option<Uuid>,
    pub level: EventLevel,
    pub status: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        entity_id: Uuid,
        entity_type: impl Into<String>,
        level: EventLevel,
        status: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Event {
            id: Uuid::new_v4(),
            entity_id,
            entity_type: entity_type.into(),
            action: None,
            level,
            status: status.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn for_action(mut self, action_id: Uuid) -> Self {
        self.action = Some(action_id);
        self
    }
}
