//! The `Receiver` entity: an external trigger (e.g. a webhook) that invokes
//! a named cluster action with pre-bound credentials (spec §3, GLOSSARY;
//! `channel` supplemented from `senlin.engine.receiver`).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverType {
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receiver {
    pub id: Uuid,
    pub name: String,
    pub receiver_type: ReceiverType,
    pub user: String,
    pub project: String,
    pub domain: String,
    pub cluster_id: Uuid,
    pub action: String,
    pub actor: HashMap<String, Value>,
    pub params: HashMap<String, Value>,
    /// Populated by `ReceiverKind::initialize_channel` at creation time; a
    /// webhook receiver carries the URL the caller should invoke.
    pub channel: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Capability set for receiver kinds (spec §9: tagged variants rather than
/// class inheritance). Only `Webhook` is implemented; other kinds would
/// return a "not applicable" channel.
#[async_trait]
pub trait ReceiverKind: Send + Sync {
    async fn initialize_channel(&self, receiver: &Receiver) -> Value;
}

pub struct WebhookReceiverKind {
    pub base_url: String,
}

#[async_trait]
impl ReceiverKind for WebhookReceiverKind {
    async fn initialize_channel(&self, receiver: &Receiver) -> Value {
        serde_json::json!({ "alarm_url": format!("{}/v1/webhooks/{}/trigger", self.base_url, receiver.id) })
    }
}

impl Receiver {
    pub fn new(
        name: impl Into<String>,
        receiver_type: ReceiverType,
        user: impl Into<String>,
        project: impl Into<String>,
        domain: impl Into<String>,
        cluster_id: Uuid,
        action: impl Into<String>,
    ) -> Self {
        Receiver {
            id: Uuid::new_v4(),
            name: name.into(),
            receiver_type,
            user: user.into(),
            project: project.into(),
            domain: domain.into(),
            cluster_id,
            action: action.into(),
            actor: HashMap::new(),
            params: HashMap::new(),
            channel: Value::Null,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        }
    }
}
