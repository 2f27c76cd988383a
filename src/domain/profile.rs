//! The `Profile` entity: an opaque templated spec describing how to create a
//! node (spec §3). Immutable once stored except for `name`/`metadata`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    /// Tag identifying the `ProfileKind` this profile is interpreted by
    /// (spec §9: tagged variants, not class inheritance).
    pub type_tag: String,
    pub version: String,
    pub spec: Value,
    /// Credential-scoped parameters resolved at use time, not stored
    /// verbatim across tenants.
    pub context: Value,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(
        name: impl Into<String>,
        type_tag: impl Into<String>,
        version: impl Into<String>,
        spec: Value,
    ) -> Self {
        let now = Utc::now();
        Profile {
            id: Uuid::new_v4(),
            name: name.into(),
            type_tag: type_tag.into(),
            version: version.into(),
            spec,
            context: Value::Null,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
