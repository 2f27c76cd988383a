//! `RequestContext`: the immutable value threaded through every repository
//! call and driver construction (spec §9 "Credentials and tenant scoping").

use serde::{Deserialize, Serialize};

/// Resolves the spec's `trusts`/`trust_id` naming ambiguity (§9 open
/// question) in favor of a single field, `trust_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub user: String,
    pub project: String,
    pub domain: String,
    pub roles: Vec<String>,
    pub auth_url: String,
    pub trust_id: Option<String>,
    pub is_admin: bool,
}

impl RequestContext {
    pub fn new(user: impl Into<String>, project: impl Into<String>, domain: impl Into<String>) -> Self {
        RequestContext {
            user: user.into(),
            project: project.into(),
            domain: domain.into(),
            roles: Vec::new(),
            auth_url: String::new(),
            trust_id: None,
            is_admin: false,
        }
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn with_trust_id(mut self, trust_id: impl Into<String>) -> Self {
        self.trust_id = Some(trust_id.into());
        self
    }
}

/// Opaque bundle looked up per (user, project); the core only ever extracts
/// `trust_id` from it (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub trust_id: String,
}
