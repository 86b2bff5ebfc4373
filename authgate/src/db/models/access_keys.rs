//! Database models for access keys.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Database request for storing an access key
#[derive(Debug, Clone)]
pub struct AccessKeyCreateDBRequest {
    /// Becomes the `jti` of the key's access token
    pub id: String,
    /// Becomes the subject of the key's access token; unique across keys
    pub name: String,
    pub description: Option<String>,
    pub scopes: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKeyDBResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub scopes: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}
