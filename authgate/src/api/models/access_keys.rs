//! API request/response models for access keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::db::models::access_keys::AccessKeyDBResponse;

// Access key request models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessKeyCreate {
    /// Subject the key authenticates as; unique across keys
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListAccessKeysQuery {
    /// Regular expression the key name must match
    pub filter: Option<String>,
}

// Access key response models
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeyInfoResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub scopes: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl From<AccessKeyDBResponse> for AccessKeyInfoResponse {
    fn from(key: AccessKeyDBResponse) -> Self {
        Self {
            id: key.id,
            name: key.name,
            description: key.description,
            scopes: key.scopes,
            created_at: key.created_at,
        }
    }
}

/// Key metadata plus its access token. Only returned when a key is created or renewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeyResponse {
    #[serde(flatten)]
    pub key: AccessKeyInfoResponse,
    pub access_token: String,
}
