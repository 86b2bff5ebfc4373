//! Database models for the login audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a password login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoginState {
    Succeeded,
    Failed,
}

/// Database request for appending a login attempt
#[derive(Debug, Clone)]
pub struct LoginAuditCreateDBRequest {
    pub user_name: String,
    pub remote_ip: Option<String>,
    pub user_agent: Option<String>,
    pub login_state: LoginState,
    pub login_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LoginAuditDBResponse {
    pub id: i64,
    pub user_name: String,
    pub remote_ip: Option<String>,
    pub user_agent: Option<String>,
    pub login_state: LoginState,
    pub login_at: DateTime<Utc>,
}
