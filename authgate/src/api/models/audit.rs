//! API request/response models for the login audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::login_audit::{LoginAuditDBResponse, LoginState};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListLoginsQuery {
    pub user_name: Option<String>,
    /// Maximum number of records, newest first
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAuditResponse {
    pub id: i64,
    pub user_name: String,
    pub remote_ip: Option<String>,
    pub user_agent: Option<String>,
    pub login_state: LoginState,
    pub login_at: DateTime<Utc>,
}

impl From<LoginAuditDBResponse> for LoginAuditResponse {
    fn from(record: LoginAuditDBResponse) -> Self {
        Self {
            id: record.id,
            user_name: record.user_name,
            remote_ip: record.remote_ip,
            user_agent: record.user_agent,
            login_state: record.login_state,
            login_at: record.login_at,
        }
    }
}
