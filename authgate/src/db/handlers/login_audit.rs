use sqlx::PgConnection;
use tracing::instrument;

use crate::db::{
    errors::Result,
    models::login_audit::{LoginAuditCreateDBRequest, LoginAuditDBResponse},
};

/// Upper bound on records returned by one listing
pub const MAX_AUDIT_RECORDS: i64 = 1000;

/// Filter for listing login audit records, newest first
#[derive(Debug, Clone)]
pub struct LoginAuditFilter {
    pub user_name: Option<String>,
    pub limit: i64,
}

impl Default for LoginAuditFilter {
    fn default() -> Self {
        Self {
            user_name: None,
            limit: 100,
        }
    }
}

pub struct LoginAuditRecords<'c> {
    db: &'c mut PgConnection,
}

/// The audit log is append-only, so this is not a full [`Repository`](super::Repository).
impl<'c> LoginAuditRecords<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_name = %request.user_name, state = ?request.login_state), err)]
    pub async fn create(&mut self, request: &LoginAuditCreateDBRequest) -> Result<LoginAuditDBResponse> {
        let record = sqlx::query_as::<_, LoginAuditDBResponse>(
            r#"
            INSERT INTO login_audit_log (user_name, remote_ip, user_agent, login_state, login_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_name, remote_ip, user_agent, login_state, login_at
            "#,
        )
        .bind(&request.user_name)
        .bind(&request.remote_ip)
        .bind(&request.user_agent)
        .bind(request.login_state)
        .bind(request.login_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(record)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: i64) -> Result<Option<LoginAuditDBResponse>> {
        let record = sqlx::query_as::<_, LoginAuditDBResponse>(
            "SELECT id, user_name, remote_ip, user_agent, login_state, login_at FROM login_audit_log WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(record)
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self, filter: &LoginAuditFilter) -> Result<Vec<LoginAuditDBResponse>> {
        let limit = filter.limit.clamp(1, MAX_AUDIT_RECORDS);
        let records = sqlx::query_as::<_, LoginAuditDBResponse>(
            r#"
            SELECT id, user_name, remote_ip, user_agent, login_state, login_at
            FROM login_audit_log
            WHERE $1::TEXT IS NULL OR user_name = $1
            ORDER BY login_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(&filter.user_name)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::login_audit::LoginState;
    use chrono::{Duration, TimeZone, Utc};
    use sqlx::PgPool;

    fn attempt(user_name: &str, state: LoginState, minutes: i64) -> LoginAuditCreateDBRequest {
        LoginAuditCreateDBRequest {
            user_name: user_name.to_string(),
            remote_ip: Some("192.0.2.10".to_string()),
            user_agent: Some("curl/8.5.0".to_string()),
            login_state: state,
            login_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes),
        }
    }

    #[sqlx::test]
    async fn test_records_are_listed_newest_first(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = LoginAuditRecords::new(&mut conn);

        let first = repo.create(&attempt("alice", LoginState::Failed, 0)).await.unwrap();
        repo.create(&attempt("alice", LoginState::Succeeded, 1)).await.unwrap();
        repo.create(&attempt("bob", LoginState::Succeeded, 2)).await.unwrap();

        assert_eq!(repo.get_by_id(first.id).await.unwrap(), Some(first));

        let all = repo.list(&LoginAuditFilter::default()).await.unwrap();
        assert_eq!(all.iter().map(|r| r.user_name.as_str()).collect::<Vec<_>>(), ["bob", "alice", "alice"]);

        let filter = LoginAuditFilter {
            user_name: Some("alice".to_string()),
            limit: 1,
        };
        let alice = repo.list(&filter).await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].login_state, LoginState::Succeeded);
    }
}
