//! Audit trail of password logins.
//!
//! Every attempt at the login endpoint is recorded with its outcome, the caller's address
//! and user agent. Recording never decides the outcome: a failing audit sink is logged and
//! the login proceeds.

use async_trait::async_trait;
use axum::{
    extract::ConnectInfo,
    http::{header, request::Parts},
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::net::SocketAddr;
use tracing::{info, instrument};

use crate::db::{
    handlers::LoginAuditRecords,
    models::login_audit::{LoginAuditCreateDBRequest, LoginState},
};

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// One password login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    pub user_name: String,
    pub remote_ip: Option<String>,
    pub user_agent: Option<String>,
    pub state: LoginState,
    pub at: DateTime<Utc>,
}

impl LoginAttempt {
    /// Describe an attempt made by `request`. The address is the first `X-Forwarded-For`
    /// entry, falling back to the peer address of the connection.
    pub fn from_request(user_name: &str, request: &Parts, state: LoginState, at: DateTime<Utc>) -> Self {
        let forwarded = request
            .headers
            .get(X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string);
        let remote_ip = forwarded.or_else(|| {
            request
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

        let user_agent = request
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Self {
            user_name: user_name.to_string(),
            remote_ip,
            user_agent,
            state,
            at,
        }
    }
}

/// Sink for login attempts.
#[async_trait]
pub trait LoginAuditLog: Send + Sync {
    async fn record(&self, attempt: &LoginAttempt) -> anyhow::Result<()>;
}

/// Audit log persisted in the `login_audit_log` table.
#[derive(Debug, Clone)]
pub struct PgLoginAuditLog {
    pool: PgPool,
}

impl PgLoginAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LoginAuditLog for PgLoginAuditLog {
    #[instrument(skip_all, fields(user_name = %attempt.user_name))]
    async fn record(&self, attempt: &LoginAttempt) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        LoginAuditRecords::new(&mut conn)
            .create(&LoginAuditCreateDBRequest {
                user_name: attempt.user_name.clone(),
                remote_ip: attempt.remote_ip.clone(),
                user_agent: attempt.user_agent.clone(),
                login_state: attempt.state,
                login_at: attempt.at,
            })
            .await?;
        Ok(())
    }
}

/// Audit log written to the application log only, used when no database is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLoginAuditLog;

#[async_trait]
impl LoginAuditLog for TracingLoginAuditLog {
    async fn record(&self, attempt: &LoginAttempt) -> anyhow::Result<()> {
        info!(
            user_name = %attempt.user_name,
            remote_ip = attempt.remote_ip.as_deref().unwrap_or("-"),
            user_agent = attempt.user_agent.as_deref().unwrap_or("-"),
            state = ?attempt.state,
            "Login attempt"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use chrono::TimeZone;
    use sqlx::PgPool;

    use crate::db::handlers::login_audit::LoginAuditFilter;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_forwarded_address_wins_over_peer() {
        let mut request = Request::builder()
            .header(X_FORWARDED_FOR, "203.0.113.7, 10.0.0.1")
            .header(header::USER_AGENT, "curl/8.5.0")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 40000))));
        let (parts, _) = request.into_parts();

        let attempt = LoginAttempt::from_request("alice", &parts, LoginState::Succeeded, at());

        assert_eq!(attempt.remote_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(attempt.user_agent.as_deref(), Some("curl/8.5.0"));
    }

    #[test]
    fn test_peer_address_without_forwarding() {
        let mut request = Request::builder().body(()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 10], 40000))));
        let (parts, _) = request.into_parts();

        let attempt = LoginAttempt::from_request("alice", &parts, LoginState::Failed, at());

        assert_eq!(attempt.remote_ip.as_deref(), Some("192.0.2.10"));
        assert_eq!(attempt.user_agent, None);

        let (bare, _) = Request::builder().body(()).unwrap().into_parts();
        assert_eq!(LoginAttempt::from_request("alice", &bare, LoginState::Failed, at()).remote_ip, None);
    }

    #[sqlx::test]
    async fn test_pg_audit_log_persists_attempts(pool: PgPool) {
        let log = PgLoginAuditLog::new(pool.clone());
        let (parts, _) = Request::builder()
            .header(X_FORWARDED_FOR, "203.0.113.7")
            .body(())
            .unwrap()
            .into_parts();

        log.record(&LoginAttempt::from_request("alice", &parts, LoginState::Failed, at()))
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let records = LoginAuditRecords::new(&mut conn).list(&LoginAuditFilter::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_name, "alice");
        assert_eq!(records[0].remote_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(records[0].login_state, LoginState::Failed);
    }
}
