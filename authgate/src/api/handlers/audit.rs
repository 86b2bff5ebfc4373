use axum::{
    extract::{Query, State},
    response::Json,
};

use crate::{
    AppState,
    api::models::audit::{ListLoginsQuery, LoginAuditResponse},
    auth::{current_user::SecurityContext, scopes::AUDIT_READ_SCOPES},
    db::handlers::{LoginAuditRecords, login_audit::LoginAuditFilter},
    errors::{Error, Result},
};

/// List recorded login attempts, newest first.
#[tracing::instrument(skip_all)]
pub async fn list_logins(
    State(state): State<AppState>,
    Query(query): Query<ListLoginsQuery>,
    context: SecurityContext,
) -> Result<Json<Vec<LoginAuditResponse>>> {
    if !context.scopes_include_one_of(&AUDIT_READ_SCOPES) {
        return Err(Error::Forbidden {
            message: "Reading the login audit log requires an administrative scope".to_string(),
        });
    }

    let mut filter = LoginAuditFilter {
        user_name: query.user_name,
        ..Default::default()
    };
    if let Some(limit) = query.limit {
        filter.limit = limit;
    }

    let mut conn = state.db()?.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let records = LoginAuditRecords::new(&mut conn).list(&filter).await?;

    Ok(Json(records.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde_json::json;
    use sqlx::PgPool;

    use crate::{
        api::models::audit::LoginAuditResponse,
        db::models::login_audit::LoginState,
        test_utils::create_test_app_with_pool,
    };

    #[sqlx::test]
    #[test_log::test]
    async fn test_logins_are_recorded(pool: PgPool) {
        let app = create_test_app_with_pool(pool).await;

        app.server
            .post("/api/v1/login/_login")
            .add_header("x-forwarded-for", "203.0.113.7")
            .add_header("user-agent", "curl/8.5.0")
            .json(&json!({"user_name": "alice", "password": "wrong"}))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        app.clock.advance_secs(1);
        app.server
            .post("/api/v1/login/_login")
            .json(&json!({"user_name": "alice", "password": "secret"}))
            .await
            .assert_status_ok();

        let records: Vec<LoginAuditResponse> = app
            .server
            .get("/api/v1/audit/logins")
            .add_query_param("user_name", "alice")
            .add_header("authorization", format!("Basic {}", STANDARD.encode("admin:admin-secret")))
            .await
            .json();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].login_state, LoginState::Succeeded);
        assert_eq!(records[1].login_state, LoginState::Failed);
        assert_eq!(records[1].remote_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(records[1].user_agent.as_deref(), Some("curl/8.5.0"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_audit_log_requires_admin_scope(pool: PgPool) {
        let app = create_test_app_with_pool(pool).await;

        app.server
            .get("/api/v1/audit/logins")
            .add_header("authorization", format!("Basic {}", STANDARD.encode("alice:secret")))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}
