use axum::{
    extract::{Path, Query, State},
    http::{HeaderName, StatusCode, header},
    response::Json,
};
use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use crate::{
    AppState,
    api::models::access_keys::{AccessKeyCreate, AccessKeyInfoResponse, AccessKeyResponse, ListAccessKeysQuery},
    auth::{
        current_user::SecurityContext,
        scopes::{ACCESS_KEY_READ_SCOPES, ACCESS_KEY_WRITE_SCOPES},
        token::{AccessToken, TokenCodec},
    },
    db::{
        errors::DbError,
        handlers::{AccessKeys, Repository, access_keys::AccessKeyFilter},
        models::access_keys::{AccessKeyCreateDBRequest, AccessKeyDBResponse},
    },
    errors::{Error, Result},
};

type Created = (StatusCode, [(HeaderName, String); 1], Json<AccessKeyResponse>);

fn require_scopes(context: &SecurityContext, allowed: &[&str], action: &str) -> Result<()> {
    if context.scopes_include_one_of(allowed) {
        Ok(())
    } else {
        Err(Error::Forbidden {
            message: format!("{action} requires one of the scopes {}", allowed.join(", ")),
        })
    }
}

fn not_found(key_id: &str) -> Error {
    Error::NotFound {
        resource: "Access key".to_string(),
        id: key_id.to_string(),
    }
}

fn new_key_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Sign the long-lived access token belonging to `key`.
fn key_token(codec: &TokenCodec, key: &AccessKeyDBResponse) -> Result<String> {
    let token = AccessToken::builder()
        .id(key.id.as_str())
        .subject(key.name.as_str())
        .scopes(key.scopes.clone())
        .issued_at(key.created_at)
        .build();
    codec.encode(&token)
}

fn created(codec: &TokenCodec, key: AccessKeyDBResponse) -> Result<Created> {
    let access_token = key_token(codec, &key)?;
    let location = format!("/api/v1/accesskeys/{}", key.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(AccessKeyResponse {
            key: key.into(),
            access_token,
        }),
    ))
}

/// Creation time stored with a key. Whole seconds, so the token's `iat` matches the row.
fn now_seconds(state: &AppState) -> DateTime<Utc> {
    state.clock.now().trunc_subsecs(0)
}

/// Decode a token submitted for validation or restoring. Undecodable input is a client error
/// here, not an authentication failure.
fn decode_submitted(codec: &TokenCodec, body: &str) -> Result<AccessToken> {
    codec.decode(body.trim()).map_err(|e| Error::Unprocessable {
        message: format!("Not a valid access token: {e}"),
    })
}

/// List access keys, optionally filtered by a name pattern.
#[tracing::instrument(skip_all)]
pub async fn list_access_keys(
    State(state): State<AppState>,
    Query(query): Query<ListAccessKeysQuery>,
    context: SecurityContext,
) -> Result<Json<Vec<AccessKeyInfoResponse>>> {
    require_scopes(&context, &ACCESS_KEY_READ_SCOPES, "Listing access keys")?;

    let mut conn = state.db()?.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let keys = AccessKeys::new(&mut conn)
        .list(&AccessKeyFilter {
            name_pattern: query.filter,
        })
        .await?;

    Ok(Json(keys.into_iter().map(Into::into).collect()))
}

#[tracing::instrument(skip_all, fields(key_id = %key_id))]
pub async fn get_access_key(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
    context: SecurityContext,
) -> Result<Json<AccessKeyInfoResponse>> {
    require_scopes(&context, &ACCESS_KEY_READ_SCOPES, "Reading access keys")?;

    let mut conn = state.db()?.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let key = AccessKeys::new(&mut conn)
        .get_by_id(key_id.clone())
        .await?
        .ok_or_else(|| not_found(&key_id))?;

    Ok(Json(key.into()))
}

/// Create an access key and return its access token.
///
/// This is the only time, besides renewal, that the token is returned.
#[tracing::instrument(skip_all, fields(name = %data.name))]
pub async fn create_access_key(
    State(state): State<AppState>,
    context: SecurityContext,
    Json(data): Json<AccessKeyCreate>,
) -> Result<Created> {
    require_scopes(&context, &ACCESS_KEY_WRITE_SCOPES, "Creating access keys")?;

    let name = data.name.trim();
    if name.is_empty() {
        return Err(Error::BadRequest {
            message: "Access key name cannot be empty".to_string(),
        });
    }

    let mut conn = state.db()?.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let key = AccessKeys::new(&mut conn)
        .create(&AccessKeyCreateDBRequest {
            id: new_key_id(),
            name: name.to_string(),
            description: data.description.filter(|d| !d.trim().is_empty()),
            scopes: data.scopes,
            created_at: now_seconds(&state),
        })
        .await?;

    tracing::info!(key_id = %key.id, "Access key created");
    created(&state.codec, key)
}

/// Replace a key's description. An empty body clears it.
#[tracing::instrument(skip_all, fields(key_id = %key_id))]
pub async fn update_access_key_description(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
    context: SecurityContext,
    description: String,
) -> Result<Json<AccessKeyInfoResponse>> {
    require_scopes(&context, &ACCESS_KEY_WRITE_SCOPES, "Updating access keys")?;

    let description = Some(description.trim()).filter(|d| !d.is_empty());
    let mut conn = state.db()?.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let key = AccessKeys::new(&mut conn)
        .update_description(&key_id, description)
        .await
        .map_err(|e| match e {
            DbError::NotFound => not_found(&key_id),
            other => other.into(),
        })?;

    Ok(Json(key.into()))
}

/// Issue a fresh token for a key. The old token stops working once the revocation cache
/// next checks it.
#[tracing::instrument(skip_all, fields(key_id = %key_id))]
pub async fn renew_access_key(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
    context: SecurityContext,
) -> Result<Created> {
    require_scopes(&context, &ACCESS_KEY_WRITE_SCOPES, "Renewing access keys")?;

    let mut tx = state.db()?.begin().await.map_err(|e| Error::Database(e.into()))?;

    let renewed = {
        let mut repo = AccessKeys::new(&mut tx);
        let old = repo.get_by_id(key_id.clone()).await?.ok_or_else(|| not_found(&key_id))?;
        repo.delete(old.id.clone()).await?;
        repo.create(&AccessKeyCreateDBRequest {
            id: new_key_id(),
            name: old.name,
            description: old.description,
            scopes: old.scopes,
            created_at: now_seconds(&state),
        })
        .await?
    };
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(new_key_id = %renewed.id, "Access key renewed");
    created(&state.codec, renewed)
}

/// Remove a key, revoking its token. Removing an unknown key succeeds.
#[tracing::instrument(skip_all, fields(key_id = %key_id))]
pub async fn delete_access_key(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
    context: SecurityContext,
) -> Result<StatusCode> {
    require_scopes(&context, &ACCESS_KEY_WRITE_SCOPES, "Removing access keys")?;

    let mut conn = state.db()?.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if AccessKeys::new(&mut conn).delete(key_id).await? {
        tracing::info!("Access key removed");
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Look up the key an access token belongs to.
#[tracing::instrument(skip_all)]
pub async fn validate_access_key(
    State(state): State<AppState>,
    context: SecurityContext,
    body: String,
) -> Result<Json<AccessKeyInfoResponse>> {
    require_scopes(&context, &ACCESS_KEY_READ_SCOPES, "Validating access keys")?;

    let token = decode_submitted(&state.codec, &body)?;
    let mut conn = state.db()?.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let key = AccessKeys::new(&mut conn)
        .get_by_id(token.id().to_string())
        .await?
        .ok_or_else(|| not_found(token.id()))?;

    Ok(Json(key.into()))
}

/// Recreate the key row for a previously issued token, e.g. after a database restore. The
/// token keeps working unchanged.
#[tracing::instrument(skip_all)]
pub async fn restore_access_key(
    State(state): State<AppState>,
    context: SecurityContext,
    body: String,
) -> Result<(StatusCode, [(HeaderName, String); 1], Json<AccessKeyInfoResponse>)> {
    require_scopes(&context, &ACCESS_KEY_WRITE_SCOPES, "Restoring access keys")?;

    let token = decode_submitted(&state.codec, &body)?;
    if token.is_temporary() {
        return Err(Error::Unprocessable {
            message: "Temporary access tokens cannot be restored".to_string(),
        });
    }

    let mut conn = state.db()?.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let key = AccessKeys::new(&mut conn)
        .create(&AccessKeyCreateDBRequest {
            id: token.id().to_string(),
            name: token.subject().to_string(),
            description: None,
            scopes: token.scopes().clone(),
            created_at: token.issued_at(),
        })
        .await
        .map_err(|e| match e {
            DbError::UniqueViolation { .. } => Error::Conflict {
                message: format!("An access key with id {} or name {} already exists", token.id(), token.subject()),
            },
            other => other.into(),
        })?;

    tracing::info!(key_id = %key.id, "Access key restored");
    let location = format!("/api/v1/accesskeys/{}", key.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(key.into())))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use chrono::Duration;
    use serde_json::json;
    use sqlx::PgPool;

    use crate::{
        api::models::{access_keys::*, auth::UserInfoResponse},
        auth::token::AccessToken,
        clock::Clock,
        test_utils::{TestApp, create_test_app, create_test_app_with_pool},
    };

    fn admin() -> String {
        format!("Basic {}", STANDARD.encode("admin:admin-secret"))
    }

    fn alice() -> String {
        format!("Basic {}", STANDARD.encode("alice:secret"))
    }

    async fn create_key(app: &TestApp, name: &str, scopes: &[&str]) -> AccessKeyResponse {
        let response = app
            .server
            .post("/api/v1/accesskeys")
            .add_header("authorization", admin())
            .json(&json!({"name": name, "description": "ci", "scopes": scopes}))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_created_key_authenticates_until_removed(pool: PgPool) {
        let app = create_test_app_with_pool(pool).await;

        let created = create_key(&app, "deployer", &["deploy"]).await;
        assert_eq!(created.key.name, "deployer");
        assert_eq!(created.key.description.as_deref(), Some("ci"));

        let bearer = format!("Bearer {}", created.access_token);
        let response = app.server.get("/api/v1/userinfo").add_header("authorization", bearer.clone()).await;
        response.assert_status_ok();
        let info: UserInfoResponse = response.json();
        assert_eq!(info.user_name, "deployer");
        assert!(info.scopes.contains("deploy"));

        app.server
            .delete(&format!("/api/v1/accesskeys/{}", created.key.id))
            .add_header("authorization", admin())
            .await
            .assert_status(StatusCode::NO_CONTENT);

        // Served from the revocation cache until the next check
        app.server
            .get("/api/v1/userinfo")
            .add_header("authorization", bearer.clone())
            .await
            .assert_status_ok();

        app.clock.advance_secs(61);
        app.server
            .get("/api/v1/userinfo")
            .add_header("authorization", bearer)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_sets_location_and_rejects_duplicates(pool: PgPool) {
        let app = create_test_app_with_pool(pool).await;

        let response = app
            .server
            .post("/api/v1/accesskeys")
            .add_header("authorization", admin())
            .json(&json!({"name": "deployer"}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: AccessKeyResponse = response.json();
        assert_eq!(
            response.headers().get("location").unwrap(),
            &format!("/api/v1/accesskeys/{}", created.key.id)
        );

        app.server
            .post("/api/v1/accesskeys")
            .add_header("authorization", admin())
            .json(&json!({"name": "deployer"}))
            .await
            .assert_status(StatusCode::CONFLICT);

        app.server
            .post("/api/v1/accesskeys")
            .add_header("authorization", admin())
            .json(&json!({"name": "  "}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_get_and_describe(pool: PgPool) {
        let app = create_test_app_with_pool(pool).await;
        let created = create_key(&app, "ci-build", &[]).await;
        create_key(&app, "monitoring", &[]).await;

        let keys: Vec<AccessKeyInfoResponse> = app
            .server
            .get("/api/v1/accesskeys")
            .add_query_param("filter", "^ci-")
            .add_header("authorization", admin())
            .await
            .json();
        assert_eq!(keys, vec![created.key.clone()]);

        let path = format!("/api/v1/accesskeys/{}", created.key.id);
        let fetched: AccessKeyInfoResponse = app.server.get(&path).add_header("authorization", admin()).await.json();
        assert_eq!(fetched, created.key);

        let described: AccessKeyInfoResponse = app
            .server
            .put(&format!("{path}/description"))
            .add_header("authorization", admin())
            .text("nightly builds")
            .await
            .json();
        assert_eq!(described.description.as_deref(), Some("nightly builds"));

        app.server
            .get("/api/v1/accesskeys/unknown")
            .add_header("authorization", admin())
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_renew_replaces_token(pool: PgPool) {
        let app = create_test_app_with_pool(pool).await;
        let original = create_key(&app, "deployer", &["deploy"]).await;

        let response = app
            .server
            .post(&format!("/api/v1/accesskeys/{}/_renew", original.key.id))
            .add_header("authorization", admin())
            .await;
        response.assert_status(StatusCode::CREATED);
        let renewed: AccessKeyResponse = response.json();

        assert_ne!(renewed.key.id, original.key.id);
        assert_eq!(renewed.key.name, original.key.name);
        assert_eq!(renewed.key.scopes, original.key.scopes);
        assert_eq!(renewed.key.description, original.key.description);

        app.clock.advance_secs(61);
        app.server
            .get("/api/v1/userinfo")
            .add_header("authorization", format!("Bearer {}", original.access_token))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        app.server
            .get("/api/v1/userinfo")
            .add_header("authorization", format!("Bearer {}", renewed.access_token))
            .await
            .assert_status_ok();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_validate_and_restore(pool: PgPool) {
        let app = create_test_app_with_pool(pool).await;
        let created = create_key(&app, "deployer", &["deploy"]).await;

        let validated: AccessKeyInfoResponse = app
            .server
            .post("/api/v1/accesskeys/_validate")
            .add_header("authorization", admin())
            .text(created.access_token.clone())
            .await
            .json();
        assert_eq!(validated.id, created.key.id);

        app.server
            .post("/api/v1/accesskeys/_validate")
            .add_header("authorization", admin())
            .text("garbage")
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

        // Restoring a live key conflicts with its row
        app.server
            .post("/api/v1/accesskeys/_restore")
            .add_header("authorization", admin())
            .text(created.access_token.clone())
            .await
            .assert_status(StatusCode::CONFLICT);

        app.server
            .delete(&format!("/api/v1/accesskeys/{}", created.key.id))
            .add_header("authorization", admin())
            .await
            .assert_status(StatusCode::NO_CONTENT);
        app.server
            .post("/api/v1/accesskeys/_validate")
            .add_header("authorization", admin())
            .text(created.access_token.clone())
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let restored = app
            .server
            .post("/api/v1/accesskeys/_restore")
            .add_header("authorization", admin())
            .text(created.access_token.clone())
            .await;
        restored.assert_status(StatusCode::CREATED);
        let restored: AccessKeyInfoResponse = restored.json();
        assert_eq!(restored.id, created.key.id);
        assert_eq!(restored.scopes, created.key.scopes);
        assert_eq!(restored.created_at, created.key.created_at);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_temporary_token_cannot_be_restored(pool: PgPool) {
        let app = create_test_app_with_pool(pool).await;
        let token = AccessToken::builder()
            .id("T1")
            .subject("alice")
            .temporary(true)
            .issued_at(app.clock.now())
            .expires_at(app.clock.now() + Duration::seconds(60))
            .build();
        let encoded = app.state.codec.encode(&token).unwrap();

        app.server
            .post("/api/v1/accesskeys/_restore")
            .add_header("authorization", admin())
            .text(encoded)
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_management_requires_admin_scopes(pool: PgPool) {
        let app = create_test_app_with_pool(pool).await;

        app.server
            .get("/api/v1/accesskeys")
            .add_header("authorization", alice())
            .await
            .assert_status(StatusCode::FORBIDDEN);
        app.server
            .post("/api/v1/accesskeys")
            .add_header("authorization", alice())
            .json(&json!({"name": "sneaky"}))
            .await
            .assert_status(StatusCode::FORBIDDEN);
        app.server
            .delete("/api/v1/accesskeys/K1")
            .add_header("authorization", alice())
            .await
            .assert_status(StatusCode::FORBIDDEN);
        app.server
            .get("/api/v1/accesskeys")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[test_log::test(tokio::test)]
    async fn test_unavailable_without_database() {
        let app = create_test_app().await;

        app.server
            .get("/api/v1/accesskeys")
            .add_header("authorization", admin())
            .await
            .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }
}
