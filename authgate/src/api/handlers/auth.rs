use axum::{
    Json,
    extract::{Request, State},
    http::HeaderMap,
};

use crate::{
    AppState,
    api::models::auth::{LogoutResponse, UserInfoResponse},
    auth::current_user::SecurityContext,
    errors::{Error, Result},
};

fn user_info(context: &SecurityContext) -> Result<UserInfoResponse> {
    let user_name = context.subject().ok_or(Error::Unauthenticated { message: None })?;
    Ok(UserInfoResponse {
        user_name: user_name.to_string(),
        scopes: context.scopes().clone(),
    })
}

/// Complete a password login.
///
/// Credentials are checked and the session cookie is set by the authentication middleware;
/// by the time this runs the caller is authenticated.
#[tracing::instrument(skip_all)]
pub async fn login(context: SecurityContext) -> Result<Json<UserInfoResponse>> {
    Ok(Json(user_info(&context)?))
}

/// Clear the caller's session credentials.
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, request: Request) -> (HeaderMap, Json<LogoutResponse>) {
    let (parts, _) = request.into_parts();
    let mut headers = HeaderMap::new();
    state.dispatcher.logout(&parts, &mut headers).await;

    (
        headers,
        Json(LogoutResponse {
            message: "Logged out".to_string(),
        }),
    )
}

/// Who the caller is authenticated as.
#[tracing::instrument(skip_all)]
pub async fn userinfo(context: SecurityContext) -> Result<Json<UserInfoResponse>> {
    Ok(Json(user_info(&context)?))
}
