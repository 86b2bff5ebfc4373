//! OAuth 2.0 authorization code grant.
//!
//! `GET /oauth2/authorize` redirects back to the client with a short-lived code (or an
//! `error` parameter), and `POST /oauth2/token` lets the client exchange that code for a
//! temporary access token.

use axum::{
    Form, Json,
    extract::{Query, State},
    response::Redirect,
};
use chrono::Duration;
use tracing::{debug, info, instrument};
use url::Url;
use uuid::Uuid;

use crate::{
    AppState,
    api::models::oauth::{AuthorizeParams, TokenRequest, TokenResponse},
    auth::{code::CODE_LIFETIME_SECS, current_user::SecurityContext, token::AccessToken},
    errors::{AuthError, Error, Result},
};

/// Lifetime of access tokens obtained through the code grant.
const GRANTED_TOKEN_LIFETIME_SECS: i64 = CODE_LIFETIME_SECS;

/// First leg of the authorization code grant.
#[instrument(skip_all, fields(client_id = %params.client_id))]
pub async fn authorize(
    State(state): State<AppState>,
    context: Option<SecurityContext>,
    Query(params): Query<AuthorizeParams>,
) -> Result<Redirect> {
    let mut redirect = Url::parse(&params.redirect_uri).map_err(|e| Error::BadRequest {
        message: format!("Invalid redirect_uri: {e}"),
    })?;

    let subject = context.as_ref().and_then(|context| context.subject());
    {
        let mut query = redirect.query_pairs_mut();
        match subject {
            None => {
                debug!("Authorization requested without an authenticated user");
                query.append_pair("error", "unauthenticated");
            }
            Some(_) if params.response_type != "code" => {
                let error = AuthError::UnsupportedResponseType {
                    response_type: params.response_type.clone(),
                };
                info!(reason = error.reason_code(), "{}", error);
                query.append_pair("error", "unsupported_response_type");
            }
            Some(subject) => {
                let code = state.codes.create_code(&params.client_id, subject)?;
                query.append_pair("code", &code);
            }
        }
        if let Some(client_state) = &params.state {
            query.append_pair("state", client_state);
        }
    }

    Ok(Redirect::to(redirect.as_str()))
}

/// Exchange an authorization code for a temporary access token.
///
/// The caller must be authenticated as the client the code was issued to.
#[instrument(skip_all)]
pub async fn token(State(state): State<AppState>, context: SecurityContext, Form(request): Form<TokenRequest>) -> Result<Json<TokenResponse>> {
    if request.grant_type != "authorization_code" {
        return Err(Error::BadRequest {
            message: format!("Unsupported grant_type: {}", request.grant_type),
        });
    }

    let code = state.codes.decode_code(&request.code).ok_or_else(|| Error::Forbidden {
        message: "invalid or expired authorization code".to_string(),
    })?;

    let caller = context.subject().unwrap_or_default();
    if caller != code.client_id {
        return Err(AuthError::ClientMismatch {
            caller: caller.to_string(),
            client_id: code.client_id,
        }
        .into());
    }

    let scopes = state.directory.scopes_of(&code.subject).await?.ok_or_else(|| Error::Forbidden {
        message: format!("user {} no longer exists", code.subject),
    })?;

    let now = state.clock.now();
    let access_token = AccessToken::builder()
        .id(Uuid::new_v4().to_string())
        .subject(code.subject)
        .scopes(scopes)
        .temporary(true)
        .issued_at(now)
        .expires_at(now + Duration::seconds(GRANTED_TOKEN_LIFETIME_SECS))
        .build();

    Ok(Json(TokenResponse {
        access_token: state.codec.encode(&access_token)?,
        token_type: "Bearer".to_string(),
        expires_in: GRANTED_TOKEN_LIFETIME_SECS,
    }))
}
