//! The authentication middleware placed in front of every route.
//!
//! Login requests are authenticated from their JSON body, protected and optional routes run
//! the credential handler chain, and anonymous routes pass straight through. Every login
//! attempt is written to the [`LoginAuditLog`](crate::auth::audit::LoginAuditLog). Headers the
//! handlers produce (renewed or cleared session cookies) are copied onto the final response,
//! including the generic 401.

use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{trace, warn};

use crate::{
    AppState,
    api::models::auth::LoginRequest,
    auth::{
        audit::LoginAttempt,
        dispatcher::{Outcome, RouteKind},
    },
    db::models::login_audit::LoginState,
    errors::{Error, unauthorized_response},
};

/// Upper bound on login request bodies.
const MAX_LOGIN_BODY: usize = 64 * 1024;

/// Implementation for authentication_middleware. Returns the request to pass on, with a sealed
/// [`SecurityContext`](crate::auth::current_user::SecurityContext) attached when authenticated,
/// or `None` if the request must be rejected. Headers the handlers want on the response are
/// collected in `issued`.
pub(crate) async fn authenticate(state: &AppState, request: Request, issued: &mut HeaderMap) -> Result<Option<Request>, Error> {
    let route = state.dispatcher.classify(request.method(), request.uri().path());
    trace!(?route, path = %request.uri().path(), "Classified request");

    let (mut parts, body) = request.into_parts();

    let (outcome, body) = match route {
        RouteKind::Anonymous => (Outcome::Anonymous, body),
        RouteKind::Protected => (state.dispatcher.authenticate(&parts, issued).await, body),
        RouteKind::Optional => (state.dispatcher.authenticate_optional(&parts, issued).await, body),
        RouteKind::Login => {
            let bytes = axum::body::to_bytes(body, MAX_LOGIN_BODY).await.map_err(|_| Error::BadRequest {
                message: "Failed to read request body".to_string(),
            })?;
            let credentials: LoginRequest = serde_json::from_slice(&bytes).map_err(|e| Error::BadRequest {
                message: format!("Invalid login request: {e}"),
            })?;

            let outcome = state.dispatcher.login(&credentials, &parts, issued).await;
            let login_state = match outcome {
                Outcome::Authenticated(_) => LoginState::Succeeded,
                _ => LoginState::Failed,
            };
            let attempt = LoginAttempt::from_request(&credentials.user_name, &parts, login_state, state.clock.now());
            if let Err(e) = state.audit.record(&attempt).await {
                warn!("Failed to record login attempt: {:#}", e);
            }

            (outcome, Body::from(bytes))
        }
    };

    match outcome {
        Outcome::Rejected => Ok(None),
        Outcome::Authenticated(context) => {
            parts.extensions.insert(context);
            Ok(Some(Request::from_parts(parts, body)))
        }
        Outcome::Anonymous => Ok(Some(Request::from_parts(parts, body))),
    }
}

/// Middleware running the credential handlers in front of every route.
pub async fn authentication_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let mut issued = HeaderMap::new();

    let mut response = match authenticate(&state, request, &mut issued).await {
        Ok(Some(request)) => next.run(request).await,
        Ok(None) => unauthorized_response(),
        Err(e) => e.into_response(),
    };

    let headers = response.headers_mut();
    for (name, value) in issued.iter() {
        headers.append(name.clone(), value.clone());
    }
    response
}
