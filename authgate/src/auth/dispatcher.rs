//! Request classification and the ordered chain of credential handlers.
//!
//! Each request is classified as a login, an anonymous route, an optionally authenticated
//! route or a protected route. For authenticated routes the handlers are consulted in
//! configuration order and the first definitive verdict wins:
//!
//! - [`Verdict::NotApplicable`] means the handler found no credential it understands, and
//!   the next handler is asked.
//! - [`Verdict::Invalid`] rejects the request immediately. Later handlers are not consulted,
//!   so a bad credential can never be rescued by a different scheme.
//! - [`Verdict::Valid`] authenticates the request.
//!
//! If no handler produces a verdict, protected routes are rejected.

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, request::Parts};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, error, instrument, trace, warn};

use crate::{
    api::models::auth::LoginRequest,
    auth::{current_user::SecurityContext, directory::UserDirectory},
    config::RouteConfig,
    errors::Result,
};

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub scopes: BTreeSet<String>,
}

impl Principal {
    pub fn new(subject: impl Into<String>, scopes: BTreeSet<String>) -> Self {
        Self {
            subject: subject.into(),
            scopes,
        }
    }
}

/// What a credential handler concluded about a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    NotApplicable,
    Invalid,
    Valid(Principal),
}

/// One credential scheme.
///
/// Handlers may append headers (typically `Set-Cookie`) to `response`; the middleware copies
/// them onto whatever response the request ends up with.
#[async_trait]
pub trait CredentialHandler: Send + Sync {
    /// Short scheme name used in logs.
    fn scheme(&self) -> &'static str;

    async fn validate(&self, request: &Parts, response: &mut HeaderMap) -> Verdict;

    /// Establish credentials for a freshly logged-in principal. Returns `true` if this handler
    /// issued something, which ends the issuing round.
    async fn issue(&self, _principal: &Principal, _request: &Parts, _response: &mut HeaderMap) -> Result<bool> {
        Ok(false)
    }

    /// Clear whatever this handler issued.
    async fn invalidate(&self, _request: &Parts, _response: &mut HeaderMap) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Login,
    Anonymous,
    Optional,
    Protected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Authenticated(SecurityContext),
    Rejected,
    Anonymous,
}

pub struct AuthenticationDispatcher {
    handlers: Vec<Arc<dyn CredentialHandler>>,
    directory: Arc<dyn UserDirectory>,
    routes: RouteConfig,
}

impl std::fmt::Debug for AuthenticationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationDispatcher")
            .field("handlers", &self.handlers.iter().map(|h| h.scheme()).collect::<Vec<_>>())
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

/// `path` equals `prefix` or lies below it.
fn is_under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

impl AuthenticationDispatcher {
    pub fn new(handlers: Vec<Arc<dyn CredentialHandler>>, directory: Arc<dyn UserDirectory>, routes: RouteConfig) -> Self {
        Self {
            handlers,
            directory,
            routes,
        }
    }

    pub fn classify(&self, method: &Method, path: &str) -> RouteKind {
        if method == Method::POST && path == self.routes.login_path {
            RouteKind::Login
        } else if is_under(path, &self.routes.anonymous_prefix) {
            RouteKind::Anonymous
        } else if self.routes.optional_prefixes.iter().any(|prefix| is_under(path, prefix)) {
            RouteKind::Optional
        } else if self.routes.protected_prefixes.iter().any(|prefix| is_under(path, prefix)) {
            RouteKind::Protected
        } else {
            RouteKind::Anonymous
        }
    }

    /// Run the handler chain against a protected request. Requests no handler recognises are
    /// rejected.
    #[instrument(skip_all, fields(path = %request.uri.path()))]
    pub async fn authenticate(&self, request: &Parts, response: &mut HeaderMap) -> Outcome {
        self.run_chain(request, response).await.unwrap_or_else(|| {
            debug!("No credentials recognised");
            Outcome::Rejected
        })
    }

    /// Like [`authenticate`](Self::authenticate), but requests without credentials continue
    /// anonymously. Credentials that are present and invalid are still rejected.
    #[instrument(skip_all, fields(path = %request.uri.path()))]
    pub async fn authenticate_optional(&self, request: &Parts, response: &mut HeaderMap) -> Outcome {
        self.run_chain(request, response).await.unwrap_or(Outcome::Anonymous)
    }

    /// `None` if no handler recognised any credentials.
    async fn run_chain(&self, request: &Parts, response: &mut HeaderMap) -> Option<Outcome> {
        for handler in &self.handlers {
            match handler.validate(request, response).await {
                Verdict::NotApplicable => trace!(scheme = handler.scheme(), "Handler not applicable"),
                Verdict::Invalid => {
                    debug!(scheme = handler.scheme(), "Credentials rejected");
                    return Some(Outcome::Rejected);
                }
                Verdict::Valid(principal) => {
                    debug!(scheme = handler.scheme(), subject = %principal.subject, "Request authenticated");
                    return Some(Outcome::Authenticated(SecurityContext::authenticated(
                        principal.subject,
                        principal.scopes,
                    )));
                }
            }
        }
        None
    }

    /// Check user name and password, then let the handlers establish credentials for the
    /// new principal (the first handler that issues something ends the round).
    #[instrument(skip_all, fields(user_name = %credentials.user_name))]
    pub async fn login(&self, credentials: &LoginRequest, request: &Parts, response: &mut HeaderMap) -> Outcome {
        let subject = match self
            .directory
            .validate_credentials(&credentials.user_name, &credentials.password)
            .await
        {
            Ok(Some(subject)) => subject,
            Ok(None) => {
                debug!("Login failed");
                return Outcome::Rejected;
            }
            Err(e) => {
                error!("Credential validation failed: {:#}", e);
                return Outcome::Rejected;
            }
        };

        let scopes = match self.directory.scopes_of(&subject).await {
            Ok(Some(scopes)) => scopes,
            Ok(None) => {
                warn!("User disappeared between credential check and scope lookup");
                return Outcome::Rejected;
            }
            Err(e) => {
                error!("Scope lookup failed: {:#}", e);
                return Outcome::Rejected;
            }
        };

        let principal = Principal::new(subject, scopes);
        for handler in &self.handlers {
            match handler.issue(&principal, request, response).await {
                Ok(true) => {
                    debug!(scheme = handler.scheme(), "Issued credentials");
                    break;
                }
                Ok(false) => {}
                Err(e) => warn!(scheme = handler.scheme(), "Failed to issue credentials: {:#}", e),
            }
        }

        Outcome::Authenticated(SecurityContext::authenticated(principal.subject, principal.scopes))
    }

    /// Give every handler the chance to clear its credentials.
    pub async fn logout(&self, request: &Parts, response: &mut HeaderMap) {
        for handler in &self.handlers {
            handler.invalidate(request, response).await;
        }
    }
}
