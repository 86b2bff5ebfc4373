//! Browser sessions carried in a signed cookie.
//!
//! After a successful login the session manager sets a cookie holding an RSA-signed JWT with
//! the subject, its scopes and an expiry. Sessions close to expiry are renewed on use: when a
//! request arrives within the refresh window, a fresh token with re-read scopes is issued
//! alongside the response, while the request itself still runs with the claims it arrived
//! with. Expired and unverifiable cookies are cleared.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, header::SET_COOKIE, request::Parts};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, instrument, trace, warn};

use crate::{
    auth::{
        directory::UserDirectory,
        dispatcher::{CredentialHandler, Principal, Verdict},
        token::{join_scopes, split_scopes},
        utils::{find_cookie, is_secure},
    },
    clock::Clock,
    config::SessionConfig,
    errors::{AuthError, Error, Result},
    keys::KeyPair,
};

/// JWT session claims
#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    scope: String,
    iat: i64,
    exp: i64,
}

/// Decoded contents of a session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub subject: String,
    pub scopes: BTreeSet<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionCookieManager {
    keys: KeyPair,
    algorithm: Algorithm,
    cookie_name: String,
    ttl: Duration,
    refresh: Duration,
    directory: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionCookieManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCookieManager")
            .field("kid", &self.keys.kid())
            .field("cookie_name", &self.cookie_name)
            .field("ttl", &self.ttl)
            .field("refresh", &self.refresh)
            .finish_non_exhaustive()
    }
}

fn to_chrono(duration: std::time::Duration) -> Result<Duration> {
    Duration::from_std(duration).map_err(|e| Error::Internal {
        operation: format!("convert session duration: {e}"),
    })
}

impl SessionCookieManager {
    pub fn new(keys: KeyPair, config: &SessionConfig, directory: Arc<dyn UserDirectory>, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            keys,
            algorithm: config.algorithm,
            cookie_name: config.cookie_name.clone(),
            ttl: to_chrono(config.ttl)?,
            refresh: to_chrono(config.refresh)?,
            directory,
            clock,
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Sign a session token.
    pub fn create_session_token(&self, session: &SessionToken) -> Result<String> {
        let claims = SessionClaims {
            sub: session.subject.clone(),
            scope: join_scopes(&session.scopes, " "),
            iat: session.issued_at.timestamp(),
            exp: session.expires_at.timestamp(),
        };

        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.keys.kid().to_string());

        encode(&header, &claims, self.keys.encoding_key()).map_err(|e| Error::Internal {
            operation: format!("create session JWT: {e}"),
        })
    }

    /// Verify the signature of a session token and decode it. Expiry is not checked here.
    pub fn verify_session_token(&self, token: &str) -> std::result::Result<SessionToken, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::malformed(format!("session header: {e}")))?;
        if !matches!(header.alg, Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512) {
            return Err(AuthError::InvalidSignature);
        }
        if header.kid.as_deref() != Some(self.keys.kid()) {
            return Err(AuthError::InvalidSignature);
        }

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_aud = false;

        let data = decode::<SessionClaims>(token, self.keys.decoding_key(), &validation).map_err(|e| {
            trace!("Session token rejected: {}", e);
            AuthError::InvalidSignature
        })?;

        let claims = data.claims;
        let issued_at = DateTime::from_timestamp(claims.iat, 0).ok_or_else(|| AuthError::malformed("iat out of range"))?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0).ok_or_else(|| AuthError::malformed("exp out of range"))?;

        Ok(SessionToken {
            subject: claims.sub,
            scopes: split_scopes(&claims.scope, ' '),
            issued_at,
            expires_at,
        })
    }

    /// Build the `Set-Cookie` value for a new session of `subject`.
    async fn session_cookie(&self, subject: &str, scopes: BTreeSet<String>, secure: bool) -> Result<HeaderValue> {
        let ttl = match self.directory.session_ttl(subject).await? {
            Some(ttl) => to_chrono(ttl)?,
            None => self.ttl,
        };
        let now = self.clock.now();
        let session = SessionToken {
            subject: subject.to_string(),
            scopes,
            issued_at: now,
            expires_at: now + ttl,
        };
        let token = self.create_session_token(&session)?;

        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.cookie_name,
            token,
            ttl.num_seconds()
        );
        if secure {
            cookie.push_str("; Secure");
        }

        HeaderValue::from_str(&cookie).map_err(|e| Error::Internal {
            operation: format!("build session cookie: {e}"),
        })
    }

    fn expired_cookie(&self, secure: bool) -> Result<HeaderValue> {
        let mut cookie = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", self.cookie_name);
        if secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).map_err(|e| Error::Internal {
            operation: format!("build session cookie: {e}"),
        })
    }

    fn clear_cookie(&self, request: &Parts, response: &mut HeaderMap) {
        match self.expired_cookie(is_secure(request)) {
            Ok(cookie) => {
                response.append(SET_COOKIE, cookie);
            }
            Err(e) => warn!("Failed to clear session cookie: {}", e),
        }
    }
}

#[async_trait]
impl CredentialHandler for SessionCookieManager {
    fn scheme(&self) -> &'static str {
        "session"
    }

    #[instrument(skip_all)]
    async fn validate(&self, request: &Parts, response: &mut HeaderMap) -> Verdict {
        let Some(value) = find_cookie(&request.headers, &self.cookie_name).filter(|value| !value.is_empty()) else {
            return Verdict::NotApplicable;
        };

        let session = match self.verify_session_token(value) {
            Ok(session) => session,
            Err(e) => {
                debug!(reason = e.reason_code(), "Invalid session cookie: {}", e);
                self.clear_cookie(request, response);
                return Verdict::Invalid;
            }
        };

        let now = self.clock.now();
        if now > session.expires_at {
            debug!(subject = %session.subject, "Session expired");
            self.clear_cookie(request, response);
            return Verdict::Invalid;
        }

        if now + self.refresh > session.expires_at {
            match self.directory.scopes_of(&session.subject).await {
                Ok(Some(scopes)) => match self.session_cookie(&session.subject, scopes, is_secure(request)).await {
                    Ok(cookie) => {
                        debug!(subject = %session.subject, "Renewed session");
                        response.append(SET_COOKIE, cookie);
                    }
                    Err(e) => warn!("Failed to renew session: {}", e),
                },
                Ok(None) => {
                    debug!(subject = %session.subject, "Session subject no longer exists");
                    self.clear_cookie(request, response);
                    return Verdict::Invalid;
                }
                Err(e) => warn!("Failed to look up scopes for session renewal: {}", e),
            }
        }

        Verdict::Valid(Principal::new(session.subject, session.scopes))
    }

    async fn issue(&self, principal: &Principal, request: &Parts, response: &mut HeaderMap) -> Result<bool> {
        let cookie = self
            .session_cookie(&principal.subject, principal.scopes.clone(), is_secure(request))
            .await?;
        response.append(SET_COOKIE, cookie);
        Ok(true)
    }

    async fn invalidate(&self, request: &Parts, response: &mut HeaderMap) {
        self.clear_cookie(request, response);
    }
}
