//! HTTP Basic authentication against the user directory.

use async_trait::async_trait;
use axum::http::{HeaderMap, request::Parts};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::auth::{
    directory::UserDirectory,
    dispatcher::{CredentialHandler, Principal, Verdict},
    utils::Authorization,
};

/// Validates `Authorization: Basic` credentials.
///
/// When Basic authentication is disabled the handler stays in the chain and rejects any
/// request that carries Basic credentials, so they are never silently ignored.
pub struct BasicAuthHandler {
    enabled: bool,
    directory: Arc<dyn UserDirectory>,
}

impl BasicAuthHandler {
    pub fn new(enabled: bool, directory: Arc<dyn UserDirectory>) -> Self {
        Self { enabled, directory }
    }
}

/// Split base64 `user:password` credentials.
fn decode_credentials(encoded: &str) -> Option<(String, String)> {
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user_name, password) = decoded.split_once(':')?;
    Some((user_name.to_string(), password.to_string()))
}

#[async_trait]
impl CredentialHandler for BasicAuthHandler {
    fn scheme(&self) -> &'static str {
        "basic"
    }

    #[instrument(skip_all)]
    async fn validate(&self, request: &Parts, _response: &mut HeaderMap) -> Verdict {
        let Some(Authorization::Basic(encoded)) = Authorization::from_headers(&request.headers) else {
            return Verdict::NotApplicable;
        };

        if !self.enabled {
            debug!("Basic credentials presented but Basic authentication is disabled");
            return Verdict::Invalid;
        }

        let Some((user_name, password)) = decode_credentials(encoded) else {
            debug!("Malformed Basic credentials");
            return Verdict::Invalid;
        };

        let subject = match self.directory.validate_credentials(&user_name, &password).await {
            Ok(Some(subject)) => subject,
            Ok(None) => return Verdict::Invalid,
            Err(e) => {
                error!("Credential validation failed: {:#}", e);
                return Verdict::Invalid;
            }
        };

        match self.directory.scopes_of(&subject).await {
            Ok(Some(scopes)) => Verdict::Valid(Principal::new(subject, scopes)),
            Ok(None) => Verdict::Invalid,
            Err(e) => {
                error!("Scope lookup failed: {:#}", e);
                Verdict::Invalid
            }
        }
    }
}
