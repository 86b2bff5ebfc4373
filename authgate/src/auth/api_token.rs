//! Bearer authentication with self-issued access tokens.
//!
//! This handler runs first and owns the `Authorization: Bearer` header. A bearer value is
//! either an access token or an authorization code; codes are passed on to the code handler
//! at the end of the chain, everything else gets a definitive verdict here. A malformed
//! bearer value is therefore rejected before the session cookie is even looked at.

use async_trait::async_trait;
use axum::http::{HeaderMap, request::Parts};
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

use crate::{
    auth::{
        dispatcher::{CredentialHandler, Principal, Verdict},
        revocation::RevocationCache,
        code::AuthorizationCodeService,
        token::{AccessToken, TokenCodec},
        utils::Authorization,
    },
    clock::Clock,
    errors::{AuthError, Error, Result},
};

/// Validates `Authorization: Bearer` access tokens.
///
/// Temporary tokens are only checked for expiry. Long-lived tokens must additionally still be
/// present in the token store, which is consulted through the [`RevocationCache`].
///
/// When access tokens are disabled the handler stays in the chain and rejects every bearer
/// value that is not an authorization code.
pub struct ApiTokenHandler {
    enabled: bool,
    codec: Arc<TokenCodec>,
    revocations: Arc<RevocationCache>,
    clock: Arc<dyn Clock>,
    codes: Option<Arc<AuthorizationCodeService>>,
}

impl ApiTokenHandler {
    pub fn new(enabled: bool, codec: Arc<TokenCodec>, revocations: Arc<RevocationCache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled,
            codec,
            revocations,
            clock,
            codes: None,
        }
    }

    /// Leave bearer values that decode as authorization codes to the code handler.
    pub fn with_codes(mut self, codes: Arc<AuthorizationCodeService>) -> Self {
        self.codes = Some(codes);
        self
    }

    fn is_authorization_code(&self, credentials: &str) -> bool {
        self.codes
            .as_ref()
            .is_some_and(|codes| codes.decode_code(credentials).is_some())
    }

    /// Decode `encoded` and run the expiry and revocation checks.
    pub async fn check(&self, encoded: &str) -> Result<AccessToken> {
        let token = self.codec.decode(encoded)?;

        if token.is_expired(self.clock.now()) {
            return Err(AuthError::Expired.into());
        }

        if !token.is_temporary() && self.revocations.is_revoked(token.id()).await? {
            return Err(AuthError::Revoked {
                id: token.id().to_string(),
            }
            .into());
        }

        Ok(token)
    }
}

#[async_trait]
impl CredentialHandler for ApiTokenHandler {
    fn scheme(&self) -> &'static str {
        "api-token"
    }

    #[instrument(skip_all)]
    async fn validate(&self, request: &Parts, _response: &mut HeaderMap) -> Verdict {
        let Some(Authorization::Bearer(credentials)) = Authorization::from_headers(&request.headers) else {
            return Verdict::NotApplicable;
        };

        if self.is_authorization_code(credentials) {
            trace!("Bearer credential is an authorization code");
            return Verdict::NotApplicable;
        }
        if !self.enabled {
            debug!("Bearer token presented while access tokens are disabled");
            return Verdict::Invalid;
        }

        match self.check(credentials).await {
            Ok(token) => Verdict::Valid(Principal::new(token.subject(), token.scopes().clone())),
            Err(Error::Auth(e)) => {
                debug!(reason = e.reason_code(), "Access token rejected: {}", e);
                Verdict::Invalid
            }
            Err(e) => {
                warn!("Access token could not be checked: {:#}", e);
                Verdict::Invalid
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::revocation::{InMemoryRevocationStore, RevocationStore},
        keys::API_KEY_ID,
        test_utils::{ManualClock, test_key_pair},
    };
    use axum::http::Request;
    use chrono::Duration;
    use jsonwebtoken::Algorithm;
    use std::collections::BTreeSet;

    struct Fixture {
        handler: ApiTokenHandler,
        codec: Arc<TokenCodec>,
        revocations: Arc<RevocationCache>,
        store: Arc<InMemoryRevocationStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryRevocationStore::new());
        let codec = Arc::new(TokenCodec::new(
            b"legacy-secret".to_vec(),
            test_key_pair(API_KEY_ID),
            Algorithm::RS256,
        ));
        let revocations = Arc::new(RevocationCache::new(
            store.clone(),
            clock.clone(),
            std::time::Duration::from_secs(60),
        ));

        Fixture {
            handler: ApiTokenHandler::new(true, codec.clone(), revocations.clone(), clock.clone()),
            codec,
            revocations,
            store,
            clock,
        }
    }

    fn bearer(token: &str) -> Parts {
        Request::builder()
            .uri("/api/v1/userinfo")
            .header("authorization", format!("Bearer {token}"))
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    fn long_lived(fixture: &Fixture, id: &str) -> AccessToken {
        AccessToken::builder()
            .id(id)
            .subject("alice")
            .scopes(BTreeSet::from(["read".to_string()]))
            .issued_at(fixture.clock.now())
            .build()
    }

    async fn verdict(fixture: &Fixture, token: &str) -> Verdict {
        fixture.handler.validate(&bearer(token), &mut HeaderMap::new()).await
    }

    #[tokio::test]
    async fn test_revocation_takes_effect_after_check_interval() {
        let fixture = fixture();
        fixture.store.register("K1");
        let token = fixture.codec.encode(&long_lived(&fixture, "K1")).unwrap();

        let expected = Verdict::Valid(Principal::new("alice", BTreeSet::from(["read".to_string()])));
        assert_eq!(verdict(&fixture, &token).await, expected);

        fixture.store.revoke("K1");
        fixture.clock.advance_secs(30);
        assert_eq!(verdict(&fixture, &token).await, expected, "cached result within the interval");

        fixture.clock.advance_secs(31);
        assert_eq!(verdict(&fixture, &token).await, Verdict::Invalid);
    }

    #[tokio::test]
    async fn test_revoked_token_stays_revoked() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryRevocationStore::new());
        store.register("K1");
        let codec = TokenCodec::new(b"legacy-secret".to_vec(), test_key_pair(API_KEY_ID), Algorithm::RS256);
        let revocations = RevocationCache::new(store.clone(), clock.clone(), std::time::Duration::from_secs(60));

        let token = AccessToken::builder()
            .id("K1")
            .subject("alice")
            .scopes(BTreeSet::from(["read".to_string(), "write".to_string()]))
            .issued_at(clock.now())
            .build();
        let decoded = codec.decode(&codec.encode(&token).unwrap()).unwrap();
        assert_eq!(decoded, token);
        assert!(!revocations.is_revoked(decoded.id()).await.unwrap());

        store.revoke("K1");
        clock.advance_secs(59);
        assert!(!revocations.is_revoked("K1").await.unwrap());
        clock.advance_secs(1);
        assert!(revocations.is_revoked("K1").await.unwrap());

        store.register("K1");
        clock.advance_secs(600);
        assert!(revocations.is_revoked("K1").await.unwrap());
    }

    #[tokio::test]
    async fn test_legacy_tokens_are_accepted() {
        let fixture = fixture();
        fixture.store.register("K2");
        let token = fixture.codec.encode_legacy(&long_lived(&fixture, "K2")).unwrap();

        assert!(matches!(verdict(&fixture, &token).await, Verdict::Valid(_)));
    }

    #[tokio::test]
    async fn test_temporary_token_skips_store() {
        let fixture = fixture();
        let token = AccessToken::builder()
            .id("T1")
            .subject("alice")
            .temporary(true)
            .issued_at(fixture.clock.now())
            .build();
        let encoded = fixture.codec.encode(&token).unwrap();

        assert!(matches!(verdict(&fixture, &encoded).await, Verdict::Valid(_)));
        assert_eq!(fixture.store.lookups(), 0);

        fixture.clock.advance_secs(61);
        assert_eq!(verdict(&fixture, &encoded).await, Verdict::Invalid);
    }

    #[tokio::test]
    async fn test_expired_token_is_invalid() {
        let fixture = fixture();
        fixture.store.register("K3");
        let token = AccessToken::builder()
            .id("K3")
            .subject("alice")
            .issued_at(fixture.clock.now())
            .expires_at(fixture.clock.now() + Duration::minutes(5))
            .build();
        let encoded = fixture.codec.encode(&token).unwrap();

        assert!(matches!(verdict(&fixture, &encoded).await, Verdict::Valid(_)));

        fixture.clock.advance_secs(5 * 60);
        assert_eq!(verdict(&fixture, &encoded).await, Verdict::Invalid);
    }

    #[tokio::test]
    async fn test_store_failure_denies() {
        struct DownStore;

        #[async_trait]
        impl RevocationStore for DownStore {
            async fn exists(&self, _token_id: &str) -> anyhow::Result<bool> {
                anyhow::bail!("database unavailable")
            }
        }

        let clock = Arc::new(ManualClock::default());
        let codec = Arc::new(TokenCodec::new(b"s".to_vec(), test_key_pair(API_KEY_ID), Algorithm::RS256));
        let revocations = Arc::new(RevocationCache::new(
            Arc::new(DownStore),
            clock.clone(),
            std::time::Duration::from_secs(60),
        ));
        let handler = ApiTokenHandler::new(true, codec.clone(), revocations, clock.clone());

        let token = AccessToken::builder().id("K1").subject("alice").issued_at(clock.now()).build();
        let encoded = codec.encode(&token).unwrap();

        assert_eq!(handler.validate(&bearer(&encoded), &mut HeaderMap::new()).await, Verdict::Invalid);
        assert!(matches!(handler.check(&encoded).await, Err(Error::Other(_))));
    }

    #[tokio::test]
    async fn test_verdicts_for_foreign_credentials() {
        let fixture = fixture();

        // Not base64, so not a legacy token either
        assert_eq!(verdict(&fixture, "not-a-token!").await, Verdict::Invalid);
        // Looks like a JWT but does not verify
        assert_eq!(verdict(&fixture, "aaa.bbb.ccc").await, Verdict::Invalid);

        let basic = Request::builder()
            .header("authorization", "Basic YWxpY2U6c2VjcmV0")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        assert_eq!(fixture.handler.validate(&basic, &mut HeaderMap::new()).await, Verdict::NotApplicable);
    }

    #[tokio::test]
    async fn test_authorization_codes_are_left_to_the_code_handler() {
        let fixture = fixture();
        let codes = Arc::new(AuthorizationCodeService::new(Some("code-secret"), fixture.clock.clone()));
        let handler = ApiTokenHandler::new(true, fixture.codec.clone(), fixture.revocations.clone(), fixture.clock.clone())
            .with_codes(codes.clone());
        let code = codes.create_code("console", "alice").unwrap();

        let verdict = handler.validate(&bearer(&code), &mut HeaderMap::new()).await;
        assert_eq!(verdict, Verdict::NotApplicable);

        // Expired codes and code-shaped junk are this handler's to reject
        assert_eq!(handler.validate(&bearer("abc123"), &mut HeaderMap::new()).await, Verdict::Invalid);
        fixture.clock.advance_secs(61);
        assert_eq!(handler.validate(&bearer(&code), &mut HeaderMap::new()).await, Verdict::Invalid);
    }

    #[tokio::test]
    async fn test_disabled_handler_rejects_bearer_tokens() {
        let fixture = fixture();
        fixture.store.register("K1");
        let codes = Arc::new(AuthorizationCodeService::new(Some("code-secret"), fixture.clock.clone()));
        let handler = ApiTokenHandler::new(false, fixture.codec.clone(), fixture.revocations.clone(), fixture.clock.clone())
            .with_codes(codes.clone());
        let token = fixture.codec.encode(&long_lived(&fixture, "K1")).unwrap();

        assert_eq!(handler.validate(&bearer(&token), &mut HeaderMap::new()).await, Verdict::Invalid);
        assert_eq!(fixture.store.lookups(), 0);

        let code = codes.create_code("console", "alice").unwrap();
        assert_eq!(handler.validate(&bearer(&code), &mut HeaderMap::new()).await, Verdict::NotApplicable);
    }
}
