//! Access token value object and the dual-format codec.
//!
//! Newly issued tokens are RSA-signed JWTs. Tokens issued by older releases use a
//! shared-secret format: `base64(id:subject:scopes:temporary:issuedAtMillis:signature)` where
//! the signature is the URL-safe base64 HMAC-SHA256 of everything before the last colon.
//! [`TokenCodec::decode`] picks the format by looking for the `.` separating JWT segments,
//! which never occurs in standard base64.

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE},
};
use bon::bon;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{instrument, trace};

use crate::{
    crypto::{hmac_sha256, verify_hmac_sha256},
    errors::{AuthError, Error, Result},
    keys::KeyPair,
};

/// Lifetime in seconds of temporary tokens that carry no explicit expiry.
pub const TEMPORARY_TOKEN_LIFETIME_SECS: i64 = 60;

const VERIFICATION_ALGORITHMS: [Algorithm; 3] = [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// A self-contained credential naming a subject and the scopes granted to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    id: String,
    subject: String,
    scopes: BTreeSet<String>,
    temporary: bool,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

#[bon]
impl AccessToken {
    /// Timestamps are truncated to whole seconds, the resolution of JWT time claims.
    #[builder]
    pub fn new(
        #[builder(into)] id: String,
        #[builder(into)] subject: String,
        #[builder(default)] scopes: BTreeSet<String>,
        #[builder(default)] temporary: bool,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            subject,
            scopes,
            temporary,
            issued_at: issued_at.trunc_subsecs(0),
            expires_at: expires_at.map(|t| t.trunc_subsecs(0)),
        }
    }
}

impl AccessToken {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Effective expiry: the explicit one, or a fixed lifetime for temporary tokens.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .or_else(|| self.temporary.then(|| self.issued_at + Duration::seconds(TEMPORARY_TOKEN_LIFETIME_SECS)))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry().is_some_and(|expiry| now >= expiry)
    }
}

/// Wire format of an encoded token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFormat {
    /// Shared-secret HMAC format issued by older releases
    Legacy,
    /// RSA-signed JWT
    Jwt,
}

impl TokenFormat {
    pub fn detect(encoded: &str) -> Self {
        if encoded.contains('.') { TokenFormat::Jwt } else { TokenFormat::Legacy }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    jti: String,
    sub: String,
    iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    scopes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temporary: Option<String>,
}

impl From<&AccessToken> for AccessClaims {
    fn from(token: &AccessToken) -> Self {
        Self {
            jti: token.id.clone(),
            sub: token.subject.clone(),
            iat: token.issued_at.timestamp(),
            exp: token.expires_at.map(|t| t.timestamp()),
            scopes: join_scopes(&token.scopes, " "),
            temporary: token.temporary.then(|| "true".to_string()),
        }
    }
}

impl TryFrom<AccessClaims> for AccessToken {
    type Error = AuthError;

    fn try_from(claims: AccessClaims) -> std::result::Result<Self, AuthError> {
        let issued_at = DateTime::from_timestamp(claims.iat, 0).ok_or(AuthError::InvalidSignature)?;
        let expires_at = match claims.exp {
            Some(exp) => Some(DateTime::from_timestamp(exp, 0).ok_or(AuthError::InvalidSignature)?),
            None => None,
        };

        Ok(AccessToken {
            id: claims.jti,
            subject: claims.sub,
            scopes: split_scopes(&claims.scopes, ' '),
            temporary: claims.temporary.is_some_and(|t| t.eq_ignore_ascii_case("true")),
            issued_at,
            expires_at,
        })
    }
}

pub(crate) fn join_scopes(scopes: &BTreeSet<String>, separator: &str) -> String {
    scopes.iter().map(String::as_str).collect::<Vec<_>>().join(separator)
}

pub(crate) fn split_scopes(joined: &str, separator: char) -> BTreeSet<String> {
    joined
        .split(separator)
        .filter(|scope| !scope.is_empty())
        .map(str::to_string)
        .collect()
}

/// Encodes access tokens as signed JWTs and decodes both supported formats.
#[derive(Clone)]
pub struct TokenCodec {
    legacy_secret: Vec<u8>,
    signing_key: KeyPair,
    algorithm: Algorithm,
    trusted: HashMap<String, DecodingKey>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("signing_key", &self.signing_key)
            .field("algorithm", &self.algorithm)
            .field("trusted", &self.trusted.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(legacy_secret: Vec<u8>, signing_key: KeyPair, algorithm: Algorithm) -> Self {
        let mut trusted = HashMap::new();
        trusted.insert(signing_key.kid().to_string(), signing_key.decoding_key().clone());

        Self {
            legacy_secret,
            signing_key,
            algorithm,
            trusted,
        }
    }

    /// Additionally accept JWTs signed by `key`.
    pub fn trust(mut self, key: &KeyPair) -> Self {
        self.trusted.insert(key.kid().to_string(), key.decoding_key().clone());
        self
    }

    /// Encode a token in the JWT format.
    pub fn encode(&self, token: &AccessToken) -> Result<String> {
        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.signing_key.kid().to_string());

        encode(&header, &AccessClaims::from(token), self.signing_key.encoding_key()).map_err(|e| Error::Internal {
            operation: format!("sign access token: {e}"),
        })
    }

    /// Encode a token in the legacy shared-secret format.
    pub fn encode_legacy(&self, token: &AccessToken) -> Result<String> {
        if token.id.contains(':') || token.subject.contains(':') {
            return Err(Error::BadRequest {
                message: "Token id and subject must not contain ':'".to_string(),
            });
        }
        if token.scopes.iter().any(|scope| scope.contains([':', ','])) {
            return Err(Error::BadRequest {
                message: "Scopes must not contain ':' or ','".to_string(),
            });
        }

        let data = format!(
            "{}:{}:{}:{}:{}",
            token.id,
            token.subject,
            join_scopes(&token.scopes, ","),
            token.temporary,
            token.issued_at.timestamp_millis()
        );
        let signature = hmac_sha256(&self.legacy_secret, data.as_bytes())?;

        Ok(STANDARD.encode(format!("{data}:{}", URL_SAFE.encode(signature))))
    }

    /// Decode and verify a token in either format.
    #[instrument(skip_all)]
    pub fn decode(&self, encoded: &str) -> std::result::Result<AccessToken, AuthError> {
        match TokenFormat::detect(encoded) {
            TokenFormat::Legacy => self.decode_legacy(encoded),
            TokenFormat::Jwt => self.decode_jwt(encoded),
        }
    }

    fn decode_legacy(&self, encoded: &str) -> std::result::Result<AccessToken, AuthError> {
        let bytes = STANDARD.decode(encoded).map_err(|e| AuthError::malformed(format!("not base64: {e}")))?;
        let plain = String::from_utf8(bytes).map_err(|_| AuthError::malformed("not UTF-8"))?;

        let (data, signature) = plain.rsplit_once(':').ok_or_else(|| AuthError::malformed("missing signature"))?;
        if signature.is_empty() {
            return Err(AuthError::malformed("empty signature"));
        }

        let tag = URL_SAFE.decode(signature).map_err(|_| AuthError::InvalidSignature)?;
        if !verify_hmac_sha256(&self.legacy_secret, data.as_bytes(), &tag) {
            trace!("Legacy token signature mismatch");
            return Err(AuthError::InvalidSignature);
        }

        let fields: Vec<&str> = data.split(':').collect();
        let [id, subject, scopes, temporary, issued_at] = fields.as_slice() else {
            return Err(AuthError::malformed(format!("expected 5 fields, found {}", fields.len())));
        };

        let millis: i64 = issued_at.parse().map_err(|_| AuthError::malformed("invalid issue date"))?;
        let issued_at = DateTime::from_timestamp_millis(millis).ok_or_else(|| AuthError::malformed("issue date out of range"))?;

        Ok(AccessToken {
            id: id.to_string(),
            subject: subject.to_string(),
            scopes: split_scopes(scopes, ','),
            temporary: temporary.eq_ignore_ascii_case("true"),
            issued_at,
            expires_at: None,
        })
    }

    fn decode_jwt(&self, encoded: &str) -> std::result::Result<AccessToken, AuthError> {
        let header = decode_header(encoded).map_err(|_| AuthError::InvalidSignature)?;
        let key = header
            .kid
            .as_deref()
            .and_then(|kid| self.trusted.get(kid))
            .ok_or(AuthError::InvalidSignature)?;

        let mut validation = Validation::new(self.algorithm);
        validation.algorithms = VERIFICATION_ALGORITHMS.to_vec();
        // Expiry is checked by the caller so it can be reported separately
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<AccessClaims>(encoded, key, &validation).map_err(|e| {
            trace!("JWT access token rejected: {}", e);
            AuthError::InvalidSignature
        })?;

        AccessToken::try_from(data.claims)
    }
}
