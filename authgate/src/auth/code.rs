//! Short-lived OAuth authorization codes.
//!
//! A code is a self-contained signed record rather than a key into server-side storage:
//!
//! ```text
//! len (1) | client id | len (1) | subject | expires at, epoch millis (8, BE) | salt (8) | HMAC-SHA256 (32)
//! ```
//!
//! The bytes are read as one unsigned big-endian integer and rendered in base 36, which keeps
//! the code URL-safe without escaping. The client id must not be empty, so the leading length
//! byte is never zero and survives the integer conversion. Codes are not single-use: a code can be redeemed as
//! often as its holder likes until it expires.

use async_trait::async_trait;
use axum::http::{HeaderMap, request::Parts};
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, thread_rng};
use rsa::BigUint;
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::{
    auth::{
        dispatcher::{CredentialHandler, Principal, Verdict},
        utils::Authorization,
    },
    clock::Clock,
    crypto::{MAC_LEN, hmac_sha256, sha256, verify_hmac_sha256},
    errors::{Error, Result},
};

/// How long a code stays redeemable.
pub const CODE_LIFETIME_SECS: i64 = 60;

const SALT_LEN: usize = 8;
const RADIX: u32 = 36;

/// A decoded, verified and unexpired authorization code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub client_id: String,
    pub subject: String,
    pub expires_at: DateTime<Utc>,
}

pub struct AuthorizationCodeService {
    secret: [u8; 32],
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AuthorizationCodeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCodeService").finish_non_exhaustive()
    }
}

/// Cursor over the code payload.
struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> std::result::Result<&'a [u8], &'static str> {
        let (head, rest) = self.0.split_at_checked(len).ok_or("truncated")?;
        self.0 = rest;
        Ok(head)
    }

    fn byte(&mut self) -> std::result::Result<u8, &'static str> {
        Ok(self.take(1)?[0])
    }

    fn string(&mut self) -> std::result::Result<String, &'static str> {
        let len = self.byte()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| "field is not UTF-8")
    }

    fn i64_be(&mut self) -> std::result::Result<i64, &'static str> {
        let bytes: [u8; 8] = self.take(8)?.try_into().map_err(|_| "truncated")?;
        Ok(i64::from_be_bytes(bytes))
    }
}

fn length_prefix(field: &str, value: &str) -> Result<u8> {
    u8::try_from(value.len()).map_err(|_| Error::BadRequest {
        message: format!("{field} is too long"),
    })
}

impl AuthorizationCodeService {
    /// The MAC key is the SHA-256 of `secret`. Without a secret a random one is drawn, so codes
    /// do not survive a restart.
    pub fn new(secret: Option<&str>, clock: Arc<dyn Clock>) -> Self {
        let secret = match secret {
            Some(secret) => sha256(secret.as_bytes()),
            None => sha256(Uuid::new_v4().to_string().as_bytes()),
        };
        Self { secret, clock }
    }

    /// Issue a code letting `client_id` obtain a token for `subject`.
    #[instrument(skip(self))]
    pub fn create_code(&self, client_id: &str, subject: &str) -> Result<String> {
        if client_id.is_empty() {
            return Err(Error::BadRequest {
                message: "client_id must not be empty".to_string(),
            });
        }
        let client_len = length_prefix("client_id", client_id)?;
        let subject_len = length_prefix("subject", subject)?;
        let expires_at = self.clock.now() + Duration::seconds(CODE_LIFETIME_SECS);

        let mut salt = [0u8; SALT_LEN];
        thread_rng().fill(&mut salt);

        let mut payload = Vec::with_capacity(2 + client_id.len() + subject.len() + 8 + SALT_LEN + MAC_LEN);
        payload.push(client_len);
        payload.extend_from_slice(client_id.as_bytes());
        payload.push(subject_len);
        payload.extend_from_slice(subject.as_bytes());
        payload.extend_from_slice(&expires_at.timestamp_millis().to_be_bytes());
        payload.extend_from_slice(&salt);

        let mac = hmac_sha256(&self.secret, &payload)?;
        payload.extend_from_slice(&mac);

        Ok(BigUint::from_bytes_be(&payload).to_str_radix(RADIX))
    }

    /// Verify and decode `code`. Anything malformed, tampered with or expired yields `None`.
    pub fn decode_code(&self, code: &str) -> Option<AuthorizationCode> {
        match self.parse(code) {
            Ok(decoded) => Some(decoded),
            Err(reason) => {
                trace!("Rejected authorization code: {}", reason);
                None
            }
        }
    }

    fn parse(&self, code: &str) -> std::result::Result<AuthorizationCode, &'static str> {
        let number = BigUint::parse_bytes(code.as_bytes(), RADIX).ok_or("not a base-36 number")?;
        let bytes = number.to_bytes_be();

        let mac_start = bytes.len().checked_sub(MAC_LEN).ok_or("truncated")?;
        let (payload, mac) = bytes.split_at(mac_start);
        if !verify_hmac_sha256(&self.secret, payload, mac) {
            return Err("signature mismatch");
        }

        let mut reader = Reader(payload);
        let client_id = reader.string()?;
        if client_id.is_empty() {
            return Err("empty client id");
        }
        let subject = reader.string()?;
        let expires_millis = reader.i64_be()?;
        reader.take(SALT_LEN)?;
        if !reader.0.is_empty() {
            return Err("trailing bytes");
        }

        let expires_at = DateTime::from_timestamp_millis(expires_millis).ok_or("expiry out of range")?;
        if self.clock.now() > expires_at {
            return Err("expired");
        }

        Ok(AuthorizationCode {
            client_id,
            subject,
            expires_at,
        })
    }
}

/// Accepts an unexpired authorization code presented as a bearer credential and authenticates
/// the request as the code's subject, without scopes. Any other bearer value is invalid.
pub struct AuthorizationCodeHandler {
    codes: Arc<AuthorizationCodeService>,
}

impl AuthorizationCodeHandler {
    pub fn new(codes: Arc<AuthorizationCodeService>) -> Self {
        Self { codes }
    }
}

#[async_trait]
impl CredentialHandler for AuthorizationCodeHandler {
    fn scheme(&self) -> &'static str {
        "authorization-code"
    }

    async fn validate(&self, request: &Parts, _response: &mut HeaderMap) -> Verdict {
        let Some(Authorization::Bearer(credentials)) = Authorization::from_headers(&request.headers) else {
            return Verdict::NotApplicable;
        };

        match self.codes.decode_code(credentials) {
            Some(code) => Verdict::Valid(Principal::new(code.subject, BTreeSet::new())),
            None => {
                debug!("Bearer credential is not a redeemable authorization code");
                Verdict::Invalid
            }
        }
    }
}
