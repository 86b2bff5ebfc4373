//! Test utilities (available with the `test-utils` feature).

use chrono::{DateTime, TimeZone, Utc};
use std::{
    collections::BTreeSet,
    path::Path,
    sync::{
        OnceLock,
        atomic::{AtomicI64, Ordering},
    },
};

use crate::{
    auth::password::{Argon2Params, hash_password_with_params},
    clock::Clock,
    config::{Config, UserEntry},
    keys::{KeyPair, generate_pem},
};

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(instant.timestamp_millis()),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        self.millis.store(instant.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.millis.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    /// 2024-05-01T12:00:00Z
    fn default() -> Self {
        Self::at(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().unwrap_or_default())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// RSA key generation is slow, so the whole test binary shares one private key.
pub fn test_key_pem() -> &'static str {
    static PEM: OnceLock<String> = OnceLock::new();
    PEM.get_or_init(|| generate_pem().expect("Failed to generate test RSA key"))
}

pub fn test_key_pair(kid: &str) -> KeyPair {
    KeyPair::from_pem(kid, test_key_pem()).expect("Failed to load test RSA key")
}

/// Argon2 hash with minimal cost parameters.
pub fn test_password_hash(password: &str) -> String {
    let params = Argon2Params {
        memory_kib: 128,
        iterations: 1,
        parallelism: 1,
    };
    hash_password_with_params(password, Some(params)).expect("Failed to hash test password")
}

pub fn test_user(name: &str, password: &str, scopes: &[&str]) -> UserEntry {
    UserEntry {
        name: name.to_string(),
        password_hash: test_password_hash(password),
        scopes: scopes.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        session_ttl: None,
    }
}

/// Configuration with three users, keys stored under `key_home`:
///
/// - `alice` / `secret` with scopes `read` and `write`
/// - `console` / `console-secret`, an OAuth client without scopes
/// - `admin` / `admin-secret` with the `adm` scope
pub fn create_test_config(key_home: &Path) -> Config {
    let mut config = Config {
        key_home: key_home.to_path_buf(),
        code_secret: Some("test-code-secret".to_string()),
        users: vec![
            test_user("alice", "secret", &["read", "write"]),
            test_user("console", "console-secret", &[]),
            test_user("admin", "admin-secret", &[crate::auth::scopes::ADM]),
        ],
        ..Default::default()
    };
    config.auth.basic.enabled = true;
    config
}

#[cfg(test)]
pub use self::app::{TestApp, create_test_app, create_test_app_with, create_test_app_with_pool};
