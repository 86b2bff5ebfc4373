//! User directory consulted for credential checks and scope lookups.

use async_trait::async_trait;
use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};
use tracing::{debug, instrument, warn};

use crate::{
    auth::password,
    config::UserEntry,
    errors::{Error, Result},
};

/// Source of truth for who exists, their passwords and their scopes.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Check a user name and password. Returns the canonical subject on success and `None`
    /// for unknown users or wrong passwords.
    async fn validate_credentials(&self, user_name: &str, password: &str) -> Result<Option<String>>;

    /// Current scopes of `subject`, or `None` if the subject no longer exists.
    async fn scopes_of(&self, subject: &str) -> Result<Option<BTreeSet<String>>>;

    /// Per-user session lifetime overriding the configured default.
    async fn session_ttl(&self, _subject: &str) -> Result<Option<Duration>> {
        Ok(None)
    }
}

/// Directory built from the `users` section of the configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    users: HashMap<String, UserEntry>,
}

impl StaticUserDirectory {
    pub fn from_config(users: &[UserEntry]) -> Self {
        let mut map = HashMap::with_capacity(users.len());
        for user in users {
            if map.insert(user.name.clone(), user.clone()).is_some() {
                warn!("User '{}' is configured more than once, the last entry wins", user.name);
            }
        }
        Self { users: map }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    #[instrument(skip(self, password))]
    async fn validate_credentials(&self, user_name: &str, password: &str) -> Result<Option<String>> {
        let Some(user) = self.users.get(user_name) else {
            debug!("Unknown user");
            return Ok(None);
        };

        // Verify password on a blocking thread to avoid blocking async runtime
        let password = password.to_string();
        let hash = user.password_hash.clone();
        let is_valid = tokio::task::spawn_blocking(move || password::verify_password(&password, &hash))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("spawn password verification task: {e}"),
            })??;

        if is_valid {
            Ok(Some(user.name.clone()))
        } else {
            debug!("Password mismatch");
            Ok(None)
        }
    }

    async fn scopes_of(&self, subject: &str) -> Result<Option<BTreeSet<String>>> {
        Ok(self.users.get(subject).map(|user| user.scopes.clone()))
    }

    async fn session_ttl(&self, subject: &str) -> Result<Option<Duration>> {
        Ok(self.users.get(subject).and_then(|user| user.session_ttl))
    }
}
