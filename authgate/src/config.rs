//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `AUTHGATE_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `AUTHGATE_` override YAML values
//! 3. **DATABASE_URL** - Special case: sets `database_url` if present
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `AUTHGATE_AUTH__BASIC__ENABLED=true` sets the `auth.basic.enabled` field.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Session lifetime and sliding-renewal window
//! AUTHGATE_AUTH__SESSION__TTL=2h
//! AUTHGATE_AUTH__SESSION__REFRESH=5m
//!
//! # Cookie carrying the session token
//! AUTHGATE_AUTH__SESSION__COOKIE_NAME=MY_ACCESS
//!
//! # Where RSA key pairs are persisted
//! AUTHGATE_KEY_HOME=/var/lib/authgate
//!
//! # Accept HTTP Basic credentials
//! AUTHGATE_AUTH__BASIC__ENABLED=true
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, path::PathBuf, time::Duration};

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "AUTHGATE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults defined in the `Default` implementation, so an empty config
/// file yields a working (if not production-ready) setup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Directory holding persisted RSA key pairs (generated on first start)
    pub key_home: PathBuf,
    /// PostgreSQL URL holding access keys and the login audit log. Without it, long-lived
    /// API tokens cannot be confirmed and are treated as revoked, and the administrative
    /// routes answer 503.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Shared secret for legacy HMAC-signed API tokens, base64 encoded and optionally
    /// encrypted with `master_key`
    pub legacy_secret: String,
    /// Base64 encoded 256-bit AES key protecting configured secrets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_key: Option<String>,
    /// Secret for authorization code signatures. A random one is generated per process
    /// if unset, which invalidates outstanding codes on restart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_secret: Option<String>,
    /// Credential scheme configuration
    pub auth: AuthConfig,
    /// Revocation cache tuning
    pub revocation: RevocationConfig,
    /// Static user directory
    pub users: Vec<UserEntry>,
}

/// Credential schemes, in the order the dispatcher consults them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub api_tokens: ApiTokenConfig,
    pub basic: BasicAuthConfig,
    pub session: SessionConfig,
    pub authorization_code: AuthorizationCodeConfig,
    pub routes: RouteConfig,
}

/// Self-issued API access tokens (`Authorization: Bearer`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiTokenConfig {
    pub enabled: bool,
    /// RSA signature algorithm for newly issued tokens (RS256, RS384 or RS512)
    pub algorithm: Algorithm,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BasicAuthConfig {
    /// When disabled, requests carrying Basic credentials are rejected outright
    pub enabled: bool,
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub enabled: bool,
    /// Name of the cookie carrying the session token
    pub cookie_name: String,
    /// Session lifetime, unless overridden per user
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Sessions expiring within this window are renewed on use
    #[serde(with = "humantime_serde")]
    pub refresh: Duration,
    /// RSA signature algorithm for session tokens
    pub algorithm: Algorithm,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthorizationCodeConfig {
    pub enabled: bool,
}

/// Which paths the dispatcher treats as login, anonymous or protected.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteConfig {
    /// `POST` to this path performs a credential login
    pub login_path: String,
    /// Paths below this prefix (other than login) never require authentication
    pub anonymous_prefix: String,
    /// Paths below these prefixes are authenticated when credentials are present but are
    /// also served to anonymous callers
    pub optional_prefixes: Vec<String>,
    /// Paths below these prefixes require authentication; everything else is anonymous
    pub protected_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RevocationConfig {
    /// How long a positive store check is trusted before asking again
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
}

/// A user known to the static directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UserEntry {
    pub name: String,
    /// Argon2 PHC string
    pub password_hash: String,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    /// Overrides `auth.session.ttl` for this user
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub session_ttl: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            key_home: PathBuf::from("keys"),
            database_url: None,
            legacy_secret: "changeit".to_string(),
            master_key: None,
            code_secret: None,
            auth: AuthConfig::default(),
            revocation: RevocationConfig::default(),
            users: Vec::new(),
        }
    }
}

impl Default for ApiTokenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: Algorithm::RS256,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cookie_name: "AUTHGATE_ACCESS".to_string(),
            ttl: Duration::from_secs(60 * 60), // 1 hour
            refresh: Duration::from_secs(60),
            algorithm: Algorithm::RS256,
        }
    }
}

impl Default for AuthorizationCodeConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            login_path: "/api/v1/login/_login".to_string(),
            anonymous_prefix: "/api/v1/login".to_string(),
            optional_prefixes: vec!["/oauth2/authorize".to_string()],
            protected_prefixes: vec!["/api/v1".to_string(), "/oauth2".to_string()],
        }
    }
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
        }
    }
}

fn is_rsa(algorithm: Algorithm) -> bool {
    matches!(algorithm, Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512)
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        let session = &self.auth.session;
        if session.enabled && session.refresh >= session.ttl {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: session refresh window ({:?}) must be shorter than the session ttl ({:?})",
                    session.refresh, session.ttl
                ),
            });
        }

        if session.cookie_name.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: auth.session.cookie_name must not be empty".to_string(),
            });
        }

        for (scheme, algorithm) in [("api_tokens", self.auth.api_tokens.algorithm), ("session", session.algorithm)] {
            if !is_rsa(algorithm) {
                return Err(Error::Internal {
                    operation: format!("Config validation: auth.{scheme}.algorithm must be RS256, RS384 or RS512, got {algorithm:?}"),
                });
            }
        }

        if self.revocation.check_interval.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: revocation.check_interval must be greater than zero".to_string(),
            });
        }

        if self.auth.routes.login_path.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: auth.routes.login_path must not be empty".to_string(),
            });
        }

        for user in &self.users {
            if let Some(ttl) = user.session_ttl
                && ttl <= session.refresh
            {
                return Err(Error::Internal {
                    operation: format!(
                        "Config validation: session_ttl of user '{}' must be longer than the refresh window",
                        user.name
                    ),
                });
            }
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("AUTHGATE_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database_url".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
