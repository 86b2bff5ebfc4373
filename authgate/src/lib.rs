//! # authgate: multi-scheme HTTP authentication
//!
//! `authgate` decides who an incoming HTTP request is acting as. It accepts several kinds of
//! credentials side by side and resolves them into a sealed
//! [`SecurityContext`](auth::current_user::SecurityContext) before any route handler runs.
//!
//! ## Credential schemes
//!
//! Handlers are consulted in this order; the first definitive verdict wins and an invalid
//! credential is never rescued by a later scheme.
//!
//! - **API access tokens** (`Authorization: Bearer`): RSA-signed JWTs, plus the HMAC-signed
//!   format issued by older releases. Long-lived tokens are checked against the token store
//!   through a [`RevocationCache`](auth::revocation::RevocationCache), so revocation takes
//!   effect within one check interval.
//! - **HTTP Basic** against the configured user directory (off by default; when off, Basic
//!   credentials are rejected rather than ignored).
//! - **Session cookies**: RSA-signed JWTs set at login and renewed shortly before expiry.
//! - **Authorization codes** presented as bearer credentials.
//!
//! ## Administration
//!
//! With a database configured, `/api/v1/accesskeys` creates, renews, restores and removes
//! long-lived access keys, and every password login is recorded in an audit log readable at
//! `/api/v1/audit/logins`. Both require the administrative scopes listed at `/_/scopes`.
//! Schema migrations run at start-up (see [`migrator`]).
//!
//! ## Request flow
//!
//! [`auth::middleware`] classifies each request as login, anonymous, optionally
//! authenticated or protected (see [`config::RouteConfig`]), runs the
//! [`AuthenticationDispatcher`](auth::dispatcher::AuthenticationDispatcher) accordingly and
//! answers rejected requests with a generic, uncacheable 401.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use authgate::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = authgate::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     authgate::telemetry::init_telemetry()?;
//!
//!     let app = Application::builder().config(config).build().await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod db;
pub mod errors;
pub mod keys;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};
use bon::{Builder, bon};
pub use config::Config;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, instrument, warn};

use crate::{
    api::handlers,
    auth::{
        api_token::ApiTokenHandler,
        audit::{LoginAuditLog, PgLoginAuditLog, TracingLoginAuditLog},
        basic::BasicAuthHandler,
        code::{AuthorizationCodeHandler, AuthorizationCodeService},
        directory::{StaticUserDirectory, UserDirectory},
        dispatcher::{AuthenticationDispatcher, CredentialHandler},
        middleware::authentication_middleware,
        revocation::{InMemoryRevocationStore, PgRevocationStore, RevocationCache, RevocationStore},
        session::SessionCookieManager,
        token::TokenCodec,
    },
    clock::{Clock, SystemClock},
    crypto::{AesGcmSecretStore, resolve_shared_secret},
    errors::Error,
    keys::{API_KEY_FILE, API_KEY_ID, KeyPair, LOGIN_KEY_FILE, LOGIN_KEY_ID},
};

/// Get the authgate database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .dispatcher(dispatcher)
///     .codec(codec)
///     .codes(codes)
///     .directory(directory)
///     .clock(clock)
///     .audit(audit)
///     .maybe_db(pool)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub dispatcher: Arc<AuthenticationDispatcher>,
    pub codec: Arc<TokenCodec>,
    pub codes: Arc<AuthorizationCodeService>,
    pub directory: Arc<dyn UserDirectory>,
    pub clock: Arc<dyn Clock>,
    pub audit: Arc<dyn LoginAuditLog>,
    /// Absent when no database is configured; the administrative routes then answer 503
    pub db: Option<PgPool>,
}

impl AppState {
    pub fn db(&self) -> errors::Result<&PgPool> {
        self.db.as_ref().ok_or_else(|| Error::ServiceUnavailable {
            message: "No database configured".to_string(),
        })
    }
}

/// Connect to `database_url`, if configured, and bring the schema up to date.
async fn setup_database(config: &Config, pool: Option<PgPool>) -> anyhow::Result<Option<PgPool>> {
    let pool = match (pool, &config.database_url) {
        (Some(pool), _) => pool,
        (None, Some(url)) => PgPoolOptions::new().max_connections(10).connect(url).await?,
        (None, None) => return Ok(None),
    };
    migrator().run(&pool).await?;
    info!("Database migrations applied");
    Ok(Some(pool))
}

/// Token store for long-lived API tokens: PostgreSQL if available, otherwise an empty
/// in-memory store.
fn default_revocation_store(db: Option<&PgPool>) -> Arc<dyn RevocationStore> {
    match db {
        Some(pool) => {
            info!("Checking long-lived API tokens against PostgreSQL");
            Arc::new(PgRevocationStore::new(pool.clone()))
        }
        None => {
            warn!("No database_url configured: long-lived API tokens will be treated as revoked");
            Arc::new(InMemoryRevocationStore::new())
        }
    }
}

/// Assemble the shared state: keys, codec, user directory and the credential handler chain.
#[instrument(skip_all)]
pub async fn build_app_state(
    config: Config,
    clock: Arc<dyn Clock>,
    revocation_store: Arc<dyn RevocationStore>,
    db: Option<PgPool>,
) -> anyhow::Result<AppState> {
    let secret_store = AesGcmSecretStore::new(config.master_key.as_deref())?;
    let legacy_secret = resolve_shared_secret(&config.legacy_secret, &secret_store).await;

    let api_key = KeyPair::load_or_generate(&config.key_home, API_KEY_FILE, API_KEY_ID)?;
    let login_key = KeyPair::load_or_generate(&config.key_home, LOGIN_KEY_FILE, LOGIN_KEY_ID)?;

    let codec = Arc::new(TokenCodec::new(legacy_secret, api_key, config.auth.api_tokens.algorithm));
    let directory: Arc<dyn UserDirectory> = Arc::new(StaticUserDirectory::from_config(&config.users));
    let codes = Arc::new(AuthorizationCodeService::new(config.code_secret.as_deref(), clock.clone()));
    let revocations = Arc::new(RevocationCache::new(
        revocation_store,
        clock.clone(),
        config.revocation.check_interval,
    ));

    let mut api_tokens = ApiTokenHandler::new(config.auth.api_tokens.enabled, codec.clone(), revocations, clock.clone());
    if config.auth.authorization_code.enabled {
        api_tokens = api_tokens.with_codes(codes.clone());
    }

    let mut handlers: Vec<Arc<dyn CredentialHandler>> = vec![Arc::new(api_tokens)];
    handlers.push(Arc::new(BasicAuthHandler::new(config.auth.basic.enabled, directory.clone())));
    if config.auth.session.enabled {
        handlers.push(Arc::new(SessionCookieManager::new(
            login_key,
            &config.auth.session,
            directory.clone(),
            clock.clone(),
        )?));
    }
    if config.auth.authorization_code.enabled {
        handlers.push(Arc::new(AuthorizationCodeHandler::new(codes.clone())));
    }
    info!(
        schemes = ?handlers.iter().map(|h| h.scheme()).collect::<Vec<_>>(),
        "Credential handlers configured"
    );

    let dispatcher = Arc::new(AuthenticationDispatcher::new(
        handlers,
        directory.clone(),
        config.auth.routes.clone(),
    ));

    let audit: Arc<dyn LoginAuditLog> = match &db {
        Some(pool) => Arc::new(PgLoginAuditLog::new(pool.clone())),
        None => Arc::new(TracingLoginAuditLog),
    };

    Ok(AppState::builder()
        .config(config)
        .dispatcher(dispatcher)
        .codec(codec)
        .codes(codes)
        .directory(directory)
        .clock(clock)
        .audit(audit)
        .maybe_db(db)
        .build())
}

/// Build the router with the authentication middleware in front of every route.
pub fn build_router(state: AppState) -> Router {
    let routes = &state.config.auth.routes;
    let logout_path = format!("{}/_logout", routes.anonymous_prefix.trim_end_matches('/'));

    Router::new()
        .route(&routes.login_path, post(handlers::auth::login))
        .route(&logout_path, post(handlers::auth::logout))
        .route("/api/v1/userinfo", get(handlers::auth::userinfo))
        .route("/oauth2/authorize", get(handlers::oauth::authorize))
        .route("/oauth2/token", post(handlers::oauth::token))
        .route("/_/scopes", get(handlers::scopes::list_scopes))
        .route(
            "/api/v1/accesskeys",
            get(handlers::access_keys::list_access_keys).post(handlers::access_keys::create_access_key),
        )
        .route("/api/v1/accesskeys/_validate", post(handlers::access_keys::validate_access_key))
        .route("/api/v1/accesskeys/_restore", post(handlers::access_keys::restore_access_key))
        .route(
            "/api/v1/accesskeys/{key_id}",
            get(handlers::access_keys::get_access_key).delete(handlers::access_keys::delete_access_key),
        )
        .route(
            "/api/v1/accesskeys/{key_id}/description",
            put(handlers::access_keys::update_access_key_description),
        )
        .route("/api/v1/accesskeys/{key_id}/_renew", post(handlers::access_keys::renew_access_key))
        .route("/api/v1/audit/logins", get(handlers::audit::list_logins))
        .layer(from_fn_with_state(state.clone(), authentication_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
}

#[bon]
impl Application {
    /// Create the application. The clock defaults to the system clock. Without an explicit
    /// pool one is opened from `database_url`, if set; migrations run against either. The
    /// token store defaults to that database.
    #[builder]
    pub async fn new(
        config: Config,
        clock: Option<Arc<dyn Clock>>,
        revocation_store: Option<Arc<dyn RevocationStore>>,
        pool: Option<PgPool>,
    ) -> anyhow::Result<Self> {
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let db = setup_database(&config, pool).await?;
        let revocation_store = revocation_store.unwrap_or_else(|| default_revocation_store(db.as_ref()));

        let app_state = build_app_state(config.clone(), clock, revocation_store, db).await?;
        let router = build_router(app_state.clone());

        Ok(Self {
            router,
            app_state,
            config,
        })
    }
}

impl Application {
    pub fn state(&self) -> &AppState {
        &self.app_state
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("authgate listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ManualClock, create_test_config};

    #[tokio::test]
    async fn test_application_generates_missing_login_key() {
        let key_home = tempfile::tempdir().unwrap();
        let keys = key_home.path().join("keys");
        std::fs::create_dir_all(&keys).unwrap();
        std::fs::write(keys.join(API_KEY_FILE), crate::test_utils::test_key_pem()).unwrap();
        let config = create_test_config(&keys);

        let app = Application::builder()
            .config(config)
            .clock(Arc::new(ManualClock::default()))
            .revocation_store(Arc::new(InMemoryRevocationStore::new()))
            .build()
            .await
            .unwrap();

        assert!(keys.join(LOGIN_KEY_FILE).exists());
        assert_eq!(app.state().config.users.len(), 3);
        assert!(app.state().db.is_none());
    }

    #[tokio::test]
    async fn test_disabled_schemes_are_left_out() {
        let key_home = tempfile::tempdir().unwrap();
        std::fs::write(key_home.path().join(API_KEY_FILE), crate::test_utils::test_key_pem()).unwrap();
        std::fs::write(key_home.path().join(LOGIN_KEY_FILE), crate::test_utils::test_key_pem()).unwrap();
        let mut config = create_test_config(key_home.path());
        config.auth.session.enabled = false;
        config.auth.authorization_code.enabled = false;

        let state = build_app_state(config, Arc::new(SystemClock), Arc::new(InMemoryRevocationStore::new()), None)
            .await
            .unwrap();

        let debug = format!("{:?}", state.dispatcher);
        assert!(debug.contains("api-token"));
        assert!(debug.contains("basic"));
        assert!(!debug.contains("session"));
        assert!(!debug.contains("authorization-code"));
    }

    #[sqlx::test]
    async fn test_application_uses_given_pool(pool: PgPool) {
        let key_home = tempfile::tempdir().unwrap();
        std::fs::write(key_home.path().join(API_KEY_FILE), crate::test_utils::test_key_pem()).unwrap();
        std::fs::write(key_home.path().join(LOGIN_KEY_FILE), crate::test_utils::test_key_pem()).unwrap();
        let config = create_test_config(key_home.path());

        let app = Application::builder()
            .config(config)
            .clock(Arc::new(ManualClock::default()))
            .pool(pool.clone())
            .build()
            .await
            .unwrap();

        assert!(app.state().db().is_ok());
        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(applied, 2);
    }
}
