//! Revocation cache for long-lived access tokens.
//!
//! Asking the token store on every request would put a database round-trip on the hot path.
//! Instead each token id gets a [`RevocationRecord`] remembering whether the token was found
//! revoked and when the store should next be asked. Revocation therefore takes effect within
//! one check interval (60 seconds by default).
//!
//! Records are created lazily with insert-if-absent semantics, so concurrent first accesses
//! for the same id share one record. Record fields are atomics without a surrounding lock:
//! `revoked` only ever flips to `true`, and racing writers of `next_check_at` all move it to
//! roughly the same instant, so a race costs at most a redundant store lookup.
//!
//! Records are never evicted.

use async_trait::async_trait;
use chrono::Duration;
use dashmap::{DashMap, DashSet};
use sqlx::PgPool;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
};
use tracing::{debug, instrument, trace};

use crate::clock::Clock;

/// Persistent record of live (non-revoked) long-lived tokens.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Whether the token is still present. Revoking a token deletes it from the store.
    async fn exists(&self, token_id: &str) -> anyhow::Result<bool>;
}

/// Token store backed by the `access_tokens` table.
#[derive(Debug, Clone)]
pub struct PgRevocationStore {
    pool: PgPool,
}

impl PgRevocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevocationStore for PgRevocationStore {
    async fn exists(&self, token_id: &str) -> anyhow::Result<bool> {
        let row: Option<i32> = sqlx::query_scalar("SELECT 1 FROM access_tokens WHERE id = $1")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

/// Process-local token store.
#[derive(Debug, Default)]
pub struct InMemoryRevocationStore {
    tokens: DashSet<String>,
    lookups: AtomicUsize,
}

impl InMemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token_id: impl Into<String>) {
        self.tokens.insert(token_id.into());
    }

    pub fn revoke(&self, token_id: &str) {
        self.tokens.remove(token_id);
    }

    /// Number of `exists` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn exists(&self, token_id: &str) -> anyhow::Result<bool> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.tokens.contains(token_id))
    }
}

/// Cached revocation state of one token id.
#[derive(Debug)]
pub struct RevocationRecord {
    revoked: AtomicBool,
    /// Epoch millis; zero forces a store lookup on first use
    next_check_at: AtomicI64,
}

impl RevocationRecord {
    fn new() -> Self {
        Self {
            revoked: AtomicBool::new(false),
            next_check_at: AtomicI64::new(0),
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    pub fn next_check_at_millis(&self) -> i64 {
        self.next_check_at.load(Ordering::Acquire)
    }
}

pub struct RevocationCache {
    records: DashMap<String, Arc<RevocationRecord>>,
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
    check_interval: Duration,
}

impl std::fmt::Debug for RevocationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationCache")
            .field("records", &self.records.len())
            .field("check_interval", &self.check_interval)
            .finish_non_exhaustive()
    }
}

impl RevocationCache {
    pub fn new(store: Arc<dyn RevocationStore>, clock: Arc<dyn Clock>, check_interval: std::time::Duration) -> Self {
        Self {
            records: DashMap::new(),
            store,
            clock,
            check_interval: Duration::from_std(check_interval).unwrap_or(Duration::seconds(60)),
        }
    }

    /// Fetch the record for `token_id`, creating it if absent. Concurrent callers racing on
    /// creation all receive the same instance.
    pub fn record(&self, token_id: &str) -> Arc<RevocationRecord> {
        if let Some(record) = self.records.get(token_id) {
            return Arc::clone(record.value());
        }
        Arc::clone(
            self.records
                .entry(token_id.to_string())
                .or_insert_with(|| Arc::new(RevocationRecord::new()))
                .value(),
        )
    }

    /// Whether the long-lived token `token_id` has been revoked.
    ///
    /// Store failures are returned as errors and leave the record untouched, so the next
    /// request retries the lookup. Callers must treat an error as a denial.
    #[instrument(skip(self))]
    pub async fn is_revoked(&self, token_id: &str) -> anyhow::Result<bool> {
        // The map guard is released here, before any store call
        let record = self.record(token_id);

        if record.is_revoked() {
            trace!("Token revocation served from cache");
            return Ok(true);
        }

        let now = self.clock.now();
        if now.timestamp_millis() < record.next_check_at_millis() {
            return Ok(false);
        }

        if self.store.exists(token_id).await? {
            let next = now + self.check_interval;
            record.next_check_at.store(next.timestamp_millis(), Ordering::Release);
            trace!("Token still present in store, next check at {}", next);
            Ok(false)
        } else {
            record.revoked.store(true, Ordering::Release);
            debug!("Token no longer present in store, marking revoked");
            Ok(true)
        }
    }

    /// Number of token ids with a cached record.
    pub fn tracked(&self) -> usize {
        self.records.len()
    }
}
