//! Revocation store (token blacklist)
//!
//! Records token strings that must be rejected before their natural expiry.
//! Each entry lives exactly as long as the token it revokes; expired entries
//! are forgotten by the backend, never by application code.
//!
//! Backends:
//! - [`MokaRevocationStore`]: in-process cache with per-entry expiry
//! - [`PgRevocationStore`]: `revoked_tokens` table plus a periodic sweeper
//!
//! Every authenticated request consults the live store; there is no read-side
//! cache in front of it.

use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache;
use moka::Expiry;
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Namespace for revocation keys inside a shared store
pub const REVOCATION_KEY_PREFIX: &str = "blacklist:";

#[derive(Debug, Error)]
pub enum RevocationError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Revocation store error: {0}")]
    Store(String),

    #[error("Revocation store timed out after {0:?}")]
    Timeout(Duration),
}

/// Key-existence store with per-entry TTL
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Revoke `token` for at least `ttl`
    ///
    /// Adding an already revoked token keeps it revoked; the entry lives until
    /// the later of the two deadlines.
    async fn add(&self, token: &str, ttl: Duration) -> Result<(), RevocationError>;

    /// Revoke `token` only if it is not currently revoked
    ///
    /// Returns `true` for the single caller that performed the revocation.
    /// Refresh rotation relies on this to pick one winner per refresh token.
    async fn add_if_absent(&self, token: &str, ttl: Duration) -> Result<bool, RevocationError>;

    /// Whether `token` is currently revoked
    async fn is_revoked(&self, token: &str) -> Result<bool, RevocationError>;
}

/// Storage key for a token
pub fn revocation_key(token: &str) -> String {
    format!("{REVOCATION_KEY_PREFIX}{token}")
}

fn check_token(token: &str) -> Result<(), RevocationError> {
    if token.is_empty() {
        return Err(RevocationError::InvalidArgument("token must not be empty"));
    }
    Ok(())
}

fn check_entry(token: &str, ttl: Duration) -> Result<(), RevocationError> {
    check_token(token)?;
    if ttl.is_zero() {
        return Err(RevocationError::InvalidArgument("ttl must be positive"));
    }
    Ok(())
}

// ============================================================================
// In-process backend
// ============================================================================

/// Expires each entry at the deadline stored as its value
struct DeadlineExpiry;

impl Expiry<String, Instant> for DeadlineExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        deadline: &Instant,
        created_at: Instant,
    ) -> Option<Duration> {
        Some(deadline.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        deadline: &Instant,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(deadline.saturating_duration_since(updated_at))
    }
}

/// moka-backed revocation store for single-instance deployments
///
/// Unbounded on purpose: a size-based eviction would silently un-revoke a token.
/// Memory is bounded by the number of tokens revoked within one refresh TTL.
#[derive(Clone)]
pub struct MokaRevocationStore {
    cache: Cache<String, Instant>,
}

impl MokaRevocationStore {
    pub fn new() -> Self {
        let cache = Cache::builder().expire_after(DeadlineExpiry).build();
        Self { cache }
    }

    /// Number of live entries (approximate, for diagnostics)
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for MokaRevocationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RevocationStore for MokaRevocationStore {
    async fn add(&self, token: &str, ttl: Duration) -> Result<(), RevocationError> {
        check_entry(token, ttl)?;
        let deadline = Instant::now() + ttl;

        self.cache
            .entry(revocation_key(token))
            .and_upsert_with(|existing| {
                let deadline = existing
                    .map(|entry| (*entry.value()).max(deadline))
                    .unwrap_or(deadline);
                std::future::ready(deadline)
            })
            .await;

        Ok(())
    }

    async fn add_if_absent(&self, token: &str, ttl: Duration) -> Result<bool, RevocationError> {
        check_entry(token, ttl)?;
        let deadline = Instant::now() + ttl;

        let entry = self
            .cache
            .entry(revocation_key(token))
            .or_insert(deadline)
            .await;

        Ok(entry.is_fresh())
    }

    async fn is_revoked(&self, token: &str) -> Result<bool, RevocationError> {
        check_token(token)?;
        Ok(self
            .cache
            .get(&revocation_key(token))
            .await
            .is_some_and(|deadline| deadline > Instant::now()))
    }
}

// ============================================================================
// PostgreSQL backend
// ============================================================================

/// Revocation store on the `revoked_tokens` table
///
/// Rows past `expires_at` are ignored by every query and deleted by
/// [`PgRevocationStore::sweep_expired`].
#[derive(Clone)]
pub struct PgRevocationStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgRevocationStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, RevocationError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result.map_err(|e| RevocationError::Store(e.to_string())),
            Err(_) => Err(RevocationError::Timeout(self.timeout)),
        }
    }

    fn deadline(ttl: Duration) -> Result<chrono::DateTime<Utc>, RevocationError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| RevocationError::InvalidArgument("ttl out of range"))?;
        Ok(Utc::now() + ttl)
    }

    /// Delete expired rows, returning how many were removed
    pub async fn sweep_expired(&self) -> Result<u64, RevocationError> {
        let result = self
            .bounded(
                sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= $1")
                    .bind(Utc::now())
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    /// Run [`Self::sweep_expired`] on a fixed interval until the task is aborted
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match self.sweep_expired().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "Swept expired revocation entries"),
                    Err(e) => tracing::warn!(error = %e, "Revocation sweep failed"),
                }
            }
        })
    }
}

#[async_trait]
impl RevocationStore for PgRevocationStore {
    async fn add(&self, token: &str, ttl: Duration) -> Result<(), RevocationError> {
        check_entry(token, ttl)?;
        let expires_at = Self::deadline(ttl)?;

        self.bounded(
            sqlx::query(
                r#"
                INSERT INTO revoked_tokens (token_key, expires_at)
                VALUES ($1, $2)
                ON CONFLICT (token_key) DO UPDATE
                SET expires_at = GREATEST(revoked_tokens.expires_at, EXCLUDED.expires_at)
                "#,
            )
            .bind(revocation_key(token))
            .bind(expires_at)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn add_if_absent(&self, token: &str, ttl: Duration) -> Result<bool, RevocationError> {
        check_entry(token, ttl)?;
        let now = Utc::now();
        let expires_at = Self::deadline(ttl)?;

        // A live row makes the conflict branch a no-op; an expired leftover is
        // replaced as if it were absent.
        let result = self
            .bounded(
                sqlx::query(
                    r#"
                    INSERT INTO revoked_tokens (token_key, expires_at, revoked_at)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (token_key) DO UPDATE
                    SET expires_at = EXCLUDED.expires_at, revoked_at = EXCLUDED.revoked_at
                    WHERE revoked_tokens.expires_at <= EXCLUDED.revoked_at
                    "#,
                )
                .bind(revocation_key(token))
                .bind(expires_at)
                .bind(now)
                .execute(&self.pool),
            )
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn is_revoked(&self, token: &str) -> Result<bool, RevocationError> {
        check_token(token)?;

        self.bounded(
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM revoked_tokens WHERE token_key = $1 AND expires_at > $2)",
            )
            .bind(revocation_key(token))
            .bind(Utc::now())
            .fetch_one(&self.pool),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_revocation_key_is_namespaced() {
        assert_eq!(revocation_key("abc"), "blacklist:abc");
    }

    #[tokio::test]
    async fn test_add_then_is_revoked() {
        let store = MokaRevocationStore::new();

        assert!(!store.is_revoked("token-a").await.unwrap());
        store.add("token-a", TTL).await.unwrap();
        assert!(store.is_revoked("token-a").await.unwrap());
        assert!(!store.is_revoked("token-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let store = MokaRevocationStore::new();

        store.add("token", TTL).await.unwrap();
        store.add("token", Duration::from_secs(1)).await.unwrap();
        assert!(store.is_revoked("token").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_empty_token_and_zero_ttl() {
        let store = MokaRevocationStore::new();

        assert!(matches!(
            store.add("", TTL).await,
            Err(RevocationError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.add("token", Duration::ZERO).await,
            Err(RevocationError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.is_revoked("").await,
            Err(RevocationError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.add_if_absent("token", Duration::ZERO).await,
            Err(RevocationError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let store = MokaRevocationStore::new();

        store.add("short", Duration::from_millis(300)).await.unwrap();
        assert!(store.is_revoked("short").await.unwrap());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!store.is_revoked("short").await.unwrap());
    }

    #[tokio::test]
    async fn test_longer_deadline_wins() {
        let store = MokaRevocationStore::new();

        store.add("token", Duration::from_secs(30)).await.unwrap();
        store.add("token", Duration::from_millis(200)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(store.is_revoked("token").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_if_absent_single_winner() {
        let store = MokaRevocationStore::new();

        assert!(store.add_if_absent("refresh", TTL).await.unwrap());
        assert!(!store.add_if_absent("refresh", TTL).await.unwrap());
        assert!(store.is_revoked("refresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_if_absent_concurrent() {
        let store = MokaRevocationStore::new();

        let attempts = (0..32).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.add_if_absent("contested", TTL).await })
        });
        let winners = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(true))))
            .count();

        assert_eq!(winners, 1);
    }
}
