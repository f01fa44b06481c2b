//! On-disk HTTP response cache for feed documents.
//!
//! Bodies live in a single SQLite database (`http-cache.sqlite`) under the
//! configured cache directory. The total stored body size is capped; when a
//! new body pushes the total over the cap, the oldest entries are evicted.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use thiserror::Error;

/// File name of the cache database inside the cache directory.
pub const CACHE_FILE_NAME: &str = "http-cache.sqlite";

/// Default cap on the total size of cached bodies (10 MiB).
pub const DEFAULT_CACHE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cannot create cache directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cache database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A cached response body plus the validators needed to revalidate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Unix seconds after which the entry must be revalidated; `None` means always
    pub expires_at: Option<i64>,
}

impl CachedResponse {
    pub fn is_fresh(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires| now < expires)
    }

    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }

    /// Whether a later fetch could use this entry, either served fresh or revalidated.
    pub fn is_reusable(&self) -> bool {
        self.has_validators() || self.expires_at.is_some()
    }
}

/// The `Cache-Control` directives the cache acts on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub max_age: Option<u64>,
}

impl CacheControl {
    /// Parses a `Cache-Control` header value. Unknown directives are ignored.
    pub fn parse(value: &str) -> Self {
        let mut control = Self::default();
        for directive in value.split(',') {
            let directive = directive.trim();
            let (name, arg) = match directive.split_once('=') {
                Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
                None => (directive, None),
            };
            if name.eq_ignore_ascii_case("no-store") {
                control.no_store = true;
            } else if name.eq_ignore_ascii_case("no-cache") {
                control.no_cache = true;
            } else if name.eq_ignore_ascii_case("max-age") {
                control.max_age = arg.and_then(|a| a.parse().ok());
            }
        }
        control
    }

    /// Expiry timestamp for a response received at `now`.
    pub fn expires_at(&self, now: i64) -> Option<i64> {
        if self.no_cache {
            return None;
        }
        let max_age = i64::try_from(self.max_age?).ok()?;
        now.checked_add(max_age)
    }
}

/// SQLite-backed response store, keyed by request URL.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    pool: SqlitePool,
    max_bytes: u64,
}

impl ResponseCache {
    /// Opens (creating if needed) the cache database in `dir`.
    pub async fn open(dir: &Path, max_bytes: u64) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir)?;

        let options = SqliteConnectOptions::new()
            .filename(dir.join(CACHE_FILE_NAME))
            .create_if_missing(true)
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let cache = Self { pool, max_bytes };
        cache.migrate().await?;
        Ok(cache)
    }

    async fn migrate(&self) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS http_responses (
                url TEXT PRIMARY KEY NOT NULL,
                body BLOB NOT NULL,
                etag TEXT,
                last_modified TEXT,
                stored_at INTEGER NOT NULL,
                expires_at INTEGER,
                size_bytes INTEGER NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_http_responses_stored_at ON http_responses(stored_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub async fn get(&self, url: &str) -> Result<Option<CachedResponse>, CacheError> {
        let row: Option<(Vec<u8>, Option<String>, Option<String>, Option<i64>)> = sqlx::query_as(
            "SELECT body, etag, last_modified, expires_at FROM http_responses WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(body, etag, last_modified, expires_at)| CachedResponse {
            body,
            etag,
            last_modified,
            expires_at,
        }))
    }

    /// Stores `response` for `url`, evicting the oldest entries until the
    /// total fits the cap.
    ///
    /// A body larger than the whole cache is not stored, and any previous
    /// entry for `url` is dropped so a stale body is not served later.
    pub async fn store(&self, url: &str, response: &CachedResponse) -> Result<(), CacheError> {
        let size = response.body.len() as u64;
        if size > self.max_bytes {
            tracing::debug!(url = %url, size, max = self.max_bytes, "Response too large to cache");
            return self.remove(url).await;
        }

        let max_bytes = i64::try_from(self.max_bytes).unwrap_or(i64::MAX);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO http_responses
                (url, body, etag, last_modified, stored_at, expires_at, size_bytes)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(url)
        .bind(&response.body[..])
        .bind(response.etag.as_deref())
        .bind(response.last_modified.as_deref())
        .bind(Utc::now().timestamp())
        .bind(response.expires_at)
        .bind(size as i64)
        .execute(&mut *tx)
        .await?;

        let (total,): (Option<i64>,) = sqlx::query_as("SELECT SUM(size_bytes) FROM http_responses")
            .fetch_one(&mut *tx)
            .await?;
        let mut total = total.unwrap_or(0);

        if total > max_bytes {
            let oldest: Vec<(String, i64)> = sqlx::query_as(
                r#"
                SELECT url, size_bytes FROM http_responses
                WHERE url != ?
                ORDER BY stored_at ASC, rowid ASC
            "#,
            )
            .bind(url)
            .fetch_all(&mut *tx)
            .await?;

            let mut evicted = 0usize;
            for (victim, victim_size) in oldest {
                if total <= max_bytes {
                    break;
                }
                sqlx::query("DELETE FROM http_responses WHERE url = ?")
                    .bind(&victim)
                    .execute(&mut *tx)
                    .await?;
                total -= victim_size;
                evicted += 1;
            }
            tracing::debug!(evicted, total_bytes = total, "Evicted cached responses");
        }

        tx.commit().await?;
        Ok(())
    }

    /// Records a successful revalidation: new expiry, entry counts as recently stored.
    pub async fn refresh(&self, url: &str, expires_at: Option<i64>) -> Result<(), CacheError> {
        sqlx::query("UPDATE http_responses SET expires_at = ?, stored_at = ? WHERE url = ?")
            .bind(expires_at)
            .bind(Utc::now().timestamp())
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, url: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM http_responses WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Total size of all cached bodies, in bytes.
    pub async fn total_size(&self) -> Result<u64, CacheError> {
        let (total,): (Option<i64>,) = sqlx::query_as("SELECT SUM(size_bytes) FROM http_responses")
            .fetch_one(&self.pool)
            .await?;
        Ok(total.unwrap_or(0).max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn response(body: &[u8]) -> CachedResponse {
        CachedResponse {
            body: body.to_vec(),
            etag: Some("\"v1\"".into()),
            last_modified: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_cache_control_parse() {
        assert_eq!(
            CacheControl::parse("public, max-age=300"),
            CacheControl {
                no_store: false,
                no_cache: false,
                max_age: Some(300),
            }
        );
        assert!(CacheControl::parse("No-Store").no_store);
        assert!(CacheControl::parse("no-cache, max-age=60").no_cache);
        assert_eq!(CacheControl::parse("max-age=\"10\"").max_age, Some(10));
        assert_eq!(CacheControl::parse("max-age=soon").max_age, None);
        assert_eq!(CacheControl::parse(""), CacheControl::default());
    }

    #[test]
    fn test_expiry() {
        assert_eq!(CacheControl::parse("max-age=60").expires_at(1_000), Some(1_060));
        assert_eq!(CacheControl::parse("no-cache, max-age=60").expires_at(1_000), None);
        assert_eq!(CacheControl::default().expires_at(1_000), None);
    }

    #[test]
    fn test_freshness() {
        let mut entry = response(b"x");
        assert!(!entry.is_fresh(0));
        entry.expires_at = Some(100);
        assert!(entry.is_fresh(99));
        assert!(!entry.is_fresh(100));
    }

    #[test]
    fn test_reusable_needs_validator_or_expiry() {
        let mut entry = response(b"x");
        assert!(entry.is_reusable());
        entry.etag = None;
        assert!(!entry.is_reusable());
        entry.last_modified = Some("Tue, 02 Jan 2024 03:04:05 GMT".into());
        assert!(entry.is_reusable());
        entry.last_modified = None;
        entry.expires_at = Some(100);
        assert!(entry.is_reusable());
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), 1024).await.unwrap();

        assert_eq!(cache.get("https://a.example/feed").await.unwrap(), None);

        cache.store("https://a.example/feed", &response(b"<rss/>")).await.unwrap();
        let cached = cache.get("https://a.example/feed").await.unwrap().unwrap();
        assert_eq!(cached.body, b"<rss/>");
        assert_eq!(cached.etag.as_deref(), Some("\"v1\""));
        assert!(dir.path().join(CACHE_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_store_replaces_previous_body() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), 1024).await.unwrap();

        cache.store("u", &response(b"first")).await.unwrap();
        cache.store("u", &response(b"second!")).await.unwrap();

        assert_eq!(cache.get("u").await.unwrap().unwrap().body, b"second!");
        assert_eq!(cache.total_size().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_eviction_drops_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), 10).await.unwrap();

        cache.store("a", &response(b"aaaa")).await.unwrap();
        cache.store("b", &response(b"bbbb")).await.unwrap();
        cache.store("c", &response(b"cccc")).await.unwrap();

        assert_eq!(cache.get("a").await.unwrap(), None);
        assert!(cache.get("b").await.unwrap().is_some());
        assert!(cache.get("c").await.unwrap().is_some());
        assert!(cache.total_size().await.unwrap() <= 10);
    }

    #[tokio::test]
    async fn test_oversized_body_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), 4).await.unwrap();

        cache.store("u", &response(b"tiny")).await.unwrap();
        cache.store("u", &response(b"far too large")).await.unwrap();

        assert_eq!(cache.get("u").await.unwrap(), None);
        assert_eq!(cache.total_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refresh_updates_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), 1024).await.unwrap();

        cache.store("u", &response(b"body")).await.unwrap();
        cache.refresh("u", Some(42)).await.unwrap();

        assert_eq!(cache.get("u").await.unwrap().unwrap().expires_at, Some(42));
    }

    #[tokio::test]
    async fn test_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = ResponseCache::open(dir.path(), 1024).await.unwrap();
            cache.store("u", &response(b"persisted")).await.unwrap();
        }
        let reopened = ResponseCache::open(dir.path(), 1024).await.unwrap();
        assert_eq!(reopened.get("u").await.unwrap().unwrap().body, b"persisted");
    }
}
