//! Durable embedding cache.
//!
//! Maps `(content_hash, model)` to a raw little-endian `f32` vector in a
//! local SQLite database. Entries are keyed by an autoincrement id, which
//! gives the insertion order the eviction policy needs: when the cache
//! exceeds `max_size`, the oldest rows are deleted until it fits. Hit and
//! miss counts live in memory only.

use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::Result;

pub struct EmbeddingCache {
    pool: SqlitePool,
    max_size: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Snapshot of in-memory cache counters.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: u64,
    pub max_size: u64,
}

impl EmbeddingCache {
    pub async fn open(path: &Path, max_size: u64) -> Result<Self> {
        let pool = db::connect(path).await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embedding_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_hash TEXT NOT NULL,
                model TEXT NOT NULL,
                vector BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (content_hash, model)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub async fn get(&self, content_hash: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let row = sqlx::query(
            "SELECT vector FROM embedding_cache WHERE content_hash = ? AND model = ?",
        )
        .bind(content_hash)
        .bind(model)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let blob: Vec<u8> = row.get("vector");
                Ok(Some(blob_to_vec(&blob)))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Insert a vector, then evict oldest entries until the cache fits.
    pub async fn set(&self, content_hash: &str, model: &str, vector: &[f32]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO embedding_cache (content_hash, model, vector, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (content_hash, model) DO UPDATE SET vector = excluded.vector
            "#,
        )
        .bind(content_hash)
        .bind(model)
        .bind(vec_to_blob(vector))
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.evict_until_under_limit().await
    }

    async fn evict_until_under_limit(&self) -> Result<()> {
        let size = self.size().await?;
        if size <= self.max_size {
            return Ok(());
        }
        let excess = (size - self.max_size) as i64;
        sqlx::query(
            r#"
            DELETE FROM embedding_cache WHERE id IN (
                SELECT id FROM embedding_cache ORDER BY id ASC LIMIT ?
            )
            "#,
        )
        .bind(excess)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn size(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.size().await?,
            max_size: self.max_size,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn cache(max: u64) -> (TempDir, EmbeddingCache) {
        let tmp = TempDir::new().unwrap();
        let cache = EmbeddingCache::open(&tmp.path().join("cache.sqlite"), max)
            .await
            .unwrap();
        (tmp, cache)
    }

    #[tokio::test]
    async fn test_roundtrip_bit_identical() {
        let (_tmp, cache) = cache(100).await;
        let vector = vec![0.25f32, -1.5, 3.125, f32::MIN_POSITIVE];
        cache.set("hash1", "model-a", &vector).await.unwrap();

        let first = cache.get("hash1", "model-a").await.unwrap().unwrap();
        let second = cache.get("hash1", "model-a").await.unwrap().unwrap();
        assert_eq!(first, vector);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_model_is_part_of_key() {
        let (_tmp, cache) = cache(100).await;
        cache.set("hash1", "model-a", &[1.0]).await.unwrap();
        assert!(cache.get("hash1", "model-b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eviction_drops_oldest() {
        let (_tmp, cache) = cache(3).await;
        for i in 0..5u32 {
            cache.set(&format!("h{i}"), "m", &[i as f32]).await.unwrap();
        }
        assert_eq!(cache.size().await.unwrap(), 3);
        assert!(cache.get("h0", "m").await.unwrap().is_none());
        assert!(cache.get("h1", "m").await.unwrap().is_none());
        assert!(cache.get("h4", "m").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hit_miss_counters() {
        let (_tmp, cache) = cache(100).await;
        cache.set("known", "m", &[1.0]).await.unwrap();
        cache.get("known", "m").await.unwrap();
        cache.get("unknown", "m").await.unwrap();
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
