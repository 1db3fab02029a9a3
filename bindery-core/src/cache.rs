//! Metadata cache keyed by book id.
//!
//! The cache is an optimization layered over the object store: the pipeline
//! treats every cache failure as a miss on read and logs on write, so a
//! broken backend degrades throughput, never correctness.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Cached reference to an uploaded artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub book_id: String,
    pub book_title: String,
    pub artifact_key: String,
    pub artifact_size: i64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
#[error("cache backend error: {0}")]
pub struct CacheError(pub String);

#[async_trait]
pub trait MetadataCache: Send + Sync {
    async fn get(&self, book_id: &str) -> Result<Option<CacheRecord>, CacheError>;
    async fn put(&self, record: &CacheRecord) -> Result<(), CacheError>;
    async fn delete(&self, book_id: &str) -> Result<(), CacheError>;
    async fn exists(&self, book_id: &str) -> Result<bool, CacheError>;
}

fn record_key(book_id: &str) -> String {
    format!("book:{book_id}")
}

/// Redis-backed cache. Records are small JSON blobs stored without a TTL;
/// eviction is an operational concern.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError(format!("failed to create redis client: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError(format!("failed to connect to redis: {e}")))?;
        info!("connected to redis metadata cache");
        Ok(Self { conn })
    }
}

#[async_trait]
impl MetadataCache for RedisCache {
    async fn get(&self, book_id: &str) -> Result<Option<CacheRecord>, CacheError> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn
            .get(record_key(book_id))
            .await
            .map_err(|e| CacheError(format!("GET failed: {e}")))?;

        match data {
            Some(json) => {
                let record: CacheRecord = serde_json::from_str(&json)
                    .map_err(|e| CacheError(format!("corrupt cache record: {e}")))?;
                debug!(book_id, "cache hit");
                Ok(Some(record))
            }
            None => {
                debug!(book_id, "cache miss");
                Ok(None)
            }
        }
    }

    async fn put(&self, record: &CacheRecord) -> Result<(), CacheError> {
        let json = serde_json::to_string(record)
            .map_err(|e| CacheError(format!("failed to serialize record: {e}")))?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(record_key(&record.book_id), json)
            .await
            .map_err(|e| CacheError(format!("SET failed: {e}")))?;
        debug!(book_id = %record.book_id, "cache record stored");
        Ok(())
    }

    async fn delete(&self, book_id: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(record_key(book_id))
            .await
            .map_err(|e| CacheError(format!("DEL failed: {e}")))
    }

    async fn exists(&self, book_id: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        conn.exists(record_key(book_id))
            .await
            .map_err(|e| CacheError(format!("EXISTS failed: {e}")))
    }
}

/// In-memory cache used by tests and available as a degraded-mode stand-in.
#[derive(Default)]
pub struct MemoryCache {
    records: Mutex<HashMap<String, CacheRecord>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataCache for MemoryCache {
    async fn get(&self, book_id: &str) -> Result<Option<CacheRecord>, CacheError> {
        Ok(self.records.lock().unwrap().get(book_id).cloned())
    }

    async fn put(&self, record: &CacheRecord) -> Result<(), CacheError> {
        self.records
            .lock()
            .unwrap()
            .insert(record.book_id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, book_id: &str) -> Result<(), CacheError> {
        self.records.lock().unwrap().remove(book_id);
        Ok(())
    }

    async fn exists(&self, book_id: &str) -> Result<bool, CacheError> {
        Ok(self.records.lock().unwrap().contains_key(book_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> CacheRecord {
        CacheRecord {
            book_id: "9781491936153".into(),
            book_title: "Designing Data-Intensive Applications".into(),
            artifact_key: "9781491936153/Designing Data-Intensive Applications.epub".into(),
            artifact_size: 4_194_304,
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn record_key_format() {
        assert_eq!(record_key("9781491936153"), "book:9781491936153");
    }

    #[test]
    fn record_roundtrips_through_json() {
        let record = sample_record();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: CacheRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[tokio::test]
    async fn memory_cache_put_get_delete() {
        let cache = MemoryCache::new();
        let record = sample_record();

        assert!(cache.get(&record.book_id).await.unwrap().is_none());
        cache.put(&record).await.unwrap();
        assert!(cache.exists(&record.book_id).await.unwrap());
        assert_eq!(cache.get(&record.book_id).await.unwrap().unwrap(), record);

        cache.delete(&record.book_id).await.unwrap();
        assert!(!cache.exists(&record.book_id).await.unwrap());
    }
}
