//! Result/BM25 cache store (C1).
//!
//! Two independently-TTL'd namespaces in a shared Redis instance:
//! `search_cache:` for hybrid search results, `bm25_cache:` for built
//! BM25 indexes. Every method degrades to a miss/no-op on any Redis
//! error rather than propagating it — caching is an optimization, never
//! a dependency the retrieval path can fail on.
//!
//! Grounded on `original_source/worker/services/cache_service.py`.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

use crate::config::CacheConfig;

const SEARCH_PREFIX: &str = "search_cache:";
const BM25_PREFIX: &str = "bm25_cache:";

/// Build the MD5 cache key for a search request: the same
/// `{query, access_level, params}` canonical-JSON hash the Python
/// service used, so a migrated deployment's existing cache entries
/// remain addressable by the same keys.
pub fn search_cache_key(query: &str, access_level: i32, params: &serde_json::Value) -> String {
    let payload = serde_json::json!({
        "query": query.trim().to_lowercase(),
        "access_level": access_level,
        "params": params,
    });
    let canonical = canonicalize(&payload);
    let digest = md5::compute(canonical.as_bytes());
    format!("{SEARCH_PREFIX}{digest:x}")
}

pub fn bm25_cache_key(access_level: i32) -> String {
    format!("{BM25_PREFIX}index_{access_level}")
}

/// Recursively sort object keys so the JSON serialization is stable
/// regardless of insertion order, matching Python's `sort_keys=True`.
fn canonicalize(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut sorted = serde_json::Map::new();
                for (k, v) in entries {
                    sorted.insert(k.clone(), sort(v));
                }
                serde_json::Value::Object(sorted)
            }
            serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_result(&self, key: &str) -> Option<serde_json::Value>;
    async fn put_result(&self, key: &str, value: &serde_json::Value);
    async fn get_bm25(&self, access_level: i32) -> Option<Vec<u8>>;
    async fn put_bm25(&self, access_level: i32, payload: &[u8]);
    async fn invalidate_bm25(&self, access_level: Option<i32>);
    async fn invalidate_search(&self);
}

/// Redis-backed implementation using `ConnectionManager`, which
/// transparently reconnects on transient connection loss so callers
/// never have to manage a connection pool of their own.
pub struct RedisCacheStore {
    conn: Arc<tokio::sync::Mutex<redis::aio::ConnectionManager>>,
    config: CacheConfig,
}

impl RedisCacheStore {
    pub async fn connect(config: CacheConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn: Arc::new(tokio::sync::Mutex::new(conn)), config })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get_result(&self, key: &str) -> Option<serde_json::Value> {
        let mut conn = self.conn.lock().await;
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(mut value) => {
                    if let Some(obj) = value.as_object_mut() {
                        obj.insert("from_cache".to_string(), serde_json::Value::Bool(true));
                    }
                    Some(value)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to deserialize cached result, treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "cache get failed, degrading to miss");
                None
            }
        }
    }

    async fn put_result(&self, key: &str, value: &serde_json::Value) {
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize result for cache write");
                return;
            }
        };
        let mut conn = self.conn.lock().await;
        if let Err(e) = conn
            .set_ex::<_, _, ()>(key, serialized, self.config.result_ttl_secs)
            .await
        {
            tracing::warn!(error = %e, "cache write failed, continuing without cache");
        }
    }

    async fn get_bm25(&self, access_level: i32) -> Option<Vec<u8>> {
        let key = bm25_cache_key(access_level);
        let mut conn = self.conn.lock().await;
        match conn.get::<_, Option<Vec<u8>>>(&key).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "bm25 cache get failed, degrading to miss");
                None
            }
        }
    }

    async fn put_bm25(&self, access_level: i32, payload: &[u8]) {
        let key = bm25_cache_key(access_level);
        let mut conn = self.conn.lock().await;
        if let Err(e) = conn.set_ex::<_, _, ()>(&key, payload, self.config.bm25_ttl_secs).await {
            tracing::warn!(error = %e, "bm25 cache write failed, continuing without cache");
        }
    }

    async fn invalidate_bm25(&self, access_level: Option<i32>) {
        let mut conn = self.conn.lock().await;
        let result = match access_level {
            Some(level) => conn.del::<_, ()>(bm25_cache_key(level)).await,
            None => {
                let keys: Vec<String> = match conn.keys(format!("{BM25_PREFIX}*")).await {
                    Ok(k) => k,
                    Err(e) => {
                        tracing::warn!(error = %e, "bm25 cache scan failed during invalidate-all");
                        return;
                    }
                };
                if keys.is_empty() {
                    return;
                }
                conn.del::<_, ()>(keys).await
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "bm25 cache invalidation failed");
        }
    }

    async fn invalidate_search(&self) {
        let mut conn = self.conn.lock().await;
        let keys: Vec<String> = match conn.keys(format!("{SEARCH_PREFIX}*")).await {
            Ok(k) => k,
            Err(e) => {
                tracing::warn!(error = %e, "search cache scan failed during invalidate");
                return;
            }
        };
        if keys.is_empty() {
            return;
        }
        if let Err(e) = conn.del::<_, ()>(keys).await {
            tracing::warn!(error = %e, "search cache invalidation failed");
        }
    }
}

/// Convenience wrapper so callers can cache/read typed values through a
/// [`CacheStore`] without hand-rolling `serde_json` calls at each site.
pub async fn get_typed<T: DeserializeOwned>(store: &dyn CacheStore, key: &str) -> Option<T> {
    let value = store.get_result(key).await?;
    serde_json::from_value(value).ok()
}

pub async fn put_typed<T: Serialize>(store: &dyn CacheStore, key: &str, value: &T) {
    if let Ok(json) = serde_json::to_value(value) {
        store.put_result(key, &json).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_case_and_whitespace_insensitive() {
        let params = serde_json::json!({});
        let a = search_cache_key("  Who is  ", 10, &params);
        let b = search_cache_key("who is", 10, &params);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_differs_by_access_level() {
        let params = serde_json::json!({});
        let a = search_cache_key("query", 10, &params);
        let b = search_cache_key("query", 20, &params);
        assert_ne!(a, b);
    }

    #[test]
    fn cache_key_has_expected_prefix() {
        let key = search_cache_key("query", 10, &serde_json::json!({}));
        assert!(key.starts_with(SEARCH_PREFIX));
    }

    #[test]
    fn bm25_key_is_per_access_level() {
        assert_eq!(bm25_cache_key(42), "bm25_cache:index_42");
    }

    #[test]
    fn canonicalization_is_order_independent() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }
}
