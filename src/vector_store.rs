//! Vector store pool and client (C2).
//!
//! A bounded pool of HTTP connections to an external ANN vector store
//! (a Chroma-like HTTP API), with a `heartbeat` health check run on
//! every recycle so a dead connection is dropped instead of handed back
//! out. Grounded on
//! `original_source/worker/services/connection_pool.py`'s
//! `ChromaDBPool` (min/max bounds, borrow timeout, heartbeat-gated
//! reuse), re-expressed with `deadpool::managed` instead of a
//! hand-rolled queue + lock.

use async_trait::async_trait;
use deadpool::managed::{self, Metrics, Pool, RecycleError, RecycleResult};
use serde::{Deserialize, Serialize};

use crate::config::VectorStoreConfig;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub document: String,
    pub metadata: serde_json::Value,
    pub similarity: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()>;

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        access_level: i32,
        n_results: usize,
    ) -> Result<Vec<VectorMatch>>;

    async fn get_all(&self, collection: &str, access_level: i32) -> Result<Vec<VectorMatch>>;

    async fn delete_all_chunks(&self, collection: &str, document_id: &str) -> Result<()>;

    async fn heartbeat(&self) -> Result<()>;
}

/// A single HTTP connection to the vector store. Cheap to clone
/// (`reqwest::Client` is `Arc`-backed internally); the pool exists to
/// bound concurrent in-flight requests and to gate reuse on a
/// heartbeat, not to amortize socket setup.
#[derive(Clone)]
pub struct VectorStoreConnection {
    http: reqwest::Client,
    base_url: String,
}

impl VectorStoreConnection {
    async fn heartbeat(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/api/v1/heartbeat", self.base_url))
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("vector store heartbeat failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(EngineError::Transient(format!(
                "vector store heartbeat returned {}",
                response.status()
            )))
        }
    }
}

pub struct ConnectionManager {
    config: VectorStoreConfig,
}

impl managed::Manager for ConnectionManager {
    type Type = VectorStoreConnection;
    type Error = EngineError;

    async fn create(&self) -> std::result::Result<VectorStoreConnection, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.borrow_timeout_secs))
            .build()
            .map_err(|e| EngineError::Fatal(format!("failed to build http client: {e}")))?;
        let conn = VectorStoreConnection { http, base_url: self.config.url.clone() };
        conn.heartbeat().await?;
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut VectorStoreConnection,
        _: &Metrics,
    ) -> RecycleResult<EngineError> {
        conn.heartbeat().await.map_err(RecycleError::Backend)
    }
}

pub type VectorStorePool = Pool<ConnectionManager>;

pub fn build_pool(config: VectorStoreConfig) -> Result<VectorStorePool> {
    let max = config.pool_max;
    let manager = ConnectionManager { config };
    Pool::builder(manager)
        .max_size(max)
        .build()
        .map_err(|e| EngineError::Fatal(format!("failed to build vector store pool: {e}")))
}

/// Eagerly establish `min` connections so the pool starts with its
/// configured floor already warm instead of paying connection setup
/// cost on the first real request. `deadpool` has no builtin min-idle
/// option, so this borrows `min` connections and drops the guards
/// together, returning them all to the idle set at once.
pub async fn warm_pool(pool: &VectorStorePool, min: usize) {
    let mut warmed = Vec::with_capacity(min);
    for _ in 0..min {
        match pool.get().await {
            Ok(conn) => warmed.push(conn),
            Err(e) => {
                tracing::warn!(error = %e, "vector store pool warm-up connection failed");
                break;
            }
        }
    }
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    ids: Vec<&'a str>,
    embeddings: Vec<&'a [f32]>,
    documents: Vec<&'a str>,
    metadatas: Vec<&'a serde_json::Value>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query_embeddings: Vec<&'a [f32]>,
    n_results: usize,
    #[serde(rename = "where")]
    filter: serde_json::Value,
}

#[derive(Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    documents: Vec<Vec<String>>,
    metadatas: Vec<Vec<serde_json::Value>>,
    distances: Vec<Vec<f32>>,
}

/// Pooled HTTP-backed [`VectorStore`] implementation. Each call borrows
/// a connection for the duration of the request and returns it to the
/// pool (or drops it, if dead) when the guard goes out of scope.
pub struct PooledVectorStore {
    pool: VectorStorePool,
}

impl PooledVectorStore {
    pub fn new(pool: VectorStorePool) -> Self {
        Self { pool }
    }

    async fn borrow(&self) -> Result<managed::Object<ConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| EngineError::ResourceExhausted(format!("vector store pool exhausted: {e}")))
    }
}

fn distance_to_similarity(distance: f32) -> f32 {
    1.0 - distance
}

#[async_trait]
impl VectorStore for PooledVectorStore {
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let conn = self.borrow().await?;
        let body = UpsertRequest {
            ids: records.iter().map(|r| r.id.as_str()).collect(),
            embeddings: records.iter().map(|r| r.embedding.as_slice()).collect(),
            documents: records.iter().map(|r| r.document.as_str()).collect(),
            metadatas: records.iter().map(|r| &r.metadata).collect(),
        };
        let response = conn
            .http
            .post(format!("{}/api/v1/collections/{collection}/upsert", conn.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("vector store upsert failed: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::Transient(format!(
                "vector store upsert returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        access_level: i32,
        n_results: usize,
    ) -> Result<Vec<VectorMatch>> {
        let conn = self.borrow().await?;
        let body = QueryRequest {
            query_embeddings: vec![embedding],
            n_results,
            filter: serde_json::json!({ "access_level": { "$lte": access_level } }),
        };
        let response = conn
            .http
            .post(format!("{}/api/v1/collections/{collection}/query", conn.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("vector store query failed: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::Transient(format!(
                "vector store query returned {}",
                response.status()
            )));
        }
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("invalid vector store response: {e}")))?;

        let ids = parsed.ids.into_iter().next().unwrap_or_default();
        let docs = parsed.documents.into_iter().next().unwrap_or_default();
        let metas = parsed.metadatas.into_iter().next().unwrap_or_default();
        let dists = parsed.distances.into_iter().next().unwrap_or_default();

        Ok(ids
            .into_iter()
            .zip(docs)
            .zip(metas)
            .zip(dists)
            .map(|(((id, document), metadata), distance)| VectorMatch {
                id,
                document,
                metadata,
                similarity: distance_to_similarity(distance),
            })
            .collect())
    }

    async fn get_all(&self, collection: &str, access_level: i32) -> Result<Vec<VectorMatch>> {
        let conn = self.borrow().await?;
        let response = conn
            .http
            .post(format!("{}/api/v1/collections/{collection}/get", conn.base_url))
            .json(&serde_json::json!({
                "where": { "access_level": { "$lte": access_level } },
            }))
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("vector store get failed: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::Transient(format!(
                "vector store get returned {}",
                response.status()
            )));
        }
        #[derive(Deserialize)]
        struct GetResponse {
            ids: Vec<String>,
            documents: Vec<String>,
            metadatas: Vec<serde_json::Value>,
        }
        let parsed: GetResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("invalid vector store response: {e}")))?;
        Ok(parsed
            .ids
            .into_iter()
            .zip(parsed.documents)
            .zip(parsed.metadatas)
            .map(|((id, document), metadata)| VectorMatch { id, document, metadata, similarity: 0.0 })
            .collect())
    }

    async fn delete_all_chunks(&self, collection: &str, document_id: &str) -> Result<()> {
        let conn = self.borrow().await?;
        let response = conn
            .http
            .post(format!("{}/api/v1/collections/{collection}/delete", conn.base_url))
            .json(&serde_json::json!({ "where": { "document_id": document_id } }))
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("vector store delete failed: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::Transient(format!(
                "vector store delete returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn heartbeat(&self) -> Result<()> {
        let conn = self.borrow().await?;
        conn.heartbeat().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_zero_is_full_similarity() {
        assert!((distance_to_similarity(0.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn distance_one_is_zero_similarity() {
        assert!((distance_to_similarity(1.0) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn distance_beyond_one_goes_negative() {
        assert!((distance_to_similarity(2.0) - (-1.0)).abs() < 1e-6);
    }
}
