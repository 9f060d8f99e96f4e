//! End-to-end tests driving the ingest and retrieval pipelines together,
//! against in-memory stand-ins for the external collaborators (vector
//! store, cache, reranker, embedding server). Exercises the seed
//! scenarios from the spec: cumulative-visibility access control,
//! unsupported-format rejection with compensation, cache reuse, and
//! empty-corpus behavior.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;

use hybrid_retriever::bm25::Bm25Manager;
use hybrid_retriever::cache::CacheStore;
use hybrid_retriever::config::Config;
use hybrid_retriever::db;
use hybrid_retriever::embedding::{EmbeddingClient, EmbeddingResult};
use hybrid_retriever::error::Result;
use hybrid_retriever::ingest::Ingestor;
use hybrid_retriever::migrate;
use hybrid_retriever::models::DocumentStatus;
use hybrid_retriever::reranker::RerankerClient;
use hybrid_retriever::retriever::Retriever;
use hybrid_retriever::synonyms::SynonymExpander;
use hybrid_retriever::vector_store::{VectorMatch, VectorRecord, VectorStore};
use std::sync::Arc;

const DIMS: usize = 16;

/// Deterministic bag-of-words embedding: each dimension accumulates a
/// per-word hash bucket, then the vector is used as-is (the embedding
/// client already normalizes on the real path; tests only need
/// consistent relative similarity, not unit length).
fn bow_embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text.to_lowercase().split_whitespace() {
        let bucket = (word.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32)) as usize) % DIMS;
        v[bucket] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

struct StubEmbedding;

#[async_trait]
impl EmbeddingClient for StubEmbedding {
    fn model_name(&self) -> &str {
        "stub-embedding"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed_documents(&self, texts: &[String]) -> Result<EmbeddingResult> {
        Ok(EmbeddingResult {
            vectors: texts.iter().map(|t| bow_embed(t)).collect(),
            token_count: 0,
            elapsed: std::time::Duration::ZERO,
            instruction_prefix: None,
            detected_language: None,
        })
    }
    async fn embed_query(&self, text: &str) -> Result<EmbeddingResult> {
        Ok(EmbeddingResult {
            vectors: vec![bow_embed(text)],
            token_count: 0,
            elapsed: std::time::Duration::ZERO,
            instruction_prefix: None,
            detected_language: None,
        })
    }
}

struct StubReranker;

#[async_trait]
impl RerankerClient for StubReranker {
    fn model_name(&self) -> &str {
        "stub-reranker"
    }
    async fn raw_logits(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let query_words: std::collections::HashSet<String> =
            query.to_lowercase().split_whitespace().map(String::from).collect();
        Ok(documents
            .iter()
            .map(|doc| {
                let doc_words: std::collections::HashSet<String> =
                    doc.to_lowercase().split_whitespace().map(String::from).collect();
                query_words.intersection(&doc_words).count() as f32
            })
            .collect())
    }
}

#[derive(Default)]
struct StubVectorStore {
    records: Mutex<HashMap<String, Vec<VectorRecord>>>,
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

fn record_access_level(record: &VectorRecord) -> i32 {
    record.metadata.get("access_level").and_then(|v| v.as_i64()).unwrap_or(0) as i32
}

fn record_document_id(record: &VectorRecord) -> String {
    record.metadata.get("document_id").and_then(|v| v.as_str()).map(String::from).unwrap_or_default()
}

#[async_trait]
impl VectorStore for StubVectorStore {
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        let mut guard = self.records.lock().unwrap();
        let bucket = guard.entry(collection.to_string()).or_default();
        for record in records {
            bucket.retain(|r| r.id != record.id);
            bucket.push(record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        access_level: i32,
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let guard = self.records.lock().unwrap();
        let mut scored: Vec<(f32, &VectorRecord)> = guard
            .get(collection)
            .map(|bucket| bucket.iter())
            .into_iter()
            .flatten()
            .filter(|r| record_access_level(r) <= access_level)
            .map(|r| (cosine(vector, &r.embedding), r))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(similarity, r)| VectorMatch {
                id: r.id.clone(),
                document: r.document.clone(),
                metadata: r.metadata.clone(),
                similarity,
            })
            .collect())
    }

    async fn get_all(&self, collection: &str, access_level: i32) -> Result<Vec<VectorMatch>> {
        let guard = self.records.lock().unwrap();
        Ok(guard
            .get(collection)
            .map(|bucket| bucket.iter())
            .into_iter()
            .flatten()
            .filter(|r| record_access_level(r) <= access_level)
            .map(|r| VectorMatch { id: r.id.clone(), document: r.document.clone(), metadata: r.metadata.clone(), similarity: 1.0 })
            .collect())
    }

    async fn delete_all_chunks(&self, collection: &str, document_id: &str) -> Result<()> {
        let mut guard = self.records.lock().unwrap();
        if let Some(bucket) = guard.get_mut(collection) {
            bucket.retain(|r| record_document_id(r) != document_id);
        }
        Ok(())
    }

    async fn heartbeat(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryCache {
    results: Mutex<HashMap<String, serde_json::Value>>,
    bm25: Mutex<HashMap<i32, Vec<u8>>>,
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get_result(&self, key: &str) -> Option<serde_json::Value> {
        self.results.lock().unwrap().get(key).cloned()
    }
    async fn put_result(&self, key: &str, value: &serde_json::Value) {
        self.results.lock().unwrap().insert(key.to_string(), value.clone());
    }
    async fn get_bm25(&self, access_level: i32) -> Option<Vec<u8>> {
        self.bm25.lock().unwrap().get(&access_level).cloned()
    }
    async fn put_bm25(&self, access_level: i32, payload: &[u8]) {
        self.bm25.lock().unwrap().insert(access_level, payload.to_vec());
    }
    async fn invalidate_bm25(&self, access_level: Option<i32>) {
        let mut guard = self.bm25.lock().unwrap();
        match access_level {
            Some(level) => {
                guard.remove(&level);
            }
            None => guard.clear(),
        }
    }
    async fn invalidate_search(&self) {
        self.results.lock().unwrap().clear();
    }
}

struct Harness {
    _tmp: TempDir,
    ingestor: Ingestor,
    retriever: Retriever,
}

async fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let mut cfg: Config = toml::from_str("").unwrap();
    cfg.db.path = tmp.path().join("hr.sqlite");
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();

    let vector_store: Arc<dyn VectorStore> = Arc::new(StubVectorStore::default());
    let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCache::default());
    let bm25 = Arc::new(Bm25Manager::new());
    let embedding: Arc<dyn EmbeddingClient> = Arc::new(StubEmbedding);
    let reranker: Arc<dyn RerankerClient> = Arc::new(StubReranker);
    let synonyms = Arc::new(SynonymExpander::default());

    let ingestor = Ingestor::new(
        pool.clone(),
        vector_store.clone(),
        cache.clone(),
        bm25.clone(),
        embedding.clone(),
        None,
        cfg.chunking.clone(),
        "chunks",
    );
    let retriever = Retriever::new(
        embedding,
        vector_store,
        cache,
        bm25,
        synonyms,
        reranker,
        pool,
        cfg.retrieval.clone(),
        "chunks",
    );

    Harness { _tmp: tmp, ingestor, retriever }
}

fn write_fixture(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path.to_string_lossy().to_string()
}

#[tokio::test]
async fn ingest_then_search_finds_relevant_chunk() {
    let h = harness().await;
    let files = TempDir::new().unwrap();

    let rust_doc = write_fixture(
        &files,
        "rust.md",
        "# Rust Ownership\n\nRust ownership and borrowing prevent data races at compile time.",
    );
    let python_doc = write_fixture(
        &files,
        "python.md",
        "# Python Learning\n\nPython machine learning frameworks like PyTorch are popular.",
    );

    h.ingestor.process_document("doc-rust", &rust_doc, 10, Some("Rust Ownership".into())).await.unwrap();
    h.ingestor.process_document("doc-python", &python_doc, 10, Some("Python Learning".into())).await.unwrap();

    let report = h.retriever.hybrid_search("Rust ownership borrowing", 10, None, None, None, None, None).await.unwrap();

    assert!(report.success, "expected a successful retrieval, got {:?}", report);
    assert!(!report.sources.is_empty());
    assert!(
        report.sources[0].text.to_lowercase().contains("rust"),
        "top source should be the Rust document, got: {:?}",
        report.sources[0].text
    );
}

#[tokio::test]
async fn cumulative_visibility_hides_higher_access_level_chunks() {
    let h = harness().await;
    let files = TempDir::new().unwrap();
    let secret_doc = write_fixture(
        &files,
        "secret.md",
        "# Classified Briefing\n\nThe launch codes rotate every quarter under classified protocol.",
    );

    h.ingestor.process_document("doc-secret", &secret_doc, 50, Some("Classified Briefing".into())).await.unwrap();

    let low_level = h.retriever.hybrid_search("launch codes classified protocol", 10, None, None, None, None, None).await.unwrap();
    assert!(low_level.sources.is_empty(), "caller with access_level 10 must not see an access_level 50 chunk");

    let high_level = h.retriever.hybrid_search("launch codes classified protocol", 50, None, None, None, None, None).await.unwrap();
    assert!(high_level.success, "caller with access_level 50 should see the access_level 50 chunk");
}

#[tokio::test]
async fn unsupported_extension_fails_fatal_and_compensates() {
    let h = harness().await;
    let files = TempDir::new().unwrap();
    let bad_doc = write_fixture(&files, "slides.pptx", "irrelevant bytes");

    let err = h.ingestor.process_document("doc-bad", &bad_doc, 10, None).await.unwrap_err();
    assert!(!err.is_retryable(), "unsupported extension should be a terminal Fatal error");

    let pool = db::connect(&{
        let mut cfg: Config = toml::from_str("").unwrap();
        cfg.db.path = h._tmp.path().join("hr.sqlite");
        cfg
    })
    .await
    .unwrap();
    let document = db::get_document(&pool, "doc-bad").await.unwrap().expect("document row should exist");
    assert_eq!(document.status, DocumentStatus::Error);
    assert_eq!(document.chunk_count, 0);
}

#[tokio::test]
async fn search_result_is_served_from_cache_on_repeat_query() {
    let h = harness().await;
    let files = TempDir::new().unwrap();
    let doc = write_fixture(&files, "doc.md", "# Notes\n\nA short note about caching behavior.");
    h.ingestor.process_document("doc-1", &doc, 10, Some("Notes".into())).await.unwrap();

    let first = h.retriever.hybrid_search("caching behavior", 10, None, None, None, None, None).await.unwrap();
    assert!(!first.from_cache);

    let second = h.retriever.hybrid_search("caching behavior", 10, None, None, None, None, None).await.unwrap();
    assert!(second.from_cache, "identical query/access_level/params should be served from the result cache");
}

#[tokio::test]
async fn empty_corpus_returns_unsuccessful_report() {
    let h = harness().await;
    let report = h.retriever.hybrid_search("anything at all", 10, None, None, None, None, None).await.unwrap();
    assert!(!report.success);
    assert!(report.sources.is_empty());
    assert_eq!(report.total_found, 0);
}
