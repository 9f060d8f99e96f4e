//! Ingestion pipeline orchestration (C11).
//!
//! Single entry point `process_document`, driving: parse → analyze →
//! locate tables → chunk → extract keywords → embed (batched) → persist
//! (vector store + durable sink) → invalidate caches. On any `Fatal`
//! failure the document status moves to `ERROR` and any chunks already
//! written are compensated with `delete_all_chunks`, per spec §4.11/§7.
//!
//! Grounded on
//! `original_source/worker/services/chunking_service.py`'s
//! `process_document` orchestration and `worker/tasks.py`'s retry wrapper
//! (3 attempts, 60s base, per spec §5).

use std::sync::Arc;
use std::time::Instant;

use sqlx::SqlitePool;

use crate::analyzer;
use crate::bm25::Bm25Manager;
use crate::cache::CacheStore;
use crate::chunker::{self, LocatedTable};
use crate::config::{validate_access_level, ChunkingConfig};
use crate::db;
use crate::embedding::EmbeddingClient;
use crate::error::{EngineError, Result};
use crate::keywords::{self, SemanticKeywordExtractor};
use crate::models::{DocumentStatus, IngestReport, StageTiming};
use crate::parsers;
use crate::table;
use crate::vector_store::{VectorRecord, VectorStore};

const MAX_INGEST_ATTEMPTS: u32 = 3;
const INGEST_RETRY_BASE_SECS: u64 = 60;

pub struct Ingestor {
    pool: SqlitePool,
    vector_store: Arc<dyn VectorStore>,
    cache: Arc<dyn CacheStore>,
    bm25: Arc<Bm25Manager>,
    embedding: Arc<dyn EmbeddingClient>,
    semantic_keywords: Option<Arc<dyn SemanticKeywordExtractor>>,
    chunking: ChunkingConfig,
    collection: String,
}

impl Ingestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        vector_store: Arc<dyn VectorStore>,
        cache: Arc<dyn CacheStore>,
        bm25: Arc<Bm25Manager>,
        embedding: Arc<dyn EmbeddingClient>,
        semantic_keywords: Option<Arc<dyn SemanticKeywordExtractor>>,
        chunking: ChunkingConfig,
        collection: impl Into<String>,
    ) -> Self {
        Self { pool, vector_store, cache, bm25, embedding, semantic_keywords, chunking, collection: collection.into() }
    }

    /// Process one document end to end. Callers that want the spec's
    /// retry-with-backoff behavior should call
    /// [`Ingestor::process_document_with_retry`] instead; this is the
    /// single straight-line attempt it wraps.
    pub async fn process_document(
        &self,
        document_id: &str,
        file_path: &str,
        access_level: i32,
        title: Option<String>,
    ) -> Result<IngestReport> {
        validate_access_level(access_level)?;
        let mut timings = Vec::new();

        db::upsert_document(
            &self.pool,
            document_id,
            title.as_deref().unwrap_or(""),
            access_level,
            "general",
            DocumentStatus::Processing,
            0,
        )
        .await
        .map_err(|e| EngineError::Fatal(format!("failed to record document as processing: {e}")))?;

        let result = self.run_pipeline(document_id, file_path, access_level, title, &mut timings).await;

        match &result {
            Ok(report) => {
                db::upsert_document(
                    &self.pool,
                    document_id,
                    report.document_type.to_string().as_str(),
                    access_level,
                    &report.document_type.to_string(),
                    DocumentStatus::Completed,
                    report.chunk_count as i64,
                )
                .await
                .ok();
                self.invalidate_caches().await;
            }
            Err(e) => {
                tracing::warn!(document_id, error = %e, "ingest failed, compensating");
                let _ = db::delete_all_chunks(&self.pool, document_id).await;
                let _ = self.vector_store.delete_all_chunks(&self.collection, document_id).await;
                let _ = db::set_document_status(&self.pool, document_id, DocumentStatus::Error).await;
            }
        }

        result
    }

    /// Spec §5: ingest tasks retry up to 3 times with a 60s exponential
    /// base, but only for retryable error kinds.
    pub async fn process_document_with_retry(
        &self,
        document_id: &str,
        file_path: &str,
        access_level: i32,
        title: Option<String>,
    ) -> Result<IngestReport> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.process_document(document_id, file_path, access_level, title.clone()).await {
                Ok(report) => return Ok(report),
                Err(e) if e.is_retryable() && attempt < MAX_INGEST_ATTEMPTS => {
                    let delay = INGEST_RETRY_BASE_SECS * (1u64 << (attempt - 1));
                    tracing::warn!(document_id, attempt, delay, error = %e, "retrying ingest");
                    tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_pipeline(
        &self,
        document_id: &str,
        file_path: &str,
        access_level: i32,
        title: Option<String>,
        timings: &mut Vec<StageTiming>,
    ) -> Result<IngestReport> {
        let stage_started = Instant::now();
        let extension = parsers::extension_of(file_path)
            .ok_or_else(|| EngineError::Fatal(format!("file has no extension: {file_path}")))?;
        let parser = parsers::parser_for_extension(&extension)?;
        let bytes = std::fs::read(file_path)
            .map_err(|e| EngineError::Fatal(format!("failed to read {file_path}: {e}")))?;
        let parsed = parser.parse(&bytes)?;
        if parsed.text.trim().is_empty() {
            return Err(EngineError::Fatal("parser returned zero bytes of text".into()));
        }
        timings.push(StageTiming { stage: "parse".into(), millis: stage_started.elapsed().as_millis() });

        let stage_started = Instant::now();
        let (mut document_metadata, sections) = analyzer::analyze_document(&parsed.text);
        if let Some(title) = title {
            document_metadata.title = Some(title);
        }
        timings.push(StageTiming { stage: "analyze".into(), millis: stage_started.elapsed().as_millis() });

        let stage_started = Instant::now();
        let located_tables: Vec<LocatedTable> = parsed
            .tables
            .into_iter()
            .map(|mut t| {
                table::locate_table_context(&parsed.text, &mut t);
                let title = table::find_table_title(&t.context_before);
                LocatedTable { table: t, title }
            })
            .collect();
        let mut chunks = chunker::chunk_document(
            &parsed.text,
            document_id,
            access_level,
            &sections,
            &located_tables,
            &document_metadata,
            &self.chunking,
        );
        timings.push(StageTiming { stage: "chunk".into(), millis: stage_started.elapsed().as_millis() });

        let stage_started = Instant::now();
        let mut chunk_keyword_sets = Vec::with_capacity(chunks.len());
        for chunk in &mut chunks {
            let keywords = keywords::extract_chunk_keywords(self.semantic_keywords.as_deref(), &chunk.text).await;
            chunk.metadata.set("semantic_keywords", keywords.semantic.clone());
            chunk.metadata.set("technical_keywords", keywords.technical.clone());
            chunk.metadata.set("all_keywords", keywords.all.clone());
            chunk_keyword_sets.push(keywords);
        }
        let document_summary = keywords::summarize_document_keywords(&chunk_keyword_sets);
        timings.push(StageTiming { stage: "keywords".into(), millis: stage_started.elapsed().as_millis() });

        let stage_started = Instant::now();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embedded = self.embedding.embed_documents(&texts).await?;
        if embedded.vectors.len() != chunks.len() {
            return Err(EngineError::Fatal("embedding count does not match chunk count".into()));
        }
        timings.push(StageTiming { stage: "embed".into(), millis: stage_started.elapsed().as_millis() });

        let stage_started = Instant::now();
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(embedded.vectors.iter())
            .map(|(chunk, vector)| VectorRecord {
                id: chunk.id(),
                embedding: vector.clone(),
                document: chunk.text.clone(),
                metadata: serde_json::to_value(&chunk.metadata).unwrap_or(serde_json::Value::Null),
            })
            .collect();
        self.vector_store.upsert(&self.collection, &records).await?;
        db::replace_chunks(&self.pool, document_id, &chunks)
            .await
            .map_err(|e| EngineError::Fatal(format!("failed to persist chunks: {e}")))?;
        timings.push(StageTiming { stage: "persist".into(), millis: stage_started.elapsed().as_millis() });

        Ok(IngestReport {
            document_id: document_id.to_string(),
            document_type: document_metadata.document_type,
            chunk_count: chunks.len(),
            semantic_keywords: document_summary.semantic,
            technical_keywords: document_summary.technical,
            stage_timings: timings.clone(),
        })
    }

    /// Spec §5: every write path invalidates the result cache and the
    /// BM25 cache together, then resets the in-process singleton so the
    /// next query rebuilds it.
    async fn invalidate_caches(&self) {
        self.cache.invalidate_search().await;
        self.cache.invalidate_bm25(None).await;
        self.bm25.invalidate(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_base_and_attempts_match_spec() {
        assert_eq!(MAX_INGEST_ATTEMPTS, 3);
        assert_eq!(INGEST_RETRY_BASE_SECS, 60);
    }
}
