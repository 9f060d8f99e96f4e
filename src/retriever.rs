//! Hybrid retriever (C13).
//!
//! Orchestrates the full query-time pipeline: result-cache lookup, BM25
//! warm-up, the vector and lexical legs, Reciprocal Rank Fusion, cross-
//! encoder reranking, adaptive relevance thresholding, and context
//! assembly. Grounded on
//! `original_source/worker/services/search_service.py`'s `hybrid_search`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use sqlx::SqlitePool;

use crate::bm25::{Bm25Document, Bm25Index, Bm25Manager};
use crate::cache::CacheStore;
use crate::config::RetrievalConfig;
use crate::config::validate_access_level;
use crate::db;
use crate::embedding::EmbeddingClient;
use crate::error::{EngineError, Result};
use crate::models::{ChunkMetadata, RetrievalReport, RetrievedSource, SearchResult};
use crate::reranker::{self, RerankerClient};
use crate::synonyms::SynonymExpander;
use crate::tokenizer;
use crate::vector_store::VectorStore;

const RRF_K: f32 = 60.0;

pub struct Retriever {
    embedding: Arc<dyn EmbeddingClient>,
    vector_store: Arc<dyn VectorStore>,
    cache: Arc<dyn CacheStore>,
    bm25: Arc<Bm25Manager>,
    synonyms: Arc<SynonymExpander>,
    reranker: Arc<dyn RerankerClient>,
    pool: SqlitePool,
    config: RetrievalConfig,
    collection: String,
}

impl Retriever {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        embedding: Arc<dyn EmbeddingClient>,
        vector_store: Arc<dyn VectorStore>,
        cache: Arc<dyn CacheStore>,
        bm25: Arc<Bm25Manager>,
        synonyms: Arc<SynonymExpander>,
        reranker: Arc<dyn RerankerClient>,
        pool: SqlitePool,
        config: RetrievalConfig,
        collection: impl Into<String>,
    ) -> Self {
        Self { embedding, vector_store, cache, bm25, synonyms, reranker, pool, config, collection: collection.into() }
    }

    async fn warm_bm25(&self, access_level: i32) -> Arc<Bm25Index> {
        let cache = self.cache.clone();
        let pool = self.pool.clone();
        self.bm25
            .get_or_build(access_level, || async move {
                if let Some(bytes) = cache.get_bm25(access_level).await {
                    if let Ok(index) = serde_json::from_slice::<Bm25Index>(&bytes) {
                        return index;
                    }
                    tracing::warn!(access_level, "bm25 cache payload corrupt, rebuilding");
                }
                let corpus: Vec<Bm25Document> =
                    db::bm25_corpus(&pool, access_level).await.unwrap_or_default();
                let index = Bm25Index::build(access_level, corpus);
                if let Ok(bytes) = serde_json::to_vec(&index) {
                    cache.put_bm25(access_level, &bytes).await;
                }
                index
            })
            .await
    }

    /// Run one hybrid search. `None` parameters fall back to the
    /// configured defaults, per spec §4.13's `hybrid_search` signature.
    #[allow(clippy::too_many_arguments)]
    pub async fn hybrid_search(
        &self,
        query: &str,
        access_level: i32,
        top_k: Option<usize>,
        rerank_top_k: Option<usize>,
        vector_weight: Option<f32>,
        bm25_weight: Option<f32>,
        chat_context: Option<String>,
    ) -> Result<RetrievalReport> {
        validate_access_level(access_level)?;

        let top_k = top_k.unwrap_or(self.config.top_k);
        let rerank_top_k = rerank_top_k.unwrap_or(self.config.rerank_top_k);
        let vector_weight = vector_weight.unwrap_or(self.config.vector_weight);
        let bm25_weight = bm25_weight.unwrap_or(self.config.bm25_weight);

        let params = serde_json::json!({
            "top_k": top_k,
            "rerank_top_k": rerank_top_k,
            "vector_weight": vector_weight,
            "bm25_weight": bm25_weight,
        });
        let cache_key = crate::cache::search_cache_key(query, access_level, &params);

        if let Some(cached) = self.cache.get_result(&cache_key).await {
            if let Ok(report) = serde_json::from_value::<RetrievalReport>(cached) {
                return Ok(report);
            }
        }

        let started = Instant::now();
        let bm25_index = self.warm_bm25(access_level).await;

        let vector_leg = self.vector_leg(query, access_level, top_k).await?;
        let lexical_leg = self.lexical_leg(query, &bm25_index, access_level, top_k).await;

        let fused = self.fuse(vector_leg, lexical_leg, vector_weight, bm25_weight).await;
        let total_found = fused.len();

        if fused.is_empty() {
            let report = self.empty_report(started.elapsed().as_millis());
            self.cache.put_result(&cache_key, &serde_json::to_value(&report).unwrap()).await;
            return Ok(report);
        }

        let reranked = if rerank_top_k > 0 {
            self.rerank(query, fused, rerank_top_k).await?
        } else {
            fused
        };
        let reranked_count = reranked.len();

        let (sources, best_relevance_score, relevance_filtered) = self.adaptive_filter(reranked);
        let context = assemble_context(&sources);

        let report = RetrievalReport {
            success: !sources.is_empty(),
            context,
            filtered_count: sources.len(),
            sources,
            total_found,
            reranked_count,
            best_relevance_score,
            relevance_filtered,
            search_time_ms: started.elapsed().as_millis(),
            embedding_model: self.embedding.model_name().to_string(),
            reranking_model: self.reranker.model_name().to_string(),
            from_cache: false,
            chat_context,
        };

        self.cache.put_result(&cache_key, &serde_json::to_value(&report).unwrap()).await;
        Ok(report)
    }

    pub async fn batch_hybrid_search(
        &self,
        queries: &[String],
        access_level: i32,
    ) -> (Vec<Result<RetrievalReport>>, usize) {
        let mut reports = Vec::with_capacity(queries.len());
        let mut cache_hits = 0;
        for query in queries {
            let report = self
                .hybrid_search(query, access_level, None, None, None, None, None)
                .await;
            if let Ok(r) = &report {
                if r.from_cache {
                    cache_hits += 1;
                }
            }
            reports.push(report);
        }
        (reports, cache_hits)
    }

    async fn vector_leg(&self, query: &str, access_level: i32, top_k: usize) -> Result<Vec<SearchResult>> {
        let embedded = self.embedding.embed_query(query).await?;
        let Some(vector) = embedded.vectors.into_iter().next() else {
            return Ok(Vec::new());
        };
        let matches = self.vector_store.query(&self.collection, &vector, access_level, top_k).await?;
        Ok(matches
            .into_iter()
            .enumerate()
            .map(|(rank, m)| SearchResult {
                id: m.id,
                content: m.document,
                metadata: metadata_from_json(&m.metadata),
                vector_similarity: Some(m.similarity),
                bm25_score: None,
                rrf_score: None,
                rerank_score: None,
                raw_logit: None,
                final_rank: Some(rank),
            })
            .collect())
    }

    async fn lexical_leg(
        &self,
        query: &str,
        index: &Bm25Index,
        access_level: i32,
        top_k: usize,
    ) -> Vec<(String, f32, usize)> {
        if index.is_empty() {
            return Vec::new();
        }
        let expanded = self.synonyms.expand_smart(query);
        let tokens = tokenizer::tokenize(&expanded);
        let _ = access_level; // index is already scoped to access_level by construction
        index
            .top_n(&tokens, top_k)
            .into_iter()
            .enumerate()
            .map(|(rank, (id, score))| (id, score, rank))
            .collect()
    }

    async fn fuse(
        &self,
        vector_leg: Vec<SearchResult>,
        lexical_leg: Vec<(String, f32, usize)>,
        vector_weight: f32,
        bm25_weight: f32,
    ) -> Vec<SearchResult> {
        let mut rrf_scores: HashMap<String, f32> = HashMap::new();
        let mut records: HashMap<String, SearchResult> = HashMap::new();

        for result in vector_leg {
            let rank = result.final_rank.unwrap_or(0);
            let contribution = vector_weight / (RRF_K + rank as f32 + 1.0);
            *rrf_scores.entry(result.id.clone()).or_insert(0.0) += contribution;
            records.insert(result.id.clone(), result);
        }

        let missing_ids: Vec<String> =
            lexical_leg.iter().map(|(id, _, _)| id.clone()).filter(|id| !records.contains_key(id)).collect();
        let fetched = if missing_ids.is_empty() {
            Vec::new()
        } else {
            db::get_chunks_by_ids(&self.pool, &missing_ids).await.unwrap_or_default()
        };
        for stored in fetched {
            let chunk = stored.chunk;
            records.entry(chunk.id()).or_insert(SearchResult {
                id: chunk.id(),
                content: chunk.text,
                metadata: chunk.metadata,
                vector_similarity: None,
                bm25_score: None,
                rrf_score: None,
                rerank_score: None,
                raw_logit: None,
                final_rank: None,
            });
        }

        for (id, score, rank) in lexical_leg {
            let contribution = bm25_weight / (RRF_K + rank as f32 + 1.0);
            *rrf_scores.entry(id.clone()).or_insert(0.0) += contribution;
            if let Some(record) = records.get_mut(&id) {
                record.bm25_score = Some(score);
            }
        }

        let mut fused: Vec<SearchResult> = records
            .into_iter()
            .map(|(id, mut record)| {
                record.rrf_score = rrf_scores.get(&id).copied();
                record
            })
            .collect();
        fused.sort_by(|a, b| {
            b.rrf_score.unwrap_or(0.0).partial_cmp(&a.rrf_score.unwrap_or(0.0)).unwrap_or(std::cmp::Ordering::Equal)
        });
        fused
    }

    async fn rerank(&self, query: &str, fused: Vec<SearchResult>, rerank_top_k: usize) -> Result<Vec<SearchResult>> {
        let contents: Vec<String> = fused.iter().map(|r| r.content.clone()).collect();
        let logits = self.reranker.raw_logits(query, &contents).await?;
        let items = reranker::postprocess(&logits, rerank_top_k);
        Ok(items
            .into_iter()
            .map(|item| {
                let mut record = fused[item.index].clone();
                record.rerank_score = Some(item.score);
                record.raw_logit = Some(item.raw_logit);
                record
            })
            .collect())
    }

    /// Spec §4.13 step 7: range-dependent high/general thresholds,
    /// off-corpus rejection, then a single high-threshold filter.
    fn adaptive_filter(&self, reranked: Vec<SearchResult>) -> (Vec<RetrievedSource>, Option<f32>, bool) {
        let scores: Vec<f32> = reranked.iter().filter_map(|r| r.rerank_score).collect();
        if scores.is_empty() {
            let sources = reranked.into_iter().map(to_source).collect();
            return (sources, None, false);
        }

        let best = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let worst = scores.iter().cloned().fold(f32::INFINITY, f32::min);
        let range = best - worst;

        let (high_threshold, general_threshold) = if range > 2.0 {
            (best * 0.8, best * 0.4)
        } else if range > 1.0 {
            (best * 0.7, best * 0.3)
        } else {
            (best - 0.1, best * 0.5)
        };

        if best < general_threshold {
            return (Vec::new(), Some(best), true);
        }

        let kept: Vec<RetrievedSource> = reranked
            .into_iter()
            .filter(|r| r.rerank_score.unwrap_or(f32::NEG_INFINITY) >= high_threshold)
            .map(to_source)
            .collect();

        let filtered = kept.is_empty();
        (kept, Some(best), filtered)
    }

    fn empty_report(&self, elapsed_ms: u128) -> RetrievalReport {
        RetrievalReport {
            success: false,
            context: String::new(),
            sources: Vec::new(),
            total_found: 0,
            reranked_count: 0,
            filtered_count: 0,
            best_relevance_score: None,
            relevance_filtered: false,
            search_time_ms: elapsed_ms,
            embedding_model: self.embedding.model_name().to_string(),
            reranking_model: self.reranker.model_name().to_string(),
            from_cache: false,
            chat_context: None,
        }
    }
}

fn to_source(result: SearchResult) -> RetrievedSource {
    let document_title = result.metadata.get_str("document_title").unwrap_or("").to_string();
    let chunk_index = result.metadata.get_i64("chunk_index").unwrap_or(0);
    let access_level = result.metadata.access_level().unwrap_or(0);
    RetrievedSource {
        chunk_id: result.id,
        document_title,
        chunk_index,
        access_level,
        similarity_score: result.vector_similarity,
        rerank_score: result.rerank_score,
        text: result.content,
    }
}

fn assemble_context(sources: &[RetrievedSource]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let title = if s.document_title.is_empty() { "документ" } else { s.document_title.as_str() };
            format!("[Источник {}: {title}]\n{}\n", i + 1, s.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn metadata_from_json(value: &serde_json::Value) -> ChunkMetadata {
    serde_json::from_value(value.clone()).unwrap_or_else(|_| ChunkMetadata::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, score: Option<f32>) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            content: format!("content {id}"),
            metadata: ChunkMetadata::new(),
            vector_similarity: None,
            bm25_score: None,
            rrf_score: None,
            rerank_score: score,
            raw_logit: None,
            final_rank: None,
        }
    }

    #[test]
    fn context_assembly_numbers_sources() {
        let sources = vec![
            RetrievedSource {
                chunk_id: "a_0".into(),
                document_title: "Приказ".into(),
                chunk_index: 0,
                access_level: 10,
                similarity_score: None,
                rerank_score: Some(9.0),
                text: "текст".into(),
            },
        ];
        let context = assemble_context(&sources);
        assert!(context.starts_with("[Источник 1: Приказ]"));
    }

    #[test]
    fn low_range_threshold_uses_best_minus_tenth() {
        let reranked = vec![result("a", Some(5.0)), result("b", Some(4.95))];
        let scores: Vec<f32> = reranked.iter().filter_map(|r| r.rerank_score).collect();
        let best = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let worst = scores.iter().cloned().fold(f32::INFINITY, f32::min);
        assert!(best - worst <= 1.0);
    }
}
