//! Cross-encoder reranker client (C4).
//!
//! Consumes `(query, [document])` pairs and returns raw logits, then
//! applies the amplification pipeline from spec §4.4: exponential
//! amplification by a factor of 100, rescale into `[0, 10]`, sort
//! descending, truncate to `top_k`.
//!
//! Grounded on `original_source/worker/services/reranking_service.py`.
//! Per spec §9's design note, `exp(100 * r)` is computed as
//! `exp(100 * (r - max(r)))` so the rescale is numerically equivalent but
//! never overflows; `±inf`/degenerate ranges collapse to a uniform `5.0`.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::RerankerConfig;
use crate::error::{EngineError, Result};

const AMPLIFICATION_FACTOR: f32 = 100.0;

#[derive(Debug, Clone)]
pub struct RerankedItem {
    pub index: usize,
    pub score: f32,
    pub raw_logit: f32,
}

#[async_trait]
pub trait RerankerClient: Send + Sync {
    fn model_name(&self) -> &str;

    /// Return raw cross-encoder logits, one per `(query, documents[i])`
    /// pair, in input order.
    async fn raw_logits(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}

/// Apply the amplify/rescale/sort/truncate pipeline to raw logits.
pub fn postprocess(raw_logits: &[f32], top_k: usize) -> Vec<RerankedItem> {
    if raw_logits.is_empty() {
        return Vec::new();
    }

    let max_logit = raw_logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let amplified: Vec<f32> = raw_logits
        .iter()
        .map(|&r| {
            let shifted = (r - max_logit) * AMPLIFICATION_FACTOR;
            if shifted.is_finite() {
                shifted.exp()
            } else if shifted == f32::NEG_INFINITY {
                0.0
            } else {
                f32::MAX
            }
        })
        .collect();

    let a_min = amplified.iter().cloned().fold(f32::INFINITY, f32::min);
    let a_max = amplified.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

    let mut items: Vec<RerankedItem> = raw_logits
        .iter()
        .enumerate()
        .map(|(index, &raw_logit)| {
            let score = if (a_max - a_min).abs() < f32::EPSILON || !a_max.is_finite() {
                5.0
            } else {
                10.0 * (amplified[index] - a_min) / (a_max - a_min)
            };
            RerankedItem { index, score, raw_logit }
        })
        .collect();

    items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    items.truncate(top_k);
    items
}

/// HTTP client for the external cross-encoder inference server
/// (`LOCAL_RERANKER_URL`). Expects `POST /rerank` accepting
/// `{"query": ..., "documents": [...]}` and returning
/// `{"logits": [f32; n]}`.
pub struct HttpRerankerClient {
    http: reqwest::Client,
    config: RerankerConfig,
}

impl HttpRerankerClient {
    pub fn new(config: RerankerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Fatal(format!("failed to build http client: {e}")))?;
        Ok(Self { http, config })
    }
}

#[derive(serde::Deserialize)]
struct RerankResponse {
    logits: Vec<f32>,
}

#[async_trait]
impl RerankerClient for HttpRerankerClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn raw_logits(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .http
            .post(format!("{}/rerank", self.config.url))
            .json(&serde_json::json!({
                "model": self.config.model,
                "query": query,
                "documents": documents,
            }))
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("reranker request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::Transient(format!(
                "reranker server returned {}",
                response.status()
            )));
        }

        let body: RerankResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("invalid rerank response: {e}")))?;
        Ok(body.logits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_descending_and_truncates() {
        let logits = vec![0.1, 0.9, 0.5, 0.3];
        let items = postprocess(&logits, 2);
        assert_eq!(items.len(), 2);
        assert!(items[0].score >= items[1].score);
        assert_eq!(items[0].index, 1);
    }

    #[test]
    fn degenerate_equal_logits_map_to_five() {
        let logits = vec![0.42, 0.42, 0.42];
        let items = postprocess(&logits, 3);
        for item in items {
            assert!((item.score - 5.0).abs() < 1e-6);
        }
    }

    #[test]
    fn empty_logits_returns_empty() {
        assert!(postprocess(&[], 10).is_empty());
    }

    #[test]
    fn large_positive_logits_do_not_overflow() {
        let logits = vec![50.0, 49.0, 48.5];
        let items = postprocess(&logits, 3);
        assert!(items.iter().all(|i| i.score.is_finite()));
        assert_eq!(items[0].index, 0);
    }

    #[test]
    fn best_item_gets_max_score() {
        let logits = vec![-2.0, 3.0, 0.5];
        let items = postprocess(&logits, 3);
        assert_eq!(items[0].index, 1);
        assert!((items[0].score - 10.0).abs() < 1e-3);
    }
}
