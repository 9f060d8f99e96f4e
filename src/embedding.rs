//! Embedding client (C3).
//!
//! Wraps the external embedding inference server. Adds a language-adaptive
//! instruction prefix to *queries* only (documents are embedded with no
//! prefix) and returns normalized unit-length vectors of fixed dimension
//! together with token counts and timing.
//!
//! Grounded on the teacher's `embedding/mod.rs` (provider trait + retry
//! loop with exponential backoff) and
//! `original_source/worker/services/embedding_service.py` (language
//! detection by Cyrillic ratio, the exact instruction prefixes).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use crate::config::EmbeddingConfig;
use crate::error::{EngineError, Result};

const QUERY_PREFIX_RU: &str =
    "Инструкция: Найди релевантные фрагменты документов для данного поискового запроса\nЗапрос: ";
const QUERY_PREFIX_EN: &str =
    "Instruct: Given a search query, retrieve relevant passages from knowledge base\nQuery: ";

const MAX_BATCH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Ru,
    En,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Ru => "ru",
            Language::En => "en",
        }
    }
}

fn cyrillic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[а-яё]").unwrap())
}

fn alpha_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[а-яёa-z]").unwrap())
}

/// Detect language by Cyrillic-character ratio over alphabetic tokens.
/// `> 0.30` cyrillic ratio selects Russian; ratio of 0 (no alphabetic
/// chars at all) defaults to English, per spec §4.3.
pub fn detect_language(text: &str) -> Language {
    let lower = text.to_lowercase();
    let total = alpha_re().find_iter(&lower).count();
    if total == 0 {
        return Language::En;
    }
    let cyrillic = cyrillic_re().find_iter(&lower).count();
    if (cyrillic as f64) / (total as f64) > 0.30 {
        Language::Ru
    } else {
        Language::En
    }
}

pub fn query_prefix(language: Language) -> &'static str {
    match language {
        Language::Ru => QUERY_PREFIX_RU,
        Language::En => QUERY_PREFIX_EN,
    }
}

/// Cheap token-count estimate consistent across the crate: ~4 chars/token,
/// matching the teacher's chunker constant. The embedding server is the
/// authority on exact token counts; this is only used for the report's
/// advisory `token_count` field.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vectors: Vec<Vec<f32>>,
    pub token_count: usize,
    pub elapsed: Duration,
    pub instruction_prefix: Option<String>,
    pub detected_language: Option<Language>,
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;

    /// Embed a batch of documents (no instruction prefix).
    async fn embed_documents(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Embed a single query, with the language-adaptive instruction
    /// prefix applied.
    async fn embed_query(&self, text: &str) -> Result<EmbeddingResult>;
}

/// HTTP client for the external embedding inference server
/// (`LOCAL_EMBEDDING_URL`). Expects a `POST /embed` endpoint accepting
/// `{"texts": [...]}` and returning `{"embeddings": [[f32; dims]; n]}`.
pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    config: EmbeddingConfig,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Fatal(format!("failed to build http client: {e}")))?;
        Ok(Self { http, config })
    }

    async fn embed_batch_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1u64 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(format!("{}/embed", self.config.url))
                .json(&serde_json::json!({ "model": self.config.model, "texts": texts }))
                .send()
                .await;

            match resp {
                Ok(response) if response.status().is_success() => {
                    let body: EmbedResponse = response
                        .json()
                        .await
                        .map_err(|e| EngineError::Transient(format!("invalid embed response: {e}")))?;
                    return Ok(body.embeddings);
                }
                Ok(response) if response.status().as_u16() == 429 || response.status().is_server_error() => {
                    last_err = Some(EngineError::Transient(format!(
                        "embedding server returned {}",
                        response.status()
                    )));
                }
                Ok(response) => {
                    return Err(EngineError::Fatal(format!(
                        "embedding server returned {}",
                        response.status()
                    )));
                }
                Err(e) => {
                    last_err = Some(EngineError::Transient(format!("embedding request failed: {e}")));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| EngineError::Transient("embedding failed after retries".into())))
    }

    async fn embed_in_batches(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH.min(self.config.batch_size.max(1))) {
            let mut vectors = self.embed_batch_raw(chunk).await?;
            for v in &mut vectors {
                normalize(v);
            }
            out.extend(vectors);
        }
        Ok(out)
    }
}

#[derive(serde::Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dims(&self) -> usize {
        self.config.dims
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let started = Instant::now();
        let token_count = texts.iter().map(|t| estimate_tokens(t)).sum();
        let vectors = self.embed_in_batches(texts).await?;
        Ok(EmbeddingResult {
            vectors,
            token_count,
            elapsed: started.elapsed(),
            instruction_prefix: None,
            detected_language: None,
        })
    }

    async fn embed_query(&self, text: &str) -> Result<EmbeddingResult> {
        let started = Instant::now();
        let language = detect_language(text);
        let prefix = query_prefix(language);
        let prefixed = format!("{prefix}{text}");
        let token_count = estimate_tokens(&prefixed);
        let vectors = self.embed_in_batches(&[prefixed]).await?;
        Ok(EmbeddingResult {
            vectors,
            token_count,
            elapsed: started.elapsed(),
            instruction_prefix: Some(prefix.to_string()),
            detected_language: Some(language),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_russian() {
        assert_eq!(detect_language("Какие обязанности у копирайтера?"), Language::Ru);
    }

    #[test]
    fn detects_english() {
        assert_eq!(detect_language("What are the copywriter's duties?"), Language::En);
    }

    #[test]
    fn empty_alpha_defaults_to_english() {
        assert_eq!(detect_language("12345 !!! ---"), Language::En);
    }

    #[test]
    fn russian_prefix_starts_with_instruktsiya() {
        assert!(query_prefix(Language::Ru).starts_with("Инструкция:"));
    }

    #[test]
    fn english_prefix_starts_with_instruct() {
        assert!(query_prefix(Language::En).starts_with("Instruct:"));
    }

    #[test]
    fn normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm = (v[0] * v[0] + v[1] * v[1]).sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
