//! Keyword extractor (C7).
//!
//! Two independent legs: a model-assisted semantic extractor (an
//! external keyphrase-extraction service) that degrades to an empty
//! result on timeout/unavailability rather than failing ingest, and a
//! regex-based technical-term catalogue that always runs. Per-document
//! aggregation keeps the top 15 semantic, top 15 technical, and top 20
//! combined terms by cross-chunk frequency.
//!
//! Grounded on `original_source/worker/services/keyword_service.py`.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::config::EmbeddingConfig;
use crate::error::EngineError;

const MIN_TEXT_LEN: usize = 50;
const MAX_SEMANTIC_PER_CHUNK: usize = 10;
const MAX_TECHNICAL_PER_CHUNK: usize = 10;
const MAX_COMBINED_PER_CHUNK: usize = 20;
const MAX_SEMANTIC_PER_DOC: usize = 15;
const MAX_TECHNICAL_PER_DOC: usize = 15;
const MAX_COMBINED_PER_DOC: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct ChunkKeywords {
    pub semantic: Vec<String>,
    pub technical: Vec<String>,
    pub all: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentKeywordSummary {
    pub semantic: Vec<String>,
    pub technical: Vec<String>,
    pub all: Vec<String>,
}

/// Abstraction over the semantic keyphrase extractor so ingest can be
/// tested without standing up the real service, and so the model can
/// be swapped without touching the aggregation logic.
#[async_trait]
pub trait SemanticKeywordExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Vec<String>, EngineError>;
}

/// HTTP client for an external multilingual keyphrase extraction
/// service. A timeout or non-2xx response degrades to
/// `EngineError::ModelUnavailable`, which the caller treats as "no
/// semantic keywords this run" rather than aborting ingest.
pub struct HttpSemanticKeywordExtractor {
    http: reqwest::Client,
    url: String,
}

impl HttpSemanticKeywordExtractor {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Fatal(format!("failed to build http client: {e}")))?;
        Ok(Self { http, url: format!("{}/keywords", config.url) })
    }
}

#[derive(serde::Deserialize)]
struct KeywordResponse {
    keywords: Vec<String>,
}

#[async_trait]
impl SemanticKeywordExtractor for HttpSemanticKeywordExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<String>, EngineError> {
        let truncated: String = text.chars().take(2000).collect();
        let response = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({
                "text": truncated,
                "ngram_range": [1, 2],
                "use_mmr": true,
                "diversity": 0.5,
                "nr_candidates": 20,
                "top_n": MAX_SEMANTIC_PER_CHUNK,
            }))
            .send()
            .await
            .map_err(|e| EngineError::ModelUnavailable(format!("keyword service unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::ModelUnavailable(format!(
                "keyword service returned {}",
                response.status()
            )));
        }
        let body: KeywordResponse = response
            .json()
            .await
            .map_err(|e| EngineError::ModelUnavailable(format!("invalid keyword response: {e}")))?;
        Ok(filter_semantic(body.keywords))
    }
}

fn semantic_stop_words() -> &'static std::collections::HashSet<&'static str> {
    static WORDS: OnceLock<std::collections::HashSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| {
        [
            "это", "для", "или", "как", "что", "так", "все", "еще", "уже", "его", "ее", "их",
            "они", "она", "оно", "мы", "вы", "ты", "я", "он", "при", "под", "над", "дата",
            "года", "год", "лет", "день", "время", "место", "номер", "пункт",
        ]
        .into_iter()
        .collect()
    })
}

fn leading_digit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d").unwrap())
}

fn filter_semantic(raw: Vec<String>) -> Vec<String> {
    raw.into_iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| {
            k.chars().count() >= 3
                && !semantic_stop_words().contains(k.as_str())
                && !leading_digit_re().is_match(k)
                && !k.contains("___")
                && k.split_whitespace().count() <= 2
        })
        .take(MAX_SEMANTIC_PER_CHUNK)
        .collect()
}

struct TechnicalCategory {
    pattern: &'static str,
}

const TECHNICAL_CATEGORIES: &[TechnicalCategory] = &[
    TechnicalCategory { pattern: r"(?i)\b(?:Python|JavaScript|TypeScript|Java|C\+\+|C#|PHP|Ruby|Go|Rust|Swift|Kotlin|SQL)\b" },
    TechnicalCategory { pattern: r"(?i)\b(?:React|Vue|Angular|Django|Flask|Express|Spring|Laravel|Rails|ASP\.NET|FastAPI|Celery)\b" },
    TechnicalCategory { pattern: r"(?i)\b(?:PostgreSQL|MySQL|MongoDB|Redis|SQLite|Oracle|SQL Server|ChromaDB|Elasticsearch|Prisma)\b" },
    TechnicalCategory { pattern: r"(?i)\b(?:Docker|Kubernetes|AWS|Azure|GCP|API|REST|GraphQL|JWT|OAuth|SSL|TLS|RAG|LLM|AI|ML)\b" },
    TechnicalCategory { pattern: r"(?i)\b\w+\.(?:pdf|docx?|xlsx?|pptx?|csv|json|xml|html|css|js|ts|py|java|cpp|sql|md|txt)\b" },
    TechnicalCategory { pattern: r"(?i)\b(?:HTTP|HTTPS|FTP|SMTP|TCP|UDP|WebSocket|SSE)\b" },
    TechnicalCategory { pattern: r"(?i)\b\d+(?:\.\d+)?\s*(?:MB|GB|TB|KB|ms|sec|min|hour|%|px|em|rem)\b" },
    TechnicalCategory { pattern: r"\bv?\d+\.\d+(?:\.\d+)?(?:-\w+)?\b" },
    TechnicalCategory { pattern: r"(?i)\b(?:embedding|vector|neural|model|algorithm|dataset|transformer|BERT|GPT|LLM|NLP|RAG)\b" },
    TechnicalCategory { pattern: r"(?i)\b(?:SaaS|B2B|B2C|MVP|ROI|KPI|CRM|ERP|UI|UX|API)\b" },
    TechnicalCategory { pattern: r"(?i)\b(?:server|client|backend|frontend|database|cache|queue|worker|service|middleware)\b" },
];

fn category_regexes() -> &'static Vec<Regex> {
    static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
    REGEXES.get_or_init(|| TECHNICAL_CATEGORIES.iter().map(|c| Regex::new(c.pattern).unwrap()).collect())
}

fn function_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w+\(\)").unwrap())
}

fn camel_case_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][a-z]+(?:[A-Z][a-z]+)+\b").unwrap())
}

fn symbols_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[_\-.]+$").unwrap())
}

fn digits_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\d.]+$").unwrap())
}

/// Always-available regex-based technical term extraction.
pub fn extract_technical_terms(text: &str) -> Vec<String> {
    let mut terms: std::collections::HashSet<String> = std::collections::HashSet::new();

    for re in category_regexes() {
        for m in re.find_iter(text) {
            let matched = m.as_str();
            if matched.chars().all(|c| c.is_uppercase() || !c.is_alphabetic()) && matched.chars().count() <= 5 {
                terms.insert(matched.to_uppercase());
            } else {
                terms.insert(matched.to_lowercase());
            }
        }
    }

    const STOP_MATCHES: &[&str] = &["THE", "AND", "FOR", "WITH", "BUT", "NOT"];
    for m in function_call_re().find_iter(text).chain(camel_case_re().find_iter(text)) {
        let matched = m.as_str();
        let underscore_count = matched.matches('_').count();
        if matched.chars().count() > 2
            && !STOP_MATCHES.contains(&matched)
            && !matched.starts_with('_')
            && !matched.ends_with('_')
            && underscore_count <= 1
        {
            terms.insert(matched.to_string());
        }
    }

    let mut filtered: Vec<String> = terms
        .into_iter()
        .filter(|term| {
            let len = term.chars().count();
            len >= 3
                && !symbols_only_re().is_match(term)
                && !digits_only_re().is_match(term)
                && term.matches('_').count() < len / 2
        })
        .collect();
    filtered.sort();
    filtered.truncate(MAX_TECHNICAL_PER_CHUNK);
    filtered
}

/// Extract both legs for one chunk. `semantic` is `None` when the text
/// is too short to bother calling the model, matching the Python
/// service's length guard.
pub async fn extract_chunk_keywords(
    extractor: Option<&dyn SemanticKeywordExtractor>,
    text: &str,
) -> ChunkKeywords {
    if text.trim().chars().count() < MIN_TEXT_LEN {
        return ChunkKeywords::default();
    }

    let semantic = match extractor {
        Some(client) => client.extract(text).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "semantic keyword extraction unavailable, continuing without it");
            Vec::new()
        }),
        None => Vec::new(),
    };
    let technical = extract_technical_terms(text);

    let mut all: Vec<String> = semantic.iter().chain(technical.iter()).cloned().collect();
    all.sort();
    all.dedup();
    all.truncate(MAX_COMBINED_PER_CHUNK);

    ChunkKeywords { semantic, technical, all }
}

/// Aggregate every chunk's keywords into a document-level summary,
/// ranked by cross-chunk frequency.
pub fn summarize_document_keywords(chunks: &[ChunkKeywords]) -> DocumentKeywordSummary {
    let mut semantic_counts: HashMap<&str, usize> = HashMap::new();
    let mut technical_counts: HashMap<&str, usize> = HashMap::new();

    for chunk in chunks {
        for kw in &chunk.semantic {
            *semantic_counts.entry(kw.as_str()).or_insert(0) += 1;
        }
        for kw in &chunk.technical {
            *technical_counts.entry(kw.as_str()).or_insert(0) += 1;
        }
    }

    let top_semantic = top_by_frequency(semantic_counts, MAX_SEMANTIC_PER_DOC);
    let top_technical = top_by_frequency(technical_counts, MAX_TECHNICAL_PER_DOC);

    let mut combined: Vec<String> = top_semantic.iter().cloned().chain(top_technical.iter().cloned()).collect();
    combined.truncate(MAX_COMBINED_PER_DOC);

    DocumentKeywordSummary { semantic: top_semantic, technical: top_technical, all: combined }
}

fn top_by_frequency(counts: HashMap<&str, usize>, limit: usize) -> Vec<String> {
    let mut entries: Vec<(&str, usize)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries.into_iter().take(limit).map(|(k, _)| k.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_known_technologies() {
        let terms = extract_technical_terms("We deployed the API on Docker with PostgreSQL and Redis.");
        assert!(terms.iter().any(|t| t == "api" || t == "API"));
        assert!(terms.iter().any(|t| t.eq_ignore_ascii_case("docker")));
    }

    #[test]
    fn drops_stopword_function_matches() {
        let terms = extract_technical_terms("for() and() the() but() not()");
        assert!(!terms.iter().any(|t| t == "for()" || t == "FOR"));
    }

    #[tokio::test]
    async fn short_text_skips_semantic_extraction() {
        let result = extract_chunk_keywords(None, "слишком короткий текст").await;
        assert!(result.semantic.is_empty());
    }

    #[test]
    fn document_summary_ranks_by_frequency() {
        let chunks = vec![
            ChunkKeywords { semantic: vec!["договор".into()], technical: vec!["api".into()], all: vec![] },
            ChunkKeywords { semantic: vec!["договор".into()], technical: vec!["docker".into()], all: vec![] },
        ];
        let summary = summarize_document_keywords(&chunks);
        assert_eq!(summary.semantic[0], "договор");
    }
}
