//! Configuration parsing and validation.
//!
//! The engine is configured via a TOML file (default: `config/hr.toml`).
//! Every section has sane defaults; the environment variables listed in
//! spec §6 override the corresponding field after the file is parsed,
//! the way the original service reads `os.getenv(...)` over a baseline
//! config object.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub synonyms: SynonymsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: std::path::PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

fn default_db_path() -> std::path::PathBuf {
    std::path::PathBuf::from("./data/hr.sqlite3")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_result_ttl")]
    pub result_ttl_secs: u64,
    #[serde(default = "default_bm25_ttl")]
    pub bm25_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            result_ttl_secs: default_result_ttl(),
            bm25_ttl_secs: default_bm25_ttl(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_result_ttl() -> u64 {
    3600
}
fn default_bm25_ttl() -> u64 {
    7200
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_vector_store_url")]
    pub url: String,
    #[serde(default = "default_pool_min")]
    pub pool_min: usize,
    #[serde(default = "default_pool_max")]
    pub pool_max: usize,
    #[serde(default = "default_borrow_timeout")]
    pub borrow_timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_vector_store_url(),
            pool_min: default_pool_min(),
            pool_max: default_pool_max(),
            borrow_timeout_secs: default_borrow_timeout(),
        }
    }
}

fn default_vector_store_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_pool_min() -> usize {
    2
}
fn default_pool_max() -> usize {
    10
}
fn default_borrow_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_seq_length")]
    pub max_seq_length: usize,
    #[serde(default = "default_embedding_batch")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: default_embedding_model(),
            dims: default_dims(),
            max_seq_length: default_max_seq_length(),
            batch_size: default_embedding_batch(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_embedding_url() -> String {
    "http://localhost:8001".to_string()
}
fn default_embedding_model() -> String {
    "multilingual-e5-large-instruct".to_string()
}
fn default_dims() -> usize {
    1024
}
fn default_max_seq_length() -> usize {
    512
}
fn default_embedding_batch() -> usize {
    32
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    #[serde(default = "default_reranker_url")]
    pub url: String,
    #[serde(default = "default_reranker_model")]
    pub model: String,
    #[serde(default = "default_max_seq_length")]
    pub max_length: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            url: default_reranker_url(),
            model: default_reranker_model(),
            max_length: default_max_seq_length(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_reranker_url() -> String {
    "http://localhost:8002".to_string()
}
fn default_reranker_model() -> String {
    "bge-reranker-v2-m3".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    #[serde(default = "default_header_size")]
    pub header_size: usize,
    #[serde(default = "default_numbered_item_size")]
    pub numbered_item_size: usize,
    #[serde(default = "default_signatures_size")]
    pub signatures_size: usize,
    #[serde(default = "default_table_size")]
    pub table_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_overlap(),
            min_size: default_min_size(),
            header_size: default_header_size(),
            numbered_item_size: default_numbered_item_size(),
            signatures_size: default_signatures_size(),
            table_size: default_table_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    100
}
fn default_min_size() -> usize {
    200
}
fn default_header_size() -> usize {
    500
}
fn default_numbered_item_size() -> usize {
    600
}
fn default_signatures_size() -> usize {
    300
}
fn default_table_size() -> usize {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: usize,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f32,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            rerank_top_k: default_rerank_top_k(),
            vector_weight: default_vector_weight(),
            bm25_weight: default_bm25_weight(),
            rrf_k: default_rrf_k(),
        }
    }
}

fn default_top_k() -> usize {
    30
}
fn default_rerank_top_k() -> usize {
    10
}
fn default_vector_weight() -> f32 {
    0.7
}
fn default_bm25_weight() -> f32 {
    0.3
}
fn default_rrf_k() -> f32 {
    60.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct SynonymsConfig {
    #[serde(default = "default_synonyms_path")]
    pub dictionary_path: std::path::PathBuf,
}

impl Default for SynonymsConfig {
    fn default() -> Self {
        Self { dictionary_path: default_synonyms_path() }
    }
}

fn default_synonyms_path() -> std::path::PathBuf {
    std::path::PathBuf::from("./config/synonyms_ru.json")
}

/// Load, env-override, and validate a [`Config`] from a TOML file.
///
/// Missing files are not an error — callers that want a pure-default
/// config can point at a nonexistent path and rely on [`Config::default`].
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "failed to parse config file")?
    } else {
        toml::from_str("").context("failed to build default config")?
    };

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str("").expect("empty TOML parses to all-default Config")
    }
}

fn env_str(key: &str, slot: &mut String) {
    if let Ok(v) = std::env::var(key) {
        *slot = v;
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(url) = std::env::var("CHROMADB_URL") {
        config.vector_store.url = url;
    }
    env_parse("CHROMADB_POOL_MIN", &mut config.vector_store.pool_min);
    env_parse("CHROMADB_POOL_MAX", &mut config.vector_store.pool_max);
    env_str("REDIS_URL", &mut config.cache.redis_url);
    env_str("EMBEDDING_MODEL", &mut config.embedding.model);
    env_parse("EMBEDDING_DIMENSION", &mut config.embedding.dims);
    env_parse("EMBEDDING_MAX_SEQ_LENGTH", &mut config.embedding.max_seq_length);
    env_parse("EMBEDDING_BATCH_SIZE", &mut config.embedding.batch_size);
    env_str("RERANKER_MODEL", &mut config.reranker.model);
    env_parse("RERANKER_MAX_LENGTH", &mut config.reranker.max_length);
    env_str("LOCAL_EMBEDDING_URL", &mut config.embedding.url);
    env_str("LOCAL_RERANKER_URL", &mut config.reranker.url);
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.size == 0 {
        anyhow::bail!("chunking.size must be > 0");
    }
    if config.chunking.min_size > config.chunking.size {
        anyhow::bail!("chunking.min_size must be <= chunking.size");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.vector_store.pool_min > config.vector_store.pool_max {
        anyhow::bail!("vector_store.pool_min must be <= vector_store.pool_max");
    }
    Ok(())
}

/// Validate the access level carried on every ingest/retrieval task,
/// per spec §6: missing, non-integer, or outside `[1,100]` is a
/// validation error surfaced immediately, no retry.
pub fn validate_access_level(level: i32) -> Result<(), crate::error::EngineError> {
    if !(1..=100).contains(&level) {
        return Err(crate::error::EngineError::Validation(format!(
            "access_level must be in [1,100], got {level}"
        )));
    }
    Ok(())
}
