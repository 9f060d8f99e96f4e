//! # Hybrid Retriever
//!
//! A hybrid (dense + lexical) retrieval-augmented knowledge base engine.
//!
//! This binary (`hrctl`) is a thin local-operation and smoke-testing
//! surface over the library crate; the production entry points are
//! `ingest::Ingestor::process_document` and
//! `retriever::Retriever::hybrid_search`, meant to be driven by a task
//! queue or HTTP handler that stays outside this crate's scope.
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration parsing and validation
//! - [`models`] — Core data types shared across ingest and retrieval
//! - [`error`] — Typed error taxonomy (`EngineError`)
//! - [`vector_store`] — Pooled client for the external ANN vector store (C2)
//! - [`embedding`] — Embedding inference client (C3)
//! - [`reranker`] — Cross-encoder reranking client (C4)
//! - [`tokenizer`] — Morphological tokenizer (C5)
//! - [`synonyms`] — Synonym-dictionary query expansion (C6)
//! - [`keywords`] — Semantic + technical keyword extraction (C7)
//! - [`analyzer`] — Document classification and structural splitting (C8)
//! - [`table`] — Row-based table chunking (C9)
//! - [`chunker`] — Semantic-boundary-aware chunk assembly (C10)
//! - [`ingest`] — Ingestion pipeline orchestration (C11)
//! - [`bm25`] — Per-access-level lexical index (C12)
//! - [`retriever`] — Hybrid search orchestration (C13)
//! - [`cache`] — Result and BM25 index caching (C1)
//! - [`parsers`] — Format-specific text/table extraction
//! - [`db`] — SQLite durable sink
//! - [`migrate`] — Database schema migrations

mod analyzer;
mod bm25;
mod cache;
mod chunker;
mod config;
mod db;
mod embedding;
mod error;
mod ingest;
mod keywords;
mod migrate;
mod models;
mod parsers;
mod reranker;
mod retriever;
mod synonyms;
mod table;
mod tokenizer;
mod vector_store;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use vector_store::VectorStore as _;

const COLLECTION: &str = "chunks";

#[derive(Parser)]
#[command(
    name = "hrctl",
    about = "Hybrid Retriever — a hybrid (dense + lexical) retrieval-augmented knowledge base engine",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/hr.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the durable-sink schema migrations
    Migrate,

    /// Ingest a single document
    Ingest {
        /// Document id
        document_id: String,

        /// Path to the source file
        file_path: String,

        #[arg(long)]
        access_level: i32,

        #[arg(long)]
        title: Option<String>,
    },

    /// Run a hybrid search query
    Query {
        /// Search query text
        query: String,

        #[arg(long)]
        access_level: i32,

        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        rerank_top_k: Option<usize>,
    },

    /// Check connectivity to every external collaborator
    Health,
}

async fn build_ingestor(cfg: &config::Config) -> anyhow::Result<ingest::Ingestor> {
    let pool = db::connect(cfg).await?;
    let vector_pool = vector_store::build_pool(cfg.vector_store.clone())?;
    vector_store::warm_pool(&vector_pool, cfg.vector_store.pool_min).await;
    let vector_store: Arc<dyn vector_store::VectorStore> = Arc::new(vector_store::PooledVectorStore::new(vector_pool));
    let cache: Arc<dyn cache::CacheStore> = Arc::new(cache::RedisCacheStore::connect(cfg.cache.clone()).await?);
    let bm25 = Arc::new(bm25::Bm25Manager::new());
    let embedding: Arc<dyn embedding::EmbeddingClient> = Arc::new(embedding::HttpEmbeddingClient::new(cfg.embedding.clone())?);
    let semantic_keywords: Option<Arc<dyn keywords::SemanticKeywordExtractor>> =
        Some(Arc::new(keywords::HttpSemanticKeywordExtractor::new(&cfg.embedding)?));

    Ok(ingest::Ingestor::new(pool, vector_store, cache, bm25, embedding, semantic_keywords, cfg.chunking.clone(), COLLECTION))
}

async fn build_retriever(cfg: &config::Config) -> anyhow::Result<retriever::Retriever> {
    let pool = db::connect(cfg).await?;
    let vector_pool = vector_store::build_pool(cfg.vector_store.clone())?;
    vector_store::warm_pool(&vector_pool, cfg.vector_store.pool_min).await;
    let vector_store: Arc<dyn vector_store::VectorStore> = Arc::new(vector_store::PooledVectorStore::new(vector_pool));
    let cache: Arc<dyn cache::CacheStore> = Arc::new(cache::RedisCacheStore::connect(cfg.cache.clone()).await?);
    let bm25 = Arc::new(bm25::Bm25Manager::new());
    let embedding: Arc<dyn embedding::EmbeddingClient> = Arc::new(embedding::HttpEmbeddingClient::new(cfg.embedding.clone())?);
    let reranker: Arc<dyn reranker::RerankerClient> = Arc::new(reranker::HttpRerankerClient::new(cfg.reranker.clone())?);
    let synonyms = Arc::new(synonyms::SynonymExpander::load(&cfg.synonyms.dictionary_path)?);

    Ok(retriever::Retriever::new(embedding, vector_store, cache, bm25, synonyms, reranker, pool, cfg.retrieval.clone(), COLLECTION))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Migrate => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { document_id, file_path, access_level, title } => {
            let ingestor = build_ingestor(&cfg).await?;
            let report = ingestor
                .process_document_with_retry(&document_id, &file_path, access_level, title)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Query { query, access_level, top_k, rerank_top_k } => {
            let retriever = build_retriever(&cfg).await?;
            let report = retriever
                .hybrid_search(&query, access_level, top_k, rerank_top_k, None, None, None)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Health => {
            let vector_pool = vector_store::build_pool(cfg.vector_store.clone())?;
            let store = vector_store::PooledVectorStore::new(vector_pool);
            let vector_ok = store.heartbeat().await.is_ok();
            let cache_ok = cache::RedisCacheStore::connect(cfg.cache.clone()).await.is_ok();
            let db_ok = db::connect(&cfg).await.is_ok();
            println!(
                "{}",
                serde_json::json!({
                    "vector_store": vector_ok,
                    "cache": cache_ok,
                    "durable_sink": db_ok,
                })
            );
        }
    }

    Ok(())
}
