//! # Hybrid Retriever
//!
//! **A hybrid (dense + lexical) retrieval-augmented knowledge base engine.**
//!
//! Hybrid Retriever ingests documents into a chunked, embedded, keyword-
//! tagged corpus and serves access-level-aware hybrid search over it:
//! dense vector similarity fused with Okapi BM25 lexical scoring via
//! Reciprocal Rank Fusion, refined by a cross-encoder reranking pass with
//! adaptive relevance thresholding.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌─────────┐   ┌────────────┐
//! │  Parser  │──▶│  Analyzer  │──▶│ Chunker  │──▶│Keywords │──▶│ Embedding  │
//! │ txt/md/  │   │  (C8)      │   │ (C10/C9) │   │  (C7)   │   │   (C3)     │
//! │ csv/json │   └───────────┘   └──────────┘   └─────────┘   └─────┬──────┘
//! └──────────┘                                                      │
//!                                                                    ▼
//!                                              ┌─────────────┐  ┌──────────┐
//!                                              │ Vector Pool │  │ Durable  │
//!                                              │    (C2)     │  │   Sink   │
//!                                              └─────────────┘  └──────────┘
//!
//! Query:  Retriever (C13) → Embedding (C3) → Vector Pool (C2)
//!                          → BM25 (C12) [uses Tokenizer C5, Synonyms C6]
//!                          → RRF → Reranker (C4) → adaptive filter → context
//! ```
//!
//! ## Data Flow
//!
//! 1. [`ingest::Ingestor::process_document`] selects a [`parsers::DocumentParser`]
//!    by file extension, runs the [`analyzer`] to classify the document and
//!    split it into [`models::Section`]s, locates any [`models::Table`]s
//!    (via [`table`]), and builds [`models::Chunk`]s (via [`chunker`]).
//! 2. Each chunk is tagged with semantic and technical keywords
//!    ([`keywords`]) and embedded in batch ([`embedding`]).
//! 3. Chunks are upserted into the external vector store ([`vector_store`])
//!    and the durable sink ([`db`]).
//! 4. [`retriever::Retriever::hybrid_search`] fuses a vector leg and a
//!    BM25 leg ([`bm25`], using [`tokenizer`] and [`synonyms`]), reranks
//!    the result ([`reranker`]), applies adaptive thresholding, and
//!    assembles the final context string.
//! 5. [`cache`] memoizes both BM25 indexes and search results in Redis.
//!
//! ## Quick Start
//!
//! ```bash
//! hrctl migrate
//! hrctl ingest doc-1 ./order.txt --access-level 10 --title "Приказ №1"
//! hrctl query "кто подписал приказ" --access-level 10
//! hrctl health
//! ```
//!
//! ## Modules
//!
//! | Module | Component | Purpose |
//! |--------|-----------|---------|
//! | [`config`] | — | TOML configuration parsing and validation |
//! | [`models`] | — | Core data types shared across ingest and retrieval |
//! | [`error`] | — | Typed error taxonomy (`EngineError`) |
//! | [`vector_store`] | C2 | Pooled client for the external ANN vector store |
//! | [`embedding`] | C3 | Embedding inference client, language-adaptive prefixes |
//! | [`reranker`] | C4 | Cross-encoder reranking client and score postprocessing |
//! | [`tokenizer`] | C5 | Morphological tokenizer shared by indexing and query |
//! | [`synonyms`] | C6 | Synonym-dictionary query expansion |
//! | [`keywords`] | C7 | Semantic + technical keyword extraction |
//! | [`analyzer`] | C8 | Document type/metadata detection, structural splitting |
//! | [`table`] | C9 | Row-based table chunking |
//! | [`chunker`] | C10 | Semantic-boundary-aware chunk assembly |
//! | [`ingest`] | C11 | Ingestion pipeline orchestration |
//! | [`bm25`] | C12 | Per-access-level lexical index |
//! | [`retriever`] | C13 | Hybrid search orchestration |
//! | [`cache`] | C1 | Result and BM25 index caching |
//! | [`parsers`] | — | Format-specific text/table extraction |
//! | [`db`] | — | SQLite durable sink |
//! | [`migrate`] | — | Database schema migrations |

pub mod analyzer;
pub mod bm25;
pub mod cache;
pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod keywords;
pub mod migrate;
pub mod models;
pub mod parsers;
pub mod reranker;
pub mod retriever;
pub mod synonyms;
pub mod table;
pub mod tokenizer;
pub mod vector_store;
