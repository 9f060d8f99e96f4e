//! Core data models shared across ingestion and retrieval.
//!
//! [`ChunkMetadata`] is the flat, weakly-typed metadata map described by the
//! spec: a single sum type over scalar values plus a `list<string>` arm,
//! serialized to a delimited string for stores that disallow arrays.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single metadata value. Lists are comma-joined when persisted to a
/// store that only accepts scalar columns (durable sink, vector store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Serialize the value the way a store that disallows arrays would:
    /// lists become a comma-joined string, everything else its natural
    /// string form.
    pub fn to_scalar_string(&self) -> String {
        match self {
            MetadataValue::Str(s) => s.clone(),
            MetadataValue::Int(i) => i.to_string(),
            MetadataValue::Float(f) => f.to_string(),
            MetadataValue::Bool(b) => b.to_string(),
            MetadataValue::List(items) => items.join(","),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_scalar_string())
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Str(s.to_string())
    }
}
impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Str(s)
    }
}
impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Int(i)
    }
}
impl From<f64> for MetadataValue {
    fn from(f: f64) -> Self {
        MetadataValue::Float(f)
    }
}
impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}
impl From<Vec<String>> for MetadataValue {
    fn from(v: Vec<String>) -> Self {
        MetadataValue::List(v)
    }
}

/// Flat metadata map. `BTreeMap` so serialized JSON is deterministic
/// (matters for cache keys and snapshot tests).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata(pub BTreeMap<String, MetadataValue>);

impl ChunkMetadata {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(MetadataValue::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(MetadataValue::as_i64)
    }

    pub fn access_level(&self) -> Option<i32> {
        self.get_i64("access_level").map(|v| v as i32)
    }

    pub fn merge(&mut self, other: ChunkMetadata) {
        self.0.extend(other.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Header,
    Paragraph,
    NumberedItem,
    LetteredItem,
    Signatures,
    Table,
    TableRow,
    TextBeforeTable,
    TextAfterTable,
    SectionPart,
    CompleteSection,
    OrderDirective,
    FallbackTable,
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SectionType::Header => "header",
            SectionType::Paragraph => "paragraph",
            SectionType::NumberedItem => "numbered_item",
            SectionType::LetteredItem => "lettered_item",
            SectionType::Signatures => "signatures",
            SectionType::Table => "table",
            SectionType::TableRow => "table_row",
            SectionType::TextBeforeTable => "text_before_table",
            SectionType::TextAfterTable => "text_after_table",
            SectionType::SectionPart => "section_part",
            SectionType::CompleteSection => "complete_section",
            SectionType::OrderDirective => "order_directive",
            SectionType::FallbackTable => "fallback_table",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Order,
    Instruction,
    Contract,
    Report,
    General,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentType::Order => "order",
            DocumentType::Instruction => "instruction",
            DocumentType::Contract => "contract",
            DocumentType::Report => "report",
            DocumentType::General => "general",
        };
        write!(f, "{s}")
    }
}

/// The atomic retrieval unit. Immutable after ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub access_level: i32,
    pub char_start: usize,
    pub char_end: usize,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// `"{document_id}_{chunk_index}"` — globally unique.
    pub fn id(&self) -> String {
        format!("{}_{}", self.document_id, self.chunk_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub access_level: i32,
    pub status: DocumentStatus,
    pub chunk_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A contiguous, semantically meaningful span produced by the document
/// analyzer. Transient — lives only during ingest.
#[derive(Debug, Clone)]
pub struct Section {
    pub title: String,
    pub content: String,
    pub level: u8,
    pub section_type: SectionType,
    pub start_pos: usize,
    pub end_pos: usize,
}

/// Structured view of a parsed table. Transient.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub context_before: String,
    pub context_after: String,
    /// Absolute offset of the table's first row marker in the source text.
    pub start_pos: usize,
    pub end_pos: usize,
}

impl Table {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.headers.len()
    }
}

/// Transient per-leg / fused search record produced while a query is
/// in flight. Only `rerank_score` is used for filtering; the rest are
/// observational.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub vector_similarity: Option<f32>,
    pub bm25_score: Option<f32>,
    pub rrf_score: Option<f32>,
    pub rerank_score: Option<f32>,
    pub raw_logit: Option<f32>,
    pub final_rank: Option<usize>,
}

/// One timed stage in an [`IngestReport`] or [`RetrievalReport`].
#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: String,
    pub millis: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub document_type: DocumentType,
    pub chunk_count: usize,
    pub semantic_keywords: Vec<String>,
    pub technical_keywords: Vec<String>,
    pub stage_timings: Vec<StageTiming>,
}

/// One result surfaced to the caller after adaptive filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedSource {
    pub chunk_id: String,
    pub document_title: String,
    pub chunk_index: i64,
    pub access_level: i32,
    pub similarity_score: Option<f32>,
    pub rerank_score: Option<f32>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalReport {
    pub success: bool,
    pub context: String,
    pub sources: Vec<RetrievedSource>,
    pub total_found: usize,
    pub reranked_count: usize,
    pub filtered_count: usize,
    pub best_relevance_score: Option<f32>,
    pub relevance_filtered: bool,
    pub search_time_ms: u128,
    pub embedding_model: String,
    pub reranking_model: String,
    pub from_cache: bool,
    /// Reserved: accepted but unused in the vector path (see spec §9's
    /// Open Questions — "threshold softening" is documented, not wired).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_context: Option<String>,
}
