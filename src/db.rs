//! Durable sink (SQLite, WAL mode).
//!
//! Stores [`Document`] rows and their [`Chunk`]s. The vector store holds
//! embeddings; this is the source of truth for document status, chunk
//! text, and chunk metadata — and the corpus the BM25 manager reads from
//! to build a per-access-level index.

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

use crate::config::Config;
use crate::models::{Chunk, ChunkMetadata, Document, DocumentStatus};

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

fn status_str(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Pending => "PENDING",
        DocumentStatus::Processing => "PROCESSING",
        DocumentStatus::Completed => "COMPLETED",
        DocumentStatus::Error => "ERROR",
    }
}

fn status_from_str(s: &str) -> DocumentStatus {
    match s {
        "PROCESSING" => DocumentStatus::Processing,
        "COMPLETED" => DocumentStatus::Completed,
        "ERROR" => DocumentStatus::Error,
        _ => DocumentStatus::Pending,
    }
}

/// Insert or replace a document row, moving it to `status`.
pub async fn upsert_document(
    pool: &SqlitePool,
    id: &str,
    title: &str,
    access_level: i32,
    document_type: &str,
    status: DocumentStatus,
    chunk_count: i64,
) -> Result<()> {
    let now = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO documents (id, title, access_level, document_type, status, chunk_count, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            access_level = excluded.access_level,
            document_type = excluded.document_type,
            status = excluded.status,
            chunk_count = excluded.chunk_count,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(id)
    .bind(title)
    .bind(access_level)
    .bind(document_type)
    .bind(status_str(status))
    .bind(chunk_count)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_document_status(pool: &SqlitePool, id: &str, status: DocumentStatus) -> Result<()> {
    let now = Utc::now().timestamp();
    sqlx::query("UPDATE documents SET status = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(status_str(status))
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
    let row = sqlx::query(
        "SELECT id, title, access_level, status, chunk_count, created_at, updated_at FROM documents WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| Document {
        id: r.get::<String, _>("id"),
        title: r.get::<String, _>("title"),
        access_level: r.get::<i32, _>("access_level"),
        status: status_from_str(&r.get::<String, _>("status")),
        chunk_count: r.get::<i64, _>("chunk_count"),
        created_at: chrono::DateTime::from_timestamp(r.get::<i64, _>("created_at"), 0).unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp(r.get::<i64, _>("updated_at"), 0).unwrap_or_else(Utc::now),
    }))
}

/// Replace every chunk belonging to `document_id` with `chunks` in a
/// single transaction.
pub async fn replace_chunks(pool: &SqlitePool, document_id: &str, chunks: &[Chunk]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?1").bind(document_id).execute(&mut *tx).await?;

    for chunk in chunks {
        let metadata_json = serde_json::to_string(&chunk.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, chunk_index, text, access_level, char_start, char_end, metadata_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(chunk.id())
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(chunk.access_level)
        .bind(chunk.char_start as i64)
        .bind(chunk.char_end as i64)
        .bind(metadata_json)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Compensating action on ingest failure per spec §7: drop every chunk
/// a partially-completed ingest may have written.
pub async fn delete_all_chunks(pool: &SqlitePool, document_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM chunks WHERE document_id = ?1").bind(document_id).execute(pool).await?;
    Ok(())
}

/// Every chunk visible at `access_level` (cumulative-visibility rule: a
/// chunk is visible to a caller whose level is >= the chunk's own),
/// tokenized, ready to feed [`crate::bm25::Bm25Index::build`].
pub async fn bm25_corpus(pool: &SqlitePool, access_level: i32) -> Result<Vec<crate::bm25::Bm25Document>> {
    let rows = sqlx::query("SELECT id, text FROM chunks WHERE access_level <= ?1")
        .bind(access_level)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|r| {
            let id: String = r.get("id");
            let text: String = r.get("text");
            crate::bm25::Bm25Document { id, tokens: crate::tokenizer::tokenize(&text) }
        })
        .collect())
}

pub struct StoredChunk {
    pub chunk: Chunk,
}

pub async fn get_chunks_by_ids(pool: &SqlitePool, ids: &[String]) -> Result<Vec<StoredChunk>> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(row) = sqlx::query(
            "SELECT document_id, chunk_index, text, access_level, char_start, char_end, metadata_json FROM chunks WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?
        {
            let metadata_json: String = row.get("metadata_json");
            let metadata: ChunkMetadata = serde_json::from_str(&metadata_json).unwrap_or_default();
            out.push(StoredChunk {
                chunk: Chunk {
                    document_id: row.get("document_id"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    access_level: row.get("access_level"),
                    char_start: row.get::<i64, _>("char_start") as usize,
                    char_end: row.get::<i64, _>("char_end") as usize,
                    metadata,
                },
            });
        }
    }
    Ok(out)
}
