//! Document store: uploaded PDFs, processing artifacts, and document
//! metadata rows.
//!
//! Disk layout under `[storage].data_dir`:
//! - `<filename>` — the original upload
//! - `processed/<filename>_raw.txt` — extracted text
//! - `summaries/<filename>_summary.txt` — condensed text, when the
//!   summarize stage ran
//!
//! Metadata rows land in the `documents` table only at the final ingestion
//! commit, so listing reads never see half-ingested documents. Disk writes
//! happen before that commit; the maintenance service repairs the gap left
//! by a crash in between.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::PathBuf;

use crate::config::StorageConfig;
use crate::index;
use crate::models::DocumentRecord;

pub fn pdf_path(storage: &StorageConfig, filename: &str) -> PathBuf {
    storage.data_dir.join(filename)
}

pub fn raw_text_path(storage: &StorageConfig, filename: &str) -> PathBuf {
    storage.processed_dir().join(format!("{}_raw.txt", filename))
}

pub fn summary_path(storage: &StorageConfig, filename: &str) -> PathBuf {
    storage
        .summaries_dir()
        .join(format!("{}_summary.txt", filename))
}

pub fn ensure_dirs(storage: &StorageConfig) -> Result<()> {
    std::fs::create_dir_all(&storage.data_dir)?;
    std::fs::create_dir_all(storage.processed_dir())?;
    std::fs::create_dir_all(storage.summaries_dir())?;
    Ok(())
}

/// Write the uploaded PDF bytes to the data directory.
pub fn persist_pdf(storage: &StorageConfig, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
    ensure_dirs(storage)?;
    let path = pdf_path(storage, filename);
    std::fs::write(&path, bytes)?;
    Ok(path)
}

pub fn write_raw_text(storage: &StorageConfig, filename: &str, text: &str) -> Result<()> {
    std::fs::write(raw_text_path(storage, filename), text)?;
    Ok(())
}

pub fn write_summary(storage: &StorageConfig, filename: &str, text: &str) -> Result<()> {
    std::fs::write(summary_path(storage, filename), text)?;
    Ok(())
}

/// Best-effort artifact removal after a failed ingestion. Missing files are
/// not errors; a failed upload must not strand files on disk.
pub fn remove_artifacts(storage: &StorageConfig, filename: &str) {
    for path in [
        pdf_path(storage, filename),
        raw_text_path(storage, filename),
        summary_path(storage, filename),
    ] {
        let _ = std::fs::remove_file(path);
    }
}

pub async fn document_exists(pool: &SqlitePool, filename: &str) -> Result<bool> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE filename = ?")
        .bind(filename)
        .fetch_one(pool)
        .await?;
    Ok(n > 0)
}

/// Insert the document metadata row. Runs on the ingestion commit
/// transaction; returns the rowid used as the index tie-break key.
pub async fn insert_document(conn: &mut SqliteConnection, doc: &DocumentRecord) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO documents \
         (filename, size_bytes, page_count, character_count, chunk_count, processing_time_ms, summarized, processed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&doc.filename)
    .bind(doc.size_bytes)
    .bind(doc.page_count)
    .bind(doc.character_count)
    .bind(doc.chunk_count)
    .bind(doc.processing_time_ms)
    .bind(doc.summarized)
    .bind(doc.processed_at)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn list_documents(pool: &SqlitePool) -> Result<Vec<DocumentRecord>> {
    let rows = sqlx::query(
        "SELECT filename, size_bytes, page_count, character_count, chunk_count, \
         processing_time_ms, summarized, processed_at \
         FROM documents ORDER BY rowid",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| DocumentRecord {
            filename: row.get("filename"),
            size_bytes: row.get("size_bytes"),
            page_count: row.get("page_count"),
            character_count: row.get("character_count"),
            chunk_count: row.get("chunk_count"),
            processing_time_ms: row.get("processing_time_ms"),
            summarized: row.get("summarized"),
            processed_at: row.get("processed_at"),
        })
        .collect())
}

pub async fn document_filenames(pool: &SqlitePool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar("SELECT filename FROM documents ORDER BY filename")
        .fetch_all(pool)
        .await?;
    Ok(names)
}

/// Outcome of a document deletion. Each sub-artifact is removed
/// independently; one failure never blocks the others.
#[derive(Debug, Serialize)]
pub struct DeleteOutcome {
    pub found: bool,
    pub removed_items: Vec<String>,
    pub errors: Vec<String>,
}

/// Delete a document: original file, processed artifacts, summary, vectors,
/// chunks, and the metadata row.
///
/// Without `force`, an entirely unknown filename (no row, no artifacts)
/// reports `found: false` and removes nothing. With `force`, every removal
/// step runs regardless, which is what orphan cleanup relies on.
pub async fn delete_document(
    storage: &StorageConfig,
    pool: &SqlitePool,
    filename: &str,
    force: bool,
) -> Result<DeleteOutcome> {
    let in_db = document_exists(pool, filename).await?;
    let on_disk = pdf_path(storage, filename).exists();
    let indexed = index::indexed_filenames(pool)
        .await?
        .iter()
        .any(|f| f == filename);

    let found = in_db || on_disk || indexed;
    if !found && !force {
        return Ok(DeleteOutcome {
            found: false,
            removed_items: Vec::new(),
            errors: Vec::new(),
        });
    }

    let mut removed_items = Vec::new();
    let mut errors = Vec::new();

    for (label, path) in [
        ("original file", pdf_path(storage, filename)),
        ("processed text", raw_text_path(storage, filename)),
        ("summary", summary_path(storage, filename)),
    ] {
        if path.exists() {
            match std::fs::remove_file(&path) {
                Ok(()) => removed_items.push(label.to_string()),
                Err(e) => errors.push(format!("{}: {}", label, e)),
            }
        }
    }

    match index::delete_by_document(pool, filename).await {
        Ok(n) if n > 0 => removed_items.push(format!("{} vectors", n)),
        Ok(_) => {}
        Err(e) => errors.push(format!("vectors: {}", e)),
    }

    match sqlx::query("DELETE FROM documents WHERE filename = ?")
        .bind(filename)
        .execute(pool)
        .await
    {
        Ok(r) if r.rows_affected() > 0 => removed_items.push("document record".to_string()),
        Ok(_) => {}
        Err(e) => errors.push(format!("document record: {}", e)),
    }

    Ok(DeleteOutcome {
        found,
        removed_items,
        errors,
    })
}
