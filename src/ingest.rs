//! Ingestion pipeline: one uploaded PDF in, one committed document out.
//!
//! Stages run in order: persist, extract, summarize (optional), chunk,
//! embed, store. The store stage writes the document row, chunks, and
//! vectors in a single transaction, so `GET /documents` never sees a
//! document without its vectors. Disk artifacts are written before that
//! commit and are cleaned up best-effort when a later stage fails.

use std::time::Instant;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::embed_texts;
use crate::extract;
use crate::index;
use crate::llm;
use crate::models::DocumentRecord;
use crate::store;

/// Ordered stage names, shared with upload-state progress reporting.
pub const STAGES: &[&str] = &["persist", "extract", "summarize", "chunk", "embed", "store"];

/// Upper bound on the text handed to one summarize call.
const SUMMARIZE_PIECE_CHARS: usize = 6000;

/// Per-stage ingestion failure.
#[derive(Debug)]
pub enum IngestError {
    InvalidFormat(String),
    FileTooLarge { size: usize, limit: usize },
    DuplicateFilename(String),
    ExtractionFailed(String),
    EmbeddingFailed(String),
    StorageFailed(String),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::InvalidFormat(name) => {
                write!(f, "invalid format: only PDF is supported, got '{}'", name)
            }
            IngestError::FileTooLarge { size, limit } => {
                write!(f, "file too large: {} bytes exceeds limit of {}", size, limit)
            }
            IngestError::DuplicateFilename(name) => {
                write!(f, "a document named '{}' already exists", name)
            }
            IngestError::ExtractionFailed(e) => write!(f, "text extraction failed: {}", e),
            IngestError::EmbeddingFailed(e) => write!(f, "embedding failed: {}", e),
            IngestError::StorageFailed(e) => write!(f, "storage failed: {}", e),
        }
    }
}

impl std::error::Error for IngestError {}

/// Result of a successful ingestion.
#[derive(Debug)]
pub struct IngestReport {
    pub filename: String,
    pub chunks_created: i64,
    pub characters_extracted: i64,
    pub pages_processed: i64,
    pub processing_time_ms: i64,
    pub summarized: bool,
}

/// Run the full pipeline for one uploaded file.
///
/// The caller holds the per-filename lock; this function assumes exclusive
/// write access for `filename`.
pub async fn ingest(
    config: &Config,
    pool: &SqlitePool,
    bytes: &[u8],
    filename: &str,
    summarize: bool,
) -> Result<IngestReport, IngestError> {
    let started = Instant::now();

    if !extract::is_supported_filename(filename) {
        return Err(IngestError::InvalidFormat(filename.to_string()));
    }
    if bytes.len() > config.server.max_upload_bytes {
        return Err(IngestError::FileTooLarge {
            size: bytes.len(),
            limit: config.server.max_upload_bytes,
        });
    }
    if store::document_exists(pool, filename)
        .await
        .map_err(|e| IngestError::StorageFailed(e.to_string()))?
    {
        return Err(IngestError::DuplicateFilename(filename.to_string()));
    }

    // Stage 1: persist the raw upload.
    store::persist_pdf(&config.storage, filename, bytes)
        .map_err(|e| IngestError::StorageFailed(e.to_string()))?;
    info!(filename, size = bytes.len(), "persisted upload");

    // Stage 2: extract text. Failure from here on removes what stage 1 wrote.
    let extracted = match extract::extract_pdf(bytes) {
        Ok(e) => e,
        Err(e) => {
            store::remove_artifacts(&config.storage, filename);
            return Err(IngestError::ExtractionFailed(e.to_string()));
        }
    };
    if let Err(e) = store::write_raw_text(&config.storage, filename, &extracted.text) {
        store::remove_artifacts(&config.storage, filename);
        return Err(IngestError::StorageFailed(e.to_string()));
    }
    info!(
        filename,
        characters = extracted.text.len(),
        pages = extracted.page_count,
        "extracted text"
    );

    // Stage 3: optional summarization. Never fatal; fall back to raw text.
    let (text, summarized) = if summarize {
        match summarize_text(config, &extracted.text).await {
            Ok(condensed) => {
                if let Err(e) = store::write_summary(&config.storage, filename, &condensed) {
                    warn!(filename, error = %e, "failed to write summary artifact");
                }
                (condensed, true)
            }
            Err(e) => {
                warn!(filename, error = %e, "summarization failed, using raw text");
                (extracted.text.clone(), false)
            }
        }
    } else {
        (extracted.text.clone(), false)
    };

    // Stage 4: chunk.
    let chunks = chunk_text(filename, &text, &config.chunking);
    if chunks.is_empty() {
        store::remove_artifacts(&config.storage, filename);
        return Err(IngestError::ExtractionFailed(
            "no chunks produced from extracted text".to_string(),
        ));
    }

    // Stage 5: embed, batched.
    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(config.embedding.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        match embed_texts(&config.embedding, &texts).await {
            Ok(mut batch_vectors) => vectors.append(&mut batch_vectors),
            Err(e) => {
                store::remove_artifacts(&config.storage, filename);
                return Err(IngestError::EmbeddingFailed(e.to_string()));
            }
        }
    }

    // Stage 6: commit document row + chunks + vectors atomically.
    let processing_time_ms = started.elapsed().as_millis() as i64;
    let record = DocumentRecord {
        filename: filename.to_string(),
        size_bytes: bytes.len() as i64,
        page_count: extracted.page_count,
        character_count: extracted.text.len() as i64,
        chunk_count: chunks.len() as i64,
        processing_time_ms,
        summarized,
        processed_at: chrono::Utc::now().timestamp(),
    };

    let commit = async {
        let mut tx = pool.begin().await?;
        let doc_seq = store::insert_document(&mut tx, &record).await?;
        index::insert_chunks(&mut tx, doc_seq, &chunks, &vectors).await?;
        tx.commit().await?;
        anyhow::Ok(())
    };
    if let Err(e) = commit.await {
        store::remove_artifacts(&config.storage, filename);
        return Err(IngestError::StorageFailed(e.to_string()));
    }

    info!(
        filename,
        chunks = chunks.len(),
        elapsed_ms = processing_time_ms,
        "ingestion complete"
    );

    Ok(IngestReport {
        filename: filename.to_string(),
        chunks_created: record.chunk_count,
        characters_extracted: record.character_count,
        pages_processed: record.page_count,
        processing_time_ms,
        summarized,
    })
}

/// Condense extracted text piece by piece through the LLM provider.
///
/// A piece whose condensed output comes back empty or longer than the input
/// keeps its raw text instead. Only a provider failure on the first piece
/// bubbles up; the caller then falls back to the raw text entirely.
async fn summarize_text(config: &Config, text: &str) -> anyhow::Result<String> {
    let pieces = split_for_summarization(text, SUMMARIZE_PIECE_CHARS);
    let mut condensed = Vec::with_capacity(pieces.len());

    for piece in &pieces {
        match llm::complete(&config.llm, &llm::summarize_prompt(piece)).await {
            Ok(summary) if !summary.trim().is_empty() && summary.len() <= piece.len() => {
                condensed.push(summary);
            }
            Ok(_) => {
                // Degenerate output: keep the original piece.
                condensed.push(piece.clone());
            }
            Err(e) => {
                if condensed.is_empty() {
                    return Err(e);
                }
                warn!(error = %e, "summarize call failed mid-document, keeping raw piece");
                condensed.push(piece.clone());
            }
        }
    }

    Ok(condensed.join("\n\n"))
}

/// Split text into pieces of at most `max_chars`, breaking on whitespace.
fn split_for_summarization(text: &str, max_chars: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in words {
        if !current.is_empty() && current.len() + 1 + word.len() > max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StorageConfig};
    use crate::migrate::apply_schema;
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir) -> Config {
        let body = format!(
            "[storage]\ndata_dir = \"{}\"\n\n[embedding]\nbase_url = \"http://127.0.0.1:1\"\nmax_retries = 0\ntimeout_secs = 1\n",
            tmp.path().join("data").display()
        );
        let path = tmp.path().join("docdex.toml");
        std::fs::write(&path, body).unwrap();
        crate::config::load_config(&path).unwrap()
    }

    async fn test_pool(config: &Config) -> SqlitePool {
        let pool = crate::db::connect(config).await.unwrap();
        apply_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn non_pdf_filename_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let pool = test_pool(&config).await;

        let err = ingest(&config, &pool, b"hello", "notes.txt", false)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidFormat(_)));
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(&tmp);
        config.server.max_upload_bytes = 8;
        let pool = test_pool(&config).await;

        let err = ingest(&config, &pool, b"0123456789", "big.pdf", false)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::FileTooLarge { .. }));
    }

    #[tokio::test]
    async fn duplicate_filename_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let pool = test_pool(&config).await;

        sqlx::query(
            "INSERT INTO documents (filename, size_bytes, page_count, character_count, \
             chunk_count, processing_time_ms, summarized, processed_at) \
             VALUES ('dup.pdf', 1, 1, 1, 1, 1, 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let err = ingest(&config, &pool, b"%PDF-1.4", "dup.pdf", false)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::DuplicateFilename(_)));
    }

    #[tokio::test]
    async fn corrupt_pdf_fails_extraction_and_strands_no_artifacts() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let pool = test_pool(&config).await;

        let err = ingest(&config, &pool, b"not a pdf at all", "bad.pdf", false)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::ExtractionFailed(_)));

        let storage: &StorageConfig = &config.storage;
        assert!(!crate::store::pdf_path(storage, "bad.pdf").exists());
        assert!(!crate::store::document_exists(&pool, "bad.pdf").await.unwrap());
        assert_eq!(crate::index::count(&pool).await.unwrap(), 0);
    }

    #[test]
    fn summarization_split_respects_max_chars() {
        let text = (0..2000).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        let pieces = split_for_summarization(&text, 500);
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|p| p.len() <= 500));
        // No words lost.
        let rejoined = pieces.join(" ");
        assert_eq!(
            rejoined.split_whitespace().count(),
            text.split_whitespace().count()
        );
    }
}
