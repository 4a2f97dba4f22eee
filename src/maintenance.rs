//! Consistency checking and orphan cleanup.
//!
//! Document metadata, vectors, and disk artifacts are written in a
//! non-atomic sequence (disk first, then one DB transaction). A crash in
//! between leaves divergence this service detects and repairs; that is its
//! expected workload, not an edge case. Consistency problems are never
//! raised to callers of other endpoints — they only surface here.

use std::collections::BTreeSet;

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::{Config, StorageConfig};
use crate::index;
use crate::store;

pub const CAT_DOCUMENT_WITHOUT_VECTORS: &str = "document_without_vectors";
pub const CAT_VECTORS_WITHOUT_DOCUMENT: &str = "vectors_without_document";
pub const CAT_FILE_WITHOUT_DOCUMENT: &str = "file_without_document";
pub const CAT_DOCUMENT_WITHOUT_FILE: &str = "document_without_file";
pub const CAT_ORPHANED_ARTIFACTS: &str = "orphaned_artifacts";

#[derive(Debug, Serialize)]
pub struct ConsistencyIssue {
    pub category: String,
    pub description: String,
    pub files: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ConsistencyReport {
    pub consistent: bool,
    pub issues: Vec<ConsistencyIssue>,
}

#[derive(Debug, Serialize)]
pub struct CleanupReport {
    pub cleaned_count: usize,
    pub orphaned_files: Vec<String>,
    pub errors: Vec<String>,
}

/// Compare the three sources of truth — document rows, vector store, and
/// files on disk — and report every divergence by category.
pub async fn check_consistency(config: &Config, pool: &SqlitePool) -> Result<ConsistencyReport> {
    let documents: BTreeSet<String> = store::document_filenames(pool).await?.into_iter().collect();
    let indexed: BTreeSet<String> = index::indexed_filenames(pool).await?.into_iter().collect();
    let on_disk = disk_pdfs(&config.storage)?;
    let artifacts = artifact_owners(&config.storage)?;

    let mut issues = Vec::new();

    push_issue(
        &mut issues,
        CAT_DOCUMENT_WITHOUT_VECTORS,
        "document records with no vectors in the index",
        documents.difference(&indexed).cloned().collect(),
    );
    push_issue(
        &mut issues,
        CAT_VECTORS_WITHOUT_DOCUMENT,
        "vectors in the index with no document record",
        indexed.difference(&documents).cloned().collect(),
    );
    push_issue(
        &mut issues,
        CAT_FILE_WITHOUT_DOCUMENT,
        "PDF files on disk with no document record",
        on_disk.difference(&documents).cloned().collect(),
    );
    push_issue(
        &mut issues,
        CAT_DOCUMENT_WITHOUT_FILE,
        "document records whose original PDF is missing from disk",
        documents.difference(&on_disk).cloned().collect(),
    );
    push_issue(
        &mut issues,
        CAT_ORPHANED_ARTIFACTS,
        "processed or summary artifacts with no owning document",
        artifacts
            .into_iter()
            .filter(|(owner, _)| !documents.contains(owner))
            .map(|(_, path)| path)
            .collect(),
    );

    Ok(ConsistencyReport {
        consistent: issues.is_empty(),
        issues,
    })
}

/// Remove every detected orphan. Removals are attempted independently; one
/// failure is recorded and the rest proceed.
pub async fn cleanup_orphaned(config: &Config, pool: &SqlitePool) -> Result<CleanupReport> {
    let report = check_consistency(config, pool).await?;

    let mut cleaned_count = 0usize;
    let mut orphaned_files = Vec::new();
    let mut errors = Vec::new();

    for issue in &report.issues {
        match issue.category.as_str() {
            CAT_VECTORS_WITHOUT_DOCUMENT | CAT_FILE_WITHOUT_DOCUMENT => {
                for filename in &issue.files {
                    orphaned_files.push(filename.clone());
                    match store::delete_document(&config.storage, pool, filename, true).await {
                        Ok(outcome) if outcome.errors.is_empty() => cleaned_count += 1,
                        Ok(outcome) => {
                            errors.extend(
                                outcome.errors.iter().map(|e| format!("{}: {}", filename, e)),
                            );
                        }
                        Err(e) => errors.push(format!("{}: {}", filename, e)),
                    }
                }
            }
            CAT_ORPHANED_ARTIFACTS => {
                for path in &issue.files {
                    orphaned_files.push(path.clone());
                    match std::fs::remove_file(path) {
                        Ok(()) => cleaned_count += 1,
                        // Already removed by a document-level delete above.
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => cleaned_count += 1,
                        Err(e) => errors.push(format!("{}: {}", path, e)),
                    }
                }
            }
            // Document-side gaps (missing vectors, missing PDF) need a
            // re-ingest, not a delete; cleanup only reports them.
            _ => {}
        }
    }

    if errors.is_empty() {
        info!(cleaned = cleaned_count, "orphan cleanup complete");
    } else {
        warn!(
            cleaned = cleaned_count,
            failed = errors.len(),
            "orphan cleanup finished with errors"
        );
    }

    Ok(CleanupReport {
        cleaned_count,
        orphaned_files,
        errors,
    })
}

fn push_issue(
    issues: &mut Vec<ConsistencyIssue>,
    category: &str,
    description: &str,
    files: Vec<String>,
) {
    if files.is_empty() {
        return;
    }
    issues.push(ConsistencyIssue {
        category: category.to_string(),
        description: description.to_string(),
        count: files.len(),
        files,
    });
}

/// PDF filenames present in the data directory.
fn disk_pdfs(storage: &StorageConfig) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    if !storage.data_dir.exists() {
        return Ok(names);
    }
    for entry in std::fs::read_dir(&storage.data_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.to_ascii_lowercase().ends_with(".pdf") {
            names.insert(name);
        }
    }
    Ok(names)
}

/// Artifact files mapped to the document filename they belong to.
fn artifact_owners(storage: &StorageConfig) -> Result<Vec<(String, String)>> {
    let mut owners = Vec::new();
    for (dir, suffix) in [
        (storage.processed_dir(), "_raw.txt"),
        (storage.summaries_dir(), "_summary.txt"),
    ] {
        if !dir.exists() {
            continue;
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(owner) = name.strip_suffix(suffix) {
                owners.push((owner.to_string(), entry.path().display().to_string()));
            }
        }
    }
    Ok(owners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::apply_schema;
    use crate::models::Chunk;
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir) -> Config {
        let body = format!(
            "[storage]\ndata_dir = \"{}\"\n",
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

    async fn seed_document(config: &Config, pool: &SqlitePool, filename: &str) {
        store::persist_pdf(&config.storage, filename, b"%PDF-fake").unwrap();
        let mut tx = pool.begin().await.unwrap();
        let seq = store::insert_document(
            &mut tx,
            &crate::models::DocumentRecord {
                filename: filename.to_string(),
                size_bytes: 9,
                page_count: 1,
                character_count: 10,
                chunk_count: 1,
                processing_time_ms: 1,
                summarized: false,
                processed_at: 0,
            },
        )
        .await
        .unwrap();
        let chunk = Chunk {
            id: uuid::Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            chunk_index: 0,
            text: "chunk text".to_string(),
            hash: "h".to_string(),
        };
        index::insert_chunks(&mut tx, seq, &[chunk], &[vec![1.0, 0.0]])
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn fully_ingested_document_is_consistent() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let pool = test_pool(&config).await;
        seed_document(&config, &pool, "a.pdf").await;

        let report = check_consistency(&config, &pool).await.unwrap();
        assert!(report.consistent, "issues: {:?}", report.issues);
        assert!(report.issues.is_empty());
    }

    #[tokio::test]
    async fn orphaned_vectors_are_detected_and_cleaned() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let pool = test_pool(&config).await;

        // Vectors with no document row: the crash-between-phases shape.
        // Seeded through chunk_vectors alone; the chunks table's foreign key
        // into documents makes the half-committed state unrepresentable there.
        sqlx::query(
            "INSERT INTO chunk_vectors (chunk_id, filename, doc_seq, chunk_index, dims, embedding) \
             VALUES ('c1', 'ghost.pdf', 1, 0, 2, x'0000803f00000000')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let report = check_consistency(&config, &pool).await.unwrap();
        assert!(!report.consistent);
        assert!(report
            .issues
            .iter()
            .any(|i| i.category == CAT_VECTORS_WITHOUT_DOCUMENT
                && i.files.contains(&"ghost.pdf".to_string())));

        let cleanup = cleanup_orphaned(&config, &pool).await.unwrap();
        assert_eq!(cleanup.cleaned_count, 1);
        assert!(cleanup.errors.is_empty());

        let report = check_consistency(&config, &pool).await.unwrap();
        assert!(report.consistent);
    }

    #[tokio::test]
    async fn stray_disk_file_and_artifacts_are_detected() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let pool = test_pool(&config).await;

        store::ensure_dirs(&config.storage).unwrap();
        std::fs::write(config.storage.data_dir.join("stray.pdf"), b"x").unwrap();
        std::fs::write(
            config.storage.processed_dir().join("stray.pdf_raw.txt"),
            b"raw",
        )
        .unwrap();

        let report = check_consistency(&config, &pool).await.unwrap();
        assert!(!report.consistent);
        let categories: Vec<&str> = report.issues.iter().map(|i| i.category.as_str()).collect();
        assert!(categories.contains(&CAT_FILE_WITHOUT_DOCUMENT));
        assert!(categories.contains(&CAT_ORPHANED_ARTIFACTS));

        let cleanup = cleanup_orphaned(&config, &pool).await.unwrap();
        assert!(cleanup.errors.is_empty());
        assert!(cleanup.cleaned_count >= 2);

        let report = check_consistency(&config, &pool).await.unwrap();
        assert!(report.consistent, "issues: {:?}", report.issues);
    }

    #[tokio::test]
    async fn deleting_a_document_leaves_no_issues_behind() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let pool = test_pool(&config).await;
        seed_document(&config, &pool, "a.pdf").await;

        let outcome = store::delete_document(&config.storage, &pool, "a.pdf", false)
            .await
            .unwrap();
        assert!(outcome.found);

        let report = check_consistency(&config, &pool).await.unwrap();
        assert!(report.consistent);
        assert!(!report
            .issues
            .iter()
            .any(|i| i.files.iter().any(|f| f.contains("a.pdf"))));
    }
}
