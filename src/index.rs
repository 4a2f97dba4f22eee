//! SQLite-backed vector index.
//!
//! Chunk texts live in `chunks`, their embeddings in `chunk_vectors`; both are
//! written together inside the ingestion commit transaction so a document is
//! never queryable without its vectors. Search loads every stored vector and
//! scores it in Rust with [`cosine_similarity`] — document counts here are
//! tens, not millions, and the full scan keeps ordering exact.
//!
//! Ordering law: results sort by similarity descending, ties broken by
//! `(doc_seq, chunk_index)` ascending, so repeated queries over unchanged data
//! return identical orderings.

use anyhow::Result;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Chunk, ScoredChunk};

/// Insert a document's chunks and their vectors.
///
/// Runs against a transaction connection: the caller commits the document row,
/// chunks, and vectors atomically.
pub async fn insert_chunks(
    conn: &mut SqliteConnection,
    doc_seq: i64,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> Result<()> {
    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        sqlx::query(
            "INSERT INTO chunks (id, filename, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.filename)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "INSERT INTO chunk_vectors (chunk_id, filename, doc_seq, chunk_index, dims, embedding) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.filename)
        .bind(doc_seq)
        .bind(chunk.chunk_index)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Remove all chunks and vectors for `filename`. Unknown filenames are a
/// no-op, so the operation is idempotent.
pub async fn delete_by_document(pool: &SqlitePool, filename: &str) -> Result<u64> {
    let vectors = sqlx::query("DELETE FROM chunk_vectors WHERE filename = ?")
        .bind(filename)
        .execute(pool)
        .await?
        .rows_affected();

    sqlx::query("DELETE FROM chunks WHERE filename = ?")
        .bind(filename)
        .execute(pool)
        .await?;

    Ok(vectors)
}

/// k-nearest-neighbor search over all stored vectors.
///
/// `k >= count()` returns every vector; it is never an error.
pub async fn search(pool: &SqlitePool, query_vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
    let rows = sqlx::query(
        "SELECT v.chunk_id, v.filename, v.doc_seq, v.chunk_index, v.embedding, c.text \
         FROM chunk_vectors v JOIN chunks c ON c.id = v.chunk_id",
    )
    .fetch_all(pool)
    .await?;

    let mut scored: Vec<(f32, i64, ScoredChunk)> = rows
        .into_iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            let similarity = cosine_similarity(query_vector, &vector);
            let doc_seq: i64 = row.get("doc_seq");
            (
                similarity,
                doc_seq,
                ScoredChunk {
                    chunk_id: row.get("chunk_id"),
                    filename: row.get("filename"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    similarity,
                },
            )
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.chunk_index.cmp(&b.2.chunk_index))
    });
    scored.truncate(k);

    Ok(scored.into_iter().map(|(_, _, c)| c).collect())
}

/// Total number of stored vectors.
pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

/// Distinct filenames present in the vector store (for consistency checks).
pub async fn indexed_filenames(pool: &SqlitePool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar("SELECT DISTINCT filename FROM chunk_vectors ORDER BY filename")
        .fetch_all(pool)
        .await?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::apply_schema;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn test_pool(tmp: &TempDir) -> SqlitePool {
        let pool = crate::db::connect_path(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        pool
    }

    fn chunk(filename: &str, index: i64, text: &str) -> Chunk {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Chunk {
            id: Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            chunk_index: index,
            text: text.to_string(),
            hash: format!("{:x}", hasher.finalize()),
        }
    }

    async fn insert_doc(pool: &SqlitePool, doc_seq: i64, filename: &str, data: &[(&str, Vec<f32>)]) {
        let mut tx = pool.begin().await.unwrap();
        // Parent row: chunks carries a foreign key into documents.
        sqlx::query(
            "INSERT INTO documents (filename, size_bytes, page_count, character_count, \
             chunk_count, processing_time_ms, summarized, processed_at) \
             VALUES (?, 1, 1, 1, ?, 1, 0, 0)",
        )
        .bind(filename)
        .bind(data.len() as i64)
        .execute(&mut *tx)
        .await
        .unwrap();
        let chunks: Vec<Chunk> = data
            .iter()
            .enumerate()
            .map(|(i, (text, _))| chunk(filename, i as i64, text))
            .collect();
        let vectors: Vec<Vec<f32>> = data.iter().map(|(_, v)| v.clone()).collect();
        insert_chunks(&mut tx, doc_seq, &chunks, &vectors)
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn search_orders_by_similarity_desc() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        insert_doc(
            &pool,
            1,
            "a.pdf",
            &[
                ("far", vec![0.0, 1.0, 0.0]),
                ("near", vec![1.0, 0.0, 0.0]),
                ("mid", vec![1.0, 1.0, 0.0]),
            ],
        )
        .await;

        let results = search(&pool, &[1.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].text, "near");
        assert_eq!(results[1].text, "mid");
        assert_eq!(results[2].text, "far");
        assert!(results[0].similarity >= results[1].similarity);
        assert!(results[1].similarity >= results[2].similarity);
    }

    #[tokio::test]
    async fn equal_similarity_breaks_ties_by_doc_seq_then_index() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        // All vectors identical: similarity ties across both documents.
        let v = vec![1.0, 2.0, 3.0];
        insert_doc(
            &pool,
            2,
            "second.pdf",
            &[("s0", v.clone()), ("s1", v.clone())],
        )
        .await;
        insert_doc(&pool, 1, "first.pdf", &[("f0", v.clone()), ("f1", v.clone())]).await;

        let r1 = search(&pool, &v, 10).await.unwrap();
        let texts: Vec<&str> = r1.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["f0", "f1", "s0", "s1"]);

        // Determinism: a repeated query returns the identical ordering.
        let r2 = search(&pool, &v, 10).await.unwrap();
        let ids1: Vec<&str> = r1.iter().map(|c| c.chunk_id.as_str()).collect();
        let ids2: Vec<&str> = r2.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids1, ids2);
    }

    #[tokio::test]
    async fn k_beyond_total_returns_all() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        insert_doc(&pool, 1, "a.pdf", &[("only", vec![0.5, 0.5])]).await;

        let results = search(&pool, &[1.0, 0.0], 100).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(count(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stored_text_round_trips_exactly() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        let text = "Exact text — with unicode: 文檔內容 and  double  spaces";
        insert_doc(&pool, 1, "a.pdf", &[(text, vec![1.0, 0.0])]).await;

        let results = search(&pool, &[1.0, 0.0], 1).await.unwrap();
        assert_eq!(results[0].text, text);
    }

    #[tokio::test]
    async fn delete_by_document_removes_everything_and_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        insert_doc(
            &pool,
            1,
            "a.pdf",
            &[("x", vec![1.0, 0.0]), ("y", vec![0.0, 1.0])],
        )
        .await;
        insert_doc(&pool, 2, "b.pdf", &[("z", vec![1.0, 1.0])]).await;

        let removed = delete_by_document(&pool, "a.pdf").await.unwrap();
        assert_eq!(removed, 2);

        let results = search(&pool, &[1.0, 0.0], 10).await.unwrap();
        assert!(results.iter().all(|c| c.filename != "a.pdf"));
        assert_eq!(count(&pool).await.unwrap(), 1);

        // Second delete is a no-op, not an error.
        let removed = delete_by_document(&pool, "a.pdf").await.unwrap();
        assert_eq!(removed, 0);
    }
}
