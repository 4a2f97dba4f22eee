use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables. Idempotent; safe to run on every startup.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Documents table. The implicit rowid (exposed as seq) records
    // insertion order and is the stable tie-break key for search.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            filename TEXT PRIMARY KEY,
            size_bytes INTEGER NOT NULL,
            page_count INTEGER NOT NULL,
            character_count INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            processing_time_ms INTEGER NOT NULL,
            summarized INTEGER NOT NULL DEFAULT 0,
            processed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(filename, chunk_index),
            FOREIGN KEY (filename) REFERENCES documents(filename)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector store. doc_seq mirrors documents.rowid so ordering survives
    // without a join on the hot search path.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            doc_seq INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_sessions (
            session_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_updated INTEGER NOT NULL,
            message_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_messages (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            sources_json TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(session_id, seq),
            FOREIGN KEY (session_id) REFERENCES chat_sessions(session_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single-row table for the process-wide "current session" pointer.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS current_session (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            session_id TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_filename ON chunks(filename)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_vectors_filename ON chunk_vectors(filename)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id, seq)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
