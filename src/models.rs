//! Core data models for the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// Document metadata stored in SQLite after a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub filename: String,
    pub size_bytes: i64,
    pub page_count: i64,
    pub character_count: i64,
    pub chunk_count: i64,
    pub processing_time_ms: i64,
    pub summarized: bool,
    pub processed_at: i64,
}

/// A chunk of a document's extracted text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub filename: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A retrieval result: a chunk paired with its query-time similarity.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub filename: String,
    pub chunk_index: i64,
    pub text: String,
    pub similarity: f32,
}

/// Source attribution attached to an assistant message or query answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub source_file: String,
    pub chunk_index: i64,
    pub similarity: f32,
    pub preview: String,
}

/// A single chat message within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    pub timestamp: i64,
}

/// Summary row for `GET /chat/sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub created_at: i64,
    pub last_updated: i64,
    pub message_count: i64,
}
