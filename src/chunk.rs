//! Overlapping sliding-window text chunker.
//!
//! Splits extracted document text into word-window [`Chunk`]s sized for
//! embedding. Consecutive chunks share `overlap_tokens` words so retrieval
//! does not lose context at chunk boundaries, and an undersized trailing
//! window is merged into its predecessor instead of being emitted alone.
//!
//! Each chunk receives a UUID plus a SHA-256 hash of its text.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Split `text` into overlapping chunks with contiguous indices from 0.
///
/// Tokens are whitespace-separated words. Window layout:
/// - each window holds at most `max_tokens` words;
/// - the next window starts `overlap_tokens` words before the previous end;
/// - a final window shorter than `min_tokens` is absorbed into the previous
///   window rather than emitted separately.
///
/// Deterministic: the same text and config always produce the same window
/// boundaries and texts (ids differ, hashes do not).
pub fn chunk_text(filename: &str, text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let words: Vec<&str> = text.split_whitespace().collect();

    if words.is_empty() {
        return Vec::new();
    }

    let max = config.max_tokens.max(1);
    let overlap = config.overlap_tokens.min(max - 1);
    let min = config.min_tokens;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index: i64 = 0;

    while start < words.len() {
        let mut end = (start + max).min(words.len());

        // Merge an undersized trailing window into this one.
        if end < words.len() && words.len() - end < min {
            end = words.len();
        }

        chunks.push(make_chunk(
            filename,
            chunk_index,
            &words[start..end].join(" "),
        ));
        chunk_index += 1;

        if end == words.len() {
            break;
        }
        start = end - overlap;
    }

    chunks
}

fn make_chunk(filename: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        filename: filename.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
