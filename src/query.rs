//! Query engine: question in, answer plus source attribution out.
//!
//! RAG path: embed the question, run the vector index search, drop results
//! below the similarity threshold, build a bounded context from the retained
//! chunks in similarity order, and hand (context, question) to the LLM.
//! Retrieval finding nothing above threshold is not an error; the engine
//! answers without context instead. With `use_rag` off the index is never
//! touched and `sources` is always empty.

use std::time::Instant;

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::config::Config;
use crate::embedding::embed_query;
use crate::index;
use crate::llm;
use crate::models::{ScoredChunk, Source};

/// Characters of chunk text kept in a source preview.
const PREVIEW_CHARS: usize = 200;

#[derive(Debug)]
pub enum QueryError {
    EmptyQuestion,
    LlmUnavailable(String),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::EmptyQuestion => write!(f, "question must not be empty"),
            QueryError::LlmUnavailable(e) => write!(f, "language model unavailable: {}", e),
        }
    }
}

impl std::error::Error for QueryError {}

#[derive(Debug)]
pub struct QueryOutcome {
    pub answer: String,
    pub sources: Vec<Source>,
    pub processing_time_ms: i64,
}

/// Answer one question.
///
/// `top_k` falls back to `[retrieval].top_k` and is capped at
/// `[retrieval].top_k_max`.
pub async fn answer(
    config: &Config,
    pool: &SqlitePool,
    question: &str,
    top_k: Option<usize>,
    use_rag: bool,
) -> Result<QueryOutcome, QueryError> {
    let started = Instant::now();

    let question = question.trim();
    if question.is_empty() {
        return Err(QueryError::EmptyQuestion);
    }

    if !use_rag {
        let answer = llm::complete(&config.llm, &llm::direct_answer_prompt(question))
            .await
            .map_err(|e| QueryError::LlmUnavailable(e.to_string()))?;
        return Ok(QueryOutcome {
            answer,
            sources: Vec::new(),
            processing_time_ms: started.elapsed().as_millis() as i64,
        });
    }

    let k = top_k
        .unwrap_or(config.retrieval.top_k)
        .min(config.retrieval.top_k_max)
        .max(1);

    let query_vector = embed_query(&config.embedding, question)
        .await
        .map_err(|e| QueryError::LlmUnavailable(format!("embedding provider: {}", e)))?;

    let results = index::search(pool, &query_vector, k)
        .await
        .map_err(|e| QueryError::LlmUnavailable(format!("vector search: {}", e)))?;

    let retained: Vec<ScoredChunk> = results
        .into_iter()
        .filter(|c| c.similarity >= config.retrieval.similarity_threshold)
        .collect();

    debug!(
        retained = retained.len(),
        threshold = config.retrieval.similarity_threshold,
        "retrieval complete"
    );

    let (prompt, sources) = if retained.is_empty() {
        // Degraded path: nothing relevant found, answer without context.
        info!(question, "no chunks above threshold, answering without context");
        (llm::direct_answer_prompt(question), Vec::new())
    } else {
        let (context, used) = build_context(&retained, config.retrieval.max_context_chars);
        let sources = used.iter().map(|c| to_source(c)).collect();
        (llm::rag_answer_prompt(&context, question), sources)
    };

    let answer = llm::complete(&config.llm, &prompt)
        .await
        .map_err(|e| QueryError::LlmUnavailable(e.to_string()))?;

    Ok(QueryOutcome {
        answer,
        sources,
        processing_time_ms: started.elapsed().as_millis() as i64,
    })
}

/// Concatenate retained chunk texts in similarity order up to `max_chars`.
///
/// Returns the context string and the chunks that made it in. The first
/// chunk is always included (truncated if necessary) so a single oversized
/// chunk cannot produce an empty context.
fn build_context<'a>(
    retained: &'a [ScoredChunk],
    max_chars: usize,
) -> (String, Vec<&'a ScoredChunk>) {
    let mut context = String::new();
    let mut used = Vec::new();

    for chunk in retained {
        let sep = if context.is_empty() { 0 } else { 2 };
        if context.len() + sep + chunk.text.len() > max_chars {
            if used.is_empty() {
                let cut = floor_char_boundary(&chunk.text, max_chars);
                context.push_str(&chunk.text[..cut]);
                used.push(chunk);
            }
            break;
        }
        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str(&chunk.text);
        used.push(chunk);
    }

    (context, used)
}

fn to_source(chunk: &ScoredChunk) -> Source {
    let cut = floor_char_boundary(&chunk.text, PREVIEW_CHARS);
    Source {
        source_file: chunk.filename.clone(),
        chunk_index: chunk.chunk_index,
        similarity: chunk.similarity,
        preview: chunk.text[..cut].to_string(),
    }
}

fn floor_char_boundary(s: &str, mut at: usize) -> usize {
    if at >= s.len() {
        return s.len();
    }
    while at > 0 && !s.is_char_boundary(at) {
        at -= 1;
    }
    at
}
