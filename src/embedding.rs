//! Embedding provider dispatch and vector utilities.
//!
//! Supported providers:
//! - **ollama** — `POST {base_url}/api/embeddings`, one request per text
//!   (the endpoint takes a single prompt).
//! - **openai** — `POST {base_url}/v1/embeddings` with batched input;
//!   `OPENAI_API_KEY` is sent when present.
//! - **disabled** — always errors; queries and ingestion require embeddings.
//!
//! Vector utilities for the SQLite-backed index:
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian f32 BLOB codec
//! - [`cosine_similarity`] — the retrieval similarity metric
//!
//! # Retry Strategy
//!
//! Transient failures (HTTP 429, 5xx, network errors) retry with exponential
//! backoff: 1s, 2s, 4s, ... capped at 32s. Other 4xx responses fail
//! immediately.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Embed a batch of texts with the configured provider.
///
/// Returns one vector per input text, in input order. Every vector must have
/// `config.dims` components; a mismatch is an error (the index rejects
/// mixed-dimension vectors).
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let vectors = match config.provider.as_str() {
        "ollama" => embed_ollama(config, texts).await?,
        "openai" => embed_openai(config, texts).await?,
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    };

    for v in &vectors {
        if v.len() != config.dims {
            bail!(
                "Embedding dimension mismatch: provider returned {}, config expects {}",
                v.len(),
                config.dims
            );
        }
    }

    Ok(vectors)
}

/// Embed a single query string.
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    let results = embed_texts(config, &[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Ollama embeddings: one `POST /api/embeddings` call per text.
async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let url = format!("{}/api/embeddings", config.base_url.trim_end_matches('/'));
    let mut vectors = Vec::with_capacity(texts.len());

    for text in texts {
        let body = serde_json::json!({
            "model": config.model,
            "prompt": text,
        });
        let json = post_with_retry(&client, &url, None, &body, config.max_retries).await?;
        let embedding = json
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embedding"))?;
        vectors.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }

    Ok(vectors)
}

/// OpenAI-compatible embeddings: a single batched call.
async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let url = format!("{}/v1/embeddings", config.base_url.trim_end_matches('/'));
    let api_key = std::env::var("OPENAI_API_KEY").ok();

    let body = serde_json::json!({
        "model": config.model,
        "input": texts,
    });

    let json = post_with_retry(&client, &url, api_key.as_deref(), &body, config.max_retries).await?;

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing embedding"))?;
        embeddings.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }

    Ok(embeddings)
}

/// POST `body` to `url`, retrying transient failures with backoff.
///
/// - HTTP 429 or 5xx → retry
/// - HTTP 4xx (not 429) → fail immediately
/// - Network error → retry
pub(crate) async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).json(body);
        if let Some(key) = bearer {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("API error {}: {}", status, body_text));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use docdex::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors, in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors or vectors of different lengths. The same
/// function scores both stored and query vectors, so no separate
/// normalization pass is needed.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
