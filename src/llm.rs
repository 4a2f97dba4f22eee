//! LLM provider dispatch and prompt templates.
//!
//! Two wire formats are supported:
//! - **openai** — `POST {base_url}/v1/chat/completions` (OpenAI-compatible
//!   servers such as LM Studio); `OPENAI_API_KEY` is sent when present.
//! - **ollama** — `POST {base_url}/api/generate` with `stream: false`.
//!
//! Retries and backoff follow the same policy as the embedding client.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::embedding::post_with_retry;

const SYSTEM_PROMPT: &str = "You are a document assistant. Answer using only the \
supplied document content when it is provided, state clearly when the documents \
do not contain the answer, and keep answers accurate and concise. Do not \
describe your own model, backend, or configuration.";

/// Build the retrieval-augmented answer prompt.
pub fn rag_answer_prompt(context: &str, question: &str) -> String {
    format!(
        "Answer the user's question based on the following document excerpts. \
Ground every claim in the excerpts; if they do not contain the answer, say that \
no relevant material was found in the uploaded documents.\n\n\
Documents:\n{}\n\nQuestion: {}\n\nAnswer:",
        context, question
    )
}

/// Build the no-retrieval answer prompt, used for plain conversational turns
/// and for the degraded path when retrieval returns nothing above threshold.
pub fn direct_answer_prompt(question: &str) -> String {
    format!(
        "Answer the following question briefly and helpfully. For questions that \
would need document knowledge, note that document retrieval found no relevant \
material.\n\nQuestion: {}\n\nAnswer:",
        question
    )
}

/// Build the text-condensing prompt used by the optional summarize stage.
pub fn summarize_prompt(text: &str) -> String {
    format!(
        "Condense the following text to roughly 60-90% of its length. Keep every \
core point, drop redundancy, and output only the condensed text with no preamble \
or commentary. Answer in the same language as the input.\n\n\
Text:\n{}\n\nCondensed text:",
        text
    )
}

/// Run one completion with the configured provider and return the generated
/// text.
pub async fn complete(config: &LlmConfig, prompt: &str) -> Result<String> {
    match config.provider.as_str() {
        "openai" => complete_openai(config, prompt).await,
        "ollama" => complete_ollama(config, prompt).await,
        other => bail!("Unknown llm provider: {}", other),
    }
}

async fn complete_openai(config: &LlmConfig, prompt: &str) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let url = format!(
        "{}/v1/chat/completions",
        config.base_url.trim_end_matches('/')
    );
    let api_key = std::env::var("OPENAI_API_KEY").ok();

    let body = serde_json::json!({
        "model": config.model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": prompt },
        ],
        "max_tokens": config.max_tokens,
        "temperature": config.temperature,
    });

    let json = post_with_retry(&client, &url, api_key.as_deref(), &body, config.max_retries).await?;

    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat completion response: missing content"))
}

async fn complete_ollama(config: &LlmConfig, prompt: &str) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let url = format!("{}/api/generate", config.base_url.trim_end_matches('/'));

    let body = serde_json::json!({
        "model": config.model,
        "prompt": prompt,
        "system": SYSTEM_PROMPT,
        "stream": false,
        "options": {
            "temperature": config.temperature,
            "num_predict": config.max_tokens,
        },
    });

    let json = post_with_retry(&client, &url, None, &body, config.max_retries).await?;

    json.get("response")
        .and_then(|t| t.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid generate response: missing response field"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rag_prompt_carries_context_and_question() {
        let p = rag_answer_prompt("chunk one\n\nchunk two", "What is chunk one?");
        assert!(p.contains("chunk one"));
        assert!(p.contains("What is chunk one?"));
    }

    #[test]
    fn direct_prompt_has_no_document_section() {
        let p = direct_answer_prompt("Hello there");
        assert!(p.contains("Hello there"));
        assert!(!p.contains("Documents:"));
    }

    #[tokio::test]
    async fn unknown_provider_errors() {
        let config = LlmConfig {
            provider: "gpt4all".to_string(),
            ..Default::default()
        };
        let err = complete(&config, "hi").await.unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }
}
