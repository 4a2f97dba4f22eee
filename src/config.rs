use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload_state: UploadStateConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding uploaded PDFs and processing artifacts.
    pub data_dir: PathBuf,
    /// SQLite database path. Defaults to `<data_dir>/docdex.sqlite`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("docdex.sqlite"))
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("processed")
    }

    pub fn summaries_dir(&self) -> PathBuf {
        self.data_dir.join("summaries")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    /// An undersized trailing chunk is merged into its predecessor.
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
            min_tokens: default_min_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    512
}
fn default_overlap_tokens() -> usize {
    50
}
fn default_min_tokens() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_top_k_max")]
    pub top_k_max: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            top_k_max: default_top_k_max(),
            similarity_threshold: default_similarity_threshold(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_top_k_max() -> usize {
    20
}
fn default_similarity_threshold() -> f32 {
    0.001
}
fn default_max_context_chars() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dims")]
    pub dims: usize,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_embedding_dims(),
            base_url: default_embedding_base_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_embedding_dims() -> usize {
    768
}
fn default_embedding_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            max_tokens: default_llm_max_tokens(),
            temperature: default_llm_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "deepseek/deepseek-r1-0528-qwen3-8b".to_string()
}
fn default_llm_base_url() -> String {
    "http://localhost:1234".to_string()
}
fn default_llm_max_tokens() -> u32 {
    4096
}
fn default_llm_temperature() -> f32 {
    0.7
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum accepted upload size in bytes (enforced at the HTTP boundary).
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadStateConfig {
    /// Upload states idle longer than this are expired.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

impl Default for UploadStateConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl_secs(),
        }
    }
}

fn default_idle_ttl_secs() -> u64 {
    3600
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }
    if config.chunking.min_tokens > config.chunking.max_tokens {
        anyhow::bail!("chunking.min_tokens must be <= chunking.max_tokens");
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.top_k_max < config.retrieval.top_k {
        anyhow::bail!("retrieval.top_k_max must be >= retrieval.top_k");
    }
    if config.retrieval.max_context_chars == 0 {
        anyhow::bail!("retrieval.max_context_chars must be > 0");
    }

    // Validate embedding
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be openai or ollama.",
            other
        ),
    }

    if config.server.max_upload_bytes == 0 {
        anyhow::bail!("server.max_upload_bytes must be > 0");
    }

    Ok(config)
}
