use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalSettings,
}

/// Embedding backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Ollama,
    OpenAi,
    Mock,
}

impl EmbeddingProvider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Mock => "mock",
        }
    }
}

impl std::fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_provider() -> EmbeddingProvider {
    EmbeddingProvider::Ollama
}

fn default_embedding_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}

fn default_max_tokens() -> usize {
    8191
}

fn default_embed_batch_size() -> usize {
    32
}

fn default_embed_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: EmbeddingProvider,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Known output dimension; detected on first use when absent.
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("dimension", &self.dimension)
            .field("max_tokens", &self.max_tokens)
            .field("batch_size", &self.batch_size)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            api_key: None,
            dimension: None,
            max_tokens: default_max_tokens(),
            batch_size: default_embed_batch_size(),
            timeout_secs: default_embed_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Vector store backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    Qdrant,
    Memory,
}

fn default_backend() -> VectorBackend {
    VectorBackend::Qdrant
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

fn default_upsert_batch_size() -> usize {
    100
}

fn default_base_backoff_ms() -> u64 {
    200
}

fn default_store_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_backend")]
    pub backend: VectorBackend,
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            qdrant_url: default_qdrant_url(),
            upsert_batch_size: default_upsert_batch_size(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_sqlite_path() -> String {
    ".coderag/index.db".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetadataConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_max_chars() -> usize {
    4000
}

fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexingConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    /// Remove tracked files that are no longer present on a full run.
    #[serde(default)]
    pub prune_missing: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
            prune_missing: false,
        }
    }
}

fn default_k() -> usize {
    10
}

fn default_lambda() -> f32 {
    0.5
}

fn default_context_budget_chars() -> usize {
    24_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalSettings {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_lambda")]
    pub lambda: f32,
    #[serde(default)]
    pub hybrid: bool,
    #[serde(default)]
    pub min_score: f32,
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k: default_k(),
            lambda: default_lambda(),
            hybrid: false,
            min_score: 0.0,
            context_budget_chars: default_context_budget_chars(),
        }
    }
}
