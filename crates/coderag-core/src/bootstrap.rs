//! Engine bootstrap: adapter construction from a validated [`Config`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use coderag_embed::ollama::OllamaEmbedder;
use coderag_embed::openai::OpenAiEmbedder;
use coderag_embed::{AnyEmbedder, EmbedOptions};
use coderag_index::{ChunkerConfig, IndexManager, IndexerConfig, RetrievalConfig, Retriever};
use coderag_store::{
    InMemoryVectorStore, MetadataStore, QdrantVectorStore, RetryPolicy, SqliteMetadataStore,
    VectorStore,
};

use crate::config::{
    Config, EmbeddingConfig, EmbeddingProvider, MetadataConfig, VectorBackend, VectorStoreConfig,
};

/// Adapters shared by the index manager and the retriever.
pub struct Engine {
    config: Config,
    embedder: Arc<AnyEmbedder>,
    store: Arc<dyn VectorStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl Engine {
    /// Validate `config` and build every adapter it selects.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or an adapter cannot be created.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let embedder = build_embedder(&config.embedding)?;
        let store = build_vector_store(&config.vector_store)?;
        let metadata = build_metadata_store(&config.metadata).await?;

        tracing::info!(
            provider = %config.embedding.provider,
            model = %config.embedding.model,
            "engine ready"
        );

        Ok(Self {
            config,
            embedder: Arc::new(embedder),
            store,
            metadata,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        Arc::clone(&self.metadata)
    }

    #[must_use]
    pub fn index_manager(&self) -> IndexManager<AnyEmbedder> {
        IndexManager::new(
            Arc::clone(&self.embedder),
            Arc::clone(&self.store),
            Arc::clone(&self.metadata),
            indexer_config(&self.config),
        )
    }

    #[must_use]
    pub fn retriever(&self) -> Retriever<AnyEmbedder> {
        Retriever::new(
            Arc::clone(&self.embedder),
            Arc::clone(&self.store),
            Arc::clone(&self.metadata),
            retrieval_config(&self.config),
        )
        .with_embed_options(embed_options(&self.config.embedding))
    }
}

/// Build the embedder selected by `embedding.provider`.
///
/// # Errors
///
/// Returns an error if the provider needs settings that are missing.
pub fn build_embedder(config: &EmbeddingConfig) -> anyhow::Result<AnyEmbedder> {
    let embedder = match config.provider {
        EmbeddingProvider::Ollama => {
            let mut e = OllamaEmbedder::new(&config.base_url, config.model.clone());
            if let Some(dim) = config.dimension {
                e = e.with_dimension(dim);
            }
            AnyEmbedder::Ollama(e)
        }
        EmbeddingProvider::OpenAi => {
            let api_key = config
                .api_key
                .clone()
                .context("embedding.api_key is required for the openai provider")?;
            let mut e = OpenAiEmbedder::new(
                api_key,
                config.base_url.clone(),
                config.model.clone(),
                Duration::from_secs(config.timeout_secs),
            )
            .with_max_retries(config.max_retries);
            if let Some(dim) = config.dimension {
                e = e.with_dimension(dim);
            }
            AnyEmbedder::OpenAi(e)
        }
        #[cfg(any(test, feature = "mock"))]
        EmbeddingProvider::Mock => AnyEmbedder::Mock(coderag_embed::mock::MockEmbedder::new(
            config.dimension.unwrap_or(64),
        )),
        #[cfg(not(any(test, feature = "mock")))]
        EmbeddingProvider::Mock => {
            anyhow::bail!("the mock embedding provider requires the `mock` feature")
        }
    };
    Ok(embedder)
}

/// Build the vector store selected by `vector_store.backend`.
///
/// # Errors
///
/// Returns an error if the Qdrant client cannot be created.
pub fn build_vector_store(config: &VectorStoreConfig) -> anyhow::Result<Arc<dyn VectorStore>> {
    match config.backend {
        VectorBackend::Qdrant => {
            let store = QdrantVectorStore::new(&config.qdrant_url)
                .with_context(|| format!("failed to connect to qdrant at {}", config.qdrant_url))?;
            Ok(Arc::new(store))
        }
        VectorBackend::Memory => {
            tracing::warn!("using in-memory vector store; vectors are lost on exit");
            Ok(Arc::new(InMemoryVectorStore::new()))
        }
    }
}

/// Open the SQLite metadata database, creating its directory when needed.
///
/// # Errors
///
/// Returns an error if the directory or database cannot be created.
pub async fn build_metadata_store(
    config: &MetadataConfig,
) -> anyhow::Result<Arc<dyn MetadataStore>> {
    let path = config.sqlite_path.as_str();
    if path != ":memory:"
        && let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = SqliteMetadataStore::new(path)
        .await
        .with_context(|| format!("failed to open metadata database {path}"))?;
    Ok(Arc::new(store))
}

fn embed_options(config: &EmbeddingConfig) -> EmbedOptions {
    EmbedOptions {
        batch_size: config.batch_size,
        max_tokens: config.max_tokens,
        call_timeout: Duration::from_secs(config.timeout_secs),
    }
}

#[must_use]
pub fn indexer_config(config: &Config) -> IndexerConfig {
    IndexerConfig {
        chunker: ChunkerConfig {
            max_chars: config.indexing.max_chars,
            overlap_chars: config.indexing.overlap_chars,
        },
        workers: config.indexing.workers,
        embed: embed_options(&config.embedding),
        upsert: RetryPolicy {
            batch_size: config.vector_store.upsert_batch_size,
            max_retries: config.vector_store.max_retries,
            base_backoff: Duration::from_millis(config.vector_store.base_backoff_ms),
            call_timeout: Duration::from_secs(config.vector_store.timeout_secs),
        },
        prune_missing: config.indexing.prune_missing,
    }
}

#[must_use]
pub fn retrieval_config(config: &Config) -> RetrievalConfig {
    RetrievalConfig {
        k: config.retrieval.k,
        lambda: config.retrieval.lambda,
        hybrid: config.retrieval.hybrid,
        min_score: config.retrieval.min_score,
    }
}
