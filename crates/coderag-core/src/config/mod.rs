mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.indexing.workers == 0 {
            bail!("indexing.workers must be at least 1");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be at least 1");
        }
        if self.vector_store.upsert_batch_size == 0 {
            bail!("vector_store.upsert_batch_size must be at least 1");
        }
        if self.indexing.max_chars == 0 {
            bail!("indexing.max_chars must be at least 1");
        }
        if self.indexing.overlap_chars >= self.indexing.max_chars {
            bail!(
                "indexing.overlap_chars ({}) must be smaller than indexing.max_chars ({})",
                self.indexing.overlap_chars,
                self.indexing.max_chars
            );
        }
        if !(0.0..=1.0).contains(&self.retrieval.lambda) {
            bail!(
                "retrieval.lambda must be within [0, 1], got {}",
                self.retrieval.lambda
            );
        }
        if self.embedding.provider == EmbeddingProvider::OpenAi
            && self.embedding.api_key.as_deref().is_none_or(str::is_empty)
        {
            bail!("embedding.api_key is required for the openai provider");
        }
        Ok(())
    }
}
