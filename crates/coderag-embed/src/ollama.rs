use ollama_rs::Ollama;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};

use crate::embedder::Embedder;
use crate::error::{EmbedError, Result};

/// Embedder backed by a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Ollama,
    model: String,
    dimension: Option<usize>,
}

impl OllamaEmbedder {
    #[must_use]
    pub fn new(base_url: &str, model: String) -> Self {
        let (host, port) = parse_host_port(base_url);
        Self {
            client: Ollama::builder().host(host.as_str()).port(port).build(),
            model,
            dimension: None,
        }
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }
}

impl Embedder for OllamaEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request =
            GenerateEmbeddingsRequest::new(self.model.clone(), EmbeddingsInput::from(texts.to_vec()));

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| EmbedError::Other(format!("Ollama embedding request failed: {e}")))?;

        if response.embeddings.is_empty() {
            return Err(EmbedError::EmptyResponse { provider: "ollama" });
        }
        Ok(response.embeddings)
    }
}

fn parse_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some(colon_pos) = url.rfind(':') {
        let port_str = &url[colon_pos + 1..];
        if let Ok(port) = port_str.parse::<u16>() {
            let host = url[..colon_pos].to_string();
            return (host, port);
        }
    }
    (url.to_string(), 11434)
}
