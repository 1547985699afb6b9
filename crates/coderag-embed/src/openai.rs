use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embedder::Embedder;
use crate::error::{EmbedError, Result};
use crate::retry::send_with_retry;

/// Embedder for OpenAI and OpenAI-compatible `/embeddings` endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: Option<usize>,
    max_retries: u32,
}

impl fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl OpenAiEmbedder {
    #[must_use]
    pub fn new(api_key: String, mut base_url: String, model: String, timeout: Duration) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(timeout),
            api_key,
            base_url,
            model,
            dimension: None,
            max_retries: 3,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

impl Embedder for OpenAiEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "openai"
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

        let body = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };
        let url = format!("{}/embeddings", self.base_url);

        let response = send_with_retry("openai", self.max_retries, || {
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
        })
        .await?;

        let status = response.status();
        let text = response.text().await.map_err(EmbedError::Http)?;

        if !status.is_success() {
            tracing::error!("OpenAI embedding API error {status}: {text}");
            return Err(EmbedError::Api {
                provider: "openai",
                status: status.as_u16(),
                message: text,
            });
        }

        let mut resp: EmbeddingResponse = serde_json::from_str(&text)?;
        if resp.data.is_empty() {
            return Err(EmbedError::EmptyResponse { provider: "openai" });
        }
        resp.data.sort_by_key(|d| d.index);

        let vectors: Vec<Vec<f32>> = resp.data.into_iter().map(|d| d.embedding).collect();
        if let Some(expected) = self.dimension
            && let Some(bad) = vectors.iter().find(|v| v.len() != expected)
        {
            return Err(EmbedError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
