//! Embedding provider abstraction for code indexing.
//!
//! Defines the [`Embedder`] contract, input preparation, batch orchestration
//! with shrinking retries, and the concrete backends selectable from config.

pub mod any;
pub mod embedder;
pub mod error;
pub mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod ollama;
pub mod openai;
pub(crate) mod retry;

pub use any::AnyEmbedder;
pub use embedder::{
    BatchEmbedding, EmbedFailure, EmbedOptions, Embedder, embed_all, embed_query, prepare_input,
};
pub use error::{EmbedError, Result};
pub use retry::backoff;
