//! Error types for coderag-index.

use coderag_embed::EmbedError;
use coderag_store::{MetadataError, VectorStoreError};

/// Content the parser refuses to split at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// NUL bytes: the file is binary, not source.
    #[error("{file_path}: binary content (NUL byte at offset {offset})")]
    Binary { file_path: String, offset: usize },
}

/// Errors that can occur during indexing and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    /// Embedding provider error.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    /// Metadata database error.
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file exists but its content could not be read.
    #[error("{file_path}: unreadable: {reason}")]
    Unreadable { file_path: String, reason: String },

    /// Stored vectors come from a different embedder than the current one.
    #[error("{repo_id} was embedded with {stored}, not {current}; run a full index")]
    EmbedderChanged {
        repo_id: String,
        stored: String,
        current: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl IndexError {
    pub(crate) fn repository_not_found(repo_id: &str) -> Self {
        Self::NotFound {
            kind: "repository",
            name: repo_id.to_owned(),
        }
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
