#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{provider} returned status {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("rate limited")]
    RateLimited,

    #[error("embedding call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("expected {expected} vectors, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{failed} of {total} texts could not be embedded")]
    BatchFailed { failed: usize, total: usize },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, EmbedError>;
