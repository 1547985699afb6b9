#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("integer conversion: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),

    #[error("invalid index status: {0}")]
    InvalidStatus(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("repository {0} is not registered")]
    UnknownRepository(String),

    #[error("metadata store lock poisoned")]
    Poisoned,
}
