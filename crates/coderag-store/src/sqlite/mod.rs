mod files;
mod repositories;

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::error::MetadataError;
use crate::metadata::{FileIndexRecord, MetadataStore, RepositoryRecord};
use crate::vector_store::BoxFuture;

/// `SQLite`-backed [`MetadataStore`].
#[derive(Debug, Clone)]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Open (or create) the database and run migrations.
    ///
    /// Foreign keys are enabled per connection so deleting a repository
    /// cascades to its file records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn new(path: &str) -> Result<Self, MetadataError> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A private in-memory database exists per connection, so pin the pool
        // to one connection that is never recycled.
        let pool = if path == ":memory:" {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        }
        .connect_with(opts)
        .await?;

        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn get_file(
        &self,
        repo_id: &str,
        file_path: &str,
    ) -> BoxFuture<'_, Result<Option<FileIndexRecord>, MetadataError>> {
        let repo_id = repo_id.to_owned();
        let file_path = file_path.to_owned();
        Box::pin(async move { self.load_file(&repo_id, &file_path).await })
    }

    fn upsert_file(&self, record: FileIndexRecord) -> BoxFuture<'_, Result<(), MetadataError>> {
        Box::pin(async move { self.save_file(&record).await })
    }

    fn delete_file(
        &self,
        repo_id: &str,
        file_path: &str,
    ) -> BoxFuture<'_, Result<bool, MetadataError>> {
        let repo_id = repo_id.to_owned();
        let file_path = file_path.to_owned();
        Box::pin(async move { self.remove_file(&repo_id, &file_path).await })
    }

    fn list_files(
        &self,
        repo_id: &str,
    ) -> BoxFuture<'_, Result<Vec<FileIndexRecord>, MetadataError>> {
        let repo_id = repo_id.to_owned();
        Box::pin(async move { self.load_files(&repo_id).await })
    }

    fn get_repository(
        &self,
        repo_id: &str,
    ) -> BoxFuture<'_, Result<Option<RepositoryRecord>, MetadataError>> {
        let repo_id = repo_id.to_owned();
        Box::pin(async move { self.load_repository(&repo_id).await })
    }

    fn upsert_repository(
        &self,
        record: RepositoryRecord,
    ) -> BoxFuture<'_, Result<(), MetadataError>> {
        Box::pin(async move { self.save_repository(&record).await })
    }

    fn delete_repository(&self, repo_id: &str) -> BoxFuture<'_, Result<bool, MetadataError>> {
        let repo_id = repo_id.to_owned();
        Box::pin(async move { self.remove_repository(&repo_id).await })
    }
}
