use super::SqliteMetadataStore;
use crate::error::MetadataError;
use crate::metadata::{EmbeddingSignature, RepositoryRecord};

type RepositoryTuple = (
    String,
    String,
    String,
    i64,
    i64,
    Option<i64>,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
);

fn repository_from_tuple(t: RepositoryTuple) -> Result<RepositoryRecord, MetadataError> {
    let embedding = match (t.7, t.8, t.9) {
        (Some(provider), Some(model), Some(dimension)) => Some(EmbeddingSignature {
            provider,
            model,
            dimension: u64::try_from(dimension)?,
        }),
        _ => None,
    };
    Ok(RepositoryRecord {
        repo_id: t.0,
        collection: t.1,
        status: t.2.parse()?,
        total_files: u64::try_from(t.3)?,
        total_chunks: u64::try_from(t.4)?,
        last_indexed_at: t.5,
        failed_files: serde_json::from_str(&t.6)?,
        embedding,
    })
}

impl SqliteMetadataStore {
    pub(super) async fn load_repository(
        &self,
        repo_id: &str,
    ) -> Result<Option<RepositoryRecord>, MetadataError> {
        let row: Option<RepositoryTuple> = sqlx::query_as(
            "SELECT repo_id, collection, status, total_files, total_chunks, last_indexed_at, \
             failed_files, embedding_provider, embedding_model, embedding_dimension \
             FROM repositories WHERE repo_id = ?",
        )
        .bind(repo_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(repository_from_tuple).transpose()
    }

    pub(super) async fn save_repository(
        &self,
        record: &RepositoryRecord,
    ) -> Result<(), MetadataError> {
        let failed = serde_json::to_string(&record.failed_files)?;
        let embedding = record.embedding.as_ref();
        let dimension = embedding.map(|e| i64::try_from(e.dimension)).transpose()?;
        sqlx::query(
            "INSERT INTO repositories \
             (repo_id, collection, status, total_files, total_chunks, last_indexed_at, failed_files, \
             embedding_provider, embedding_model, embedding_dimension) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(repo_id) DO UPDATE SET \
             collection = excluded.collection, \
             status = excluded.status, \
             total_files = excluded.total_files, \
             total_chunks = excluded.total_chunks, \
             last_indexed_at = excluded.last_indexed_at, \
             failed_files = excluded.failed_files, \
             embedding_provider = excluded.embedding_provider, \
             embedding_model = excluded.embedding_model, \
             embedding_dimension = excluded.embedding_dimension",
        )
        .bind(&record.repo_id)
        .bind(&record.collection)
        .bind(record.status.as_str())
        .bind(i64::try_from(record.total_files)?)
        .bind(i64::try_from(record.total_chunks)?)
        .bind(record.last_indexed_at)
        .bind(failed)
        .bind(embedding.map(|e| e.provider.as_str()))
        .bind(embedding.map(|e| e.model.as_str()))
        .bind(dimension)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(super) async fn remove_repository(&self, repo_id: &str) -> Result<bool, MetadataError> {
        let result = sqlx::query("DELETE FROM repositories WHERE repo_id = ?")
            .bind(repo_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
