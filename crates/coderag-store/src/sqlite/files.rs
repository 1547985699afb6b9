use super::SqliteMetadataStore;
use crate::error::MetadataError;
use crate::metadata::FileIndexRecord;

type FileTuple = (String, String, String, i64, String, i64);

fn file_from_tuple(t: FileTuple) -> Result<FileIndexRecord, MetadataError> {
    Ok(FileIndexRecord {
        repo_id: t.0,
        file_path: t.1,
        content_hash: t.2,
        chunk_count: u64::try_from(t.3)?,
        language: t.4,
        last_indexed_at: t.5,
    })
}

impl SqliteMetadataStore {
    pub(super) async fn load_file(
        &self,
        repo_id: &str,
        file_path: &str,
    ) -> Result<Option<FileIndexRecord>, MetadataError> {
        let row: Option<FileTuple> = sqlx::query_as(
            "SELECT repo_id, file_path, content_hash, chunk_count, language, last_indexed_at \
             FROM indexed_files WHERE repo_id = ? AND file_path = ?",
        )
        .bind(repo_id)
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;
        row.map(file_from_tuple).transpose()
    }

    pub(super) async fn save_file(&self, record: &FileIndexRecord) -> Result<(), MetadataError> {
        sqlx::query(
            "INSERT INTO indexed_files \
             (repo_id, file_path, content_hash, chunk_count, language, last_indexed_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(repo_id, file_path) DO UPDATE SET \
             content_hash = excluded.content_hash, \
             chunk_count = excluded.chunk_count, \
             language = excluded.language, \
             last_indexed_at = excluded.last_indexed_at",
        )
        .bind(&record.repo_id)
        .bind(&record.file_path)
        .bind(&record.content_hash)
        .bind(i64::try_from(record.chunk_count)?)
        .bind(&record.language)
        .bind(record.last_indexed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(super) async fn remove_file(
        &self,
        repo_id: &str,
        file_path: &str,
    ) -> Result<bool, MetadataError> {
        let result = sqlx::query("DELETE FROM indexed_files WHERE repo_id = ? AND file_path = ?")
            .bind(repo_id)
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(super) async fn load_files(
        &self,
        repo_id: &str,
    ) -> Result<Vec<FileIndexRecord>, MetadataError> {
        let rows: Vec<FileTuple> = sqlx::query_as(
            "SELECT repo_id, file_path, content_hash, chunk_count, language, last_indexed_at \
             FROM indexed_files WHERE repo_id = ? ORDER BY file_path",
        )
        .bind(repo_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(file_from_tuple).collect()
    }
}
