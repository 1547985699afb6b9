//! Per-file and per-repository index bookkeeping.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;
use crate::vector_store::BoxFuture;

/// Lifecycle of a repository index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl IndexState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexState {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(MetadataError::InvalidStatus(other.to_owned())),
        }
    }
}

/// What was last indexed for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndexRecord {
    pub repo_id: String,
    pub file_path: String,
    /// Hex blake3 of the file content.
    pub content_hash: String,
    pub chunk_count: u64,
    pub language: String,
    /// Unix epoch milliseconds.
    pub last_indexed_at: i64,
}

/// Embedder that produced a repository's vectors.
///
/// Vectors from different models are not comparable even when their
/// dimensions agree, so a change here invalidates every stored chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingSignature {
    pub provider: String,
    pub model: String,
    pub dimension: u64,
}

impl fmt::Display for EmbeddingSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({}d)", self.provider, self.model, self.dimension)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub repo_id: String,
    pub collection: String,
    pub status: IndexState,
    pub total_files: u64,
    pub total_chunks: u64,
    pub last_indexed_at: Option<i64>,
    pub failed_files: Vec<String>,
    /// Set once a run has embedded every file with one embedder.
    pub embedding: Option<EmbeddingSignature>,
}

impl RepositoryRecord {
    #[must_use]
    pub fn new(repo_id: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            collection: collection.into(),
            status: IndexState::Pending,
            total_files: 0,
            total_chunks: 0,
            last_indexed_at: None,
            failed_files: Vec::new(),
            embedding: None,
        }
    }
}

/// Durable store for [`FileIndexRecord`]s and [`RepositoryRecord`]s.
///
/// File records belong to a repository: writing one for an unregistered
/// repository fails, and deleting a repository removes its file records.
pub trait MetadataStore: Send + Sync {
    fn get_file(
        &self,
        repo_id: &str,
        file_path: &str,
    ) -> BoxFuture<'_, Result<Option<FileIndexRecord>, MetadataError>>;

    fn upsert_file(&self, record: FileIndexRecord) -> BoxFuture<'_, Result<(), MetadataError>>;

    /// Returns `true` if a record was removed.
    fn delete_file(
        &self,
        repo_id: &str,
        file_path: &str,
    ) -> BoxFuture<'_, Result<bool, MetadataError>>;

    /// All file records of a repository ordered by path.
    fn list_files(&self, repo_id: &str)
    -> BoxFuture<'_, Result<Vec<FileIndexRecord>, MetadataError>>;

    fn get_repository(
        &self,
        repo_id: &str,
    ) -> BoxFuture<'_, Result<Option<RepositoryRecord>, MetadataError>>;

    fn upsert_repository(
        &self,
        record: RepositoryRecord,
    ) -> BoxFuture<'_, Result<(), MetadataError>>;

    /// Removes the repository and all of its file records.
    fn delete_repository(&self, repo_id: &str) -> BoxFuture<'_, Result<bool, MetadataError>>;
}

#[derive(Default)]
struct Tables {
    repositories: HashMap<String, RepositoryRecord>,
    files: HashMap<(String, String), FileIndexRecord>,
}

/// Volatile [`MetadataStore`] for tests and `backend = "memory"` runs.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    tables: RwLock<Tables>,
}

impl InMemoryMetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for InMemoryMetadataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryMetadataStore").finish_non_exhaustive()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn get_file(
        &self,
        repo_id: &str,
        file_path: &str,
    ) -> BoxFuture<'_, Result<Option<FileIndexRecord>, MetadataError>> {
        let key = (repo_id.to_owned(), file_path.to_owned());
        Box::pin(async move {
            let t = self.tables.read().map_err(|_| MetadataError::Poisoned)?;
            Ok(t.files.get(&key).cloned())
        })
    }

    fn upsert_file(&self, record: FileIndexRecord) -> BoxFuture<'_, Result<(), MetadataError>> {
        Box::pin(async move {
            let mut t = self.tables.write().map_err(|_| MetadataError::Poisoned)?;
            if !t.repositories.contains_key(&record.repo_id) {
                return Err(MetadataError::UnknownRepository(record.repo_id));
            }
            t.files
                .insert((record.repo_id.clone(), record.file_path.clone()), record);
            Ok(())
        })
    }

    fn delete_file(
        &self,
        repo_id: &str,
        file_path: &str,
    ) -> BoxFuture<'_, Result<bool, MetadataError>> {
        let key = (repo_id.to_owned(), file_path.to_owned());
        Box::pin(async move {
            let mut t = self.tables.write().map_err(|_| MetadataError::Poisoned)?;
            Ok(t.files.remove(&key).is_some())
        })
    }

    fn list_files(
        &self,
        repo_id: &str,
    ) -> BoxFuture<'_, Result<Vec<FileIndexRecord>, MetadataError>> {
        let repo_id = repo_id.to_owned();
        Box::pin(async move {
            let t = self.tables.read().map_err(|_| MetadataError::Poisoned)?;
            let mut files: Vec<FileIndexRecord> = t
                .files
                .values()
                .filter(|r| r.repo_id == repo_id)
                .cloned()
                .collect();
            files.sort_by(|a, b| a.file_path.cmp(&b.file_path));
            Ok(files)
        })
    }

    fn get_repository(
        &self,
        repo_id: &str,
    ) -> BoxFuture<'_, Result<Option<RepositoryRecord>, MetadataError>> {
        let repo_id = repo_id.to_owned();
        Box::pin(async move {
            let t = self.tables.read().map_err(|_| MetadataError::Poisoned)?;
            Ok(t.repositories.get(&repo_id).cloned())
        })
    }

    fn upsert_repository(
        &self,
        record: RepositoryRecord,
    ) -> BoxFuture<'_, Result<(), MetadataError>> {
        Box::pin(async move {
            let mut t = self.tables.write().map_err(|_| MetadataError::Poisoned)?;
            t.repositories.insert(record.repo_id.clone(), record);
            Ok(())
        })
    }

    fn delete_repository(&self, repo_id: &str) -> BoxFuture<'_, Result<bool, MetadataError>> {
        let repo_id = repo_id.to_owned();
        Box::pin(async move {
            let mut t = self.tables.write().map_err(|_| MetadataError::Poisoned)?;
            t.files.retain(|(r, _), _| *r != repo_id);
            Ok(t.repositories.remove(&repo_id).is_some())
        })
    }
}
