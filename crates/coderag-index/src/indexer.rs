//! Repository indexing orchestrator: parse → chunk → embed → store.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use coderag_embed::{EmbedError, EmbedOptions, Embedder, embed_all, embed_query};
use coderag_store::{
    DeleteSelector, EmbeddingSignature, FileIndexRecord, IndexState, MetadataStore, RepositoryRecord, RetryPolicy,
    VectorFilter, VectorPoint, VectorStore, VectorStoreError, retry_transient, upsert_batched,
};
use futures::StreamExt;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::chunker::{Chunk, ChunkerConfig, chunk_units};
use crate::context::contextualize_for_embedding;
use crate::error::{IndexError, Result};
use crate::languages::detect_language;
use crate::parser::{extract_imports, parse};

/// A file handed to the indexer by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Repository-relative path.
    pub file_path: String,
    pub content: String,
    /// Hex blake3 of `content`; computed when absent.
    pub content_hash: Option<String>,
    pub is_uncommitted: bool,
    pub commit_hash: Option<String>,
    /// Set when the file exists but could not be read. Such a file fails
    /// without touching its stored chunks, and is never pruned as missing.
    pub read_error: Option<String>,
}

impl SourceFile {
    #[must_use]
    pub fn new(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            content: content.into(),
            content_hash: None,
            is_uncommitted: false,
            commit_hash: None,
            read_error: None,
        }
    }

    /// A file that is present on disk but whose content is unavailable.
    #[must_use]
    pub fn unreadable(file_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            read_error: Some(reason.into()),
            ..Self::new(file_path, String::new())
        }
    }

    #[must_use]
    pub fn uncommitted(mut self) -> Self {
        self.is_uncommitted = true;
        self
    }

    #[must_use]
    pub fn with_commit(mut self, commit_hash: impl Into<String>) -> Self {
        self.commit_hash = Some(commit_hash.into());
        self
    }

    fn hash(&self) -> String {
        self.content_hash
            .clone()
            .unwrap_or_else(|| blake3::hash(self.content.as_bytes()).to_hex().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Modified(SourceFile),
    Deleted(String),
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// New chunks written; `removed` old chunks were deleted first.
    Indexed { chunks: usize, removed: usize },
    /// Content hash matched the stored record.
    Unchanged,
    Skipped { reason: String },
    Deleted { chunks: usize },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub file_path: String,
    pub error: String,
}

/// Summary of an indexing run.
#[derive(Debug, Default, Clone)]
pub struct IndexReport {
    pub total_files: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_unchanged: usize,
    pub files_deleted: usize,
    pub files_cancelled: usize,
    pub chunks_created: usize,
    pub chunks_removed: usize,
    pub failed_files: Vec<FailedFile>,
    pub duration_ms: u64,
    pub chunks_per_second: f64,
}

impl IndexReport {
    fn record(&mut self, file_path: String, outcome: Result<FileOutcome>) {
        match outcome {
            Ok(FileOutcome::Indexed { chunks, removed }) => {
                self.files_indexed += 1;
                self.chunks_created += chunks;
                self.chunks_removed += removed;
            }
            Ok(FileOutcome::Unchanged) => self.files_unchanged += 1,
            Ok(FileOutcome::Skipped { .. }) => self.files_skipped += 1,
            Ok(FileOutcome::Deleted { chunks }) => {
                self.files_deleted += 1;
                self.chunks_removed += chunks;
            }
            Ok(FileOutcome::Cancelled) => self.files_cancelled += 1,
            Err(e) => self.failed_files.push(FailedFile {
                file_path,
                error: format!("{e:#}"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStatus {
    pub total_files: u64,
    pub total_chunks: u64,
    pub status: IndexState,
    pub last_indexed_at: Option<i64>,
    pub failed_files: Vec<String>,
}

impl From<&RepositoryRecord> for IndexStatus {
    fn from(r: &RepositoryRecord) -> Self {
        Self {
            total_files: r.total_files,
            total_chunks: r.total_chunks,
            status: r.status,
            last_indexed_at: r.last_indexed_at,
            failed_files: r.failed_files.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryStats {
    pub status: IndexStatus,
    pub collection: String,
    /// Points currently stored in the collection.
    pub vector_count: u64,
}

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    /// Files processed concurrently.
    pub workers: usize,
    pub embed: EmbedOptions,
    pub upsert: RetryPolicy,
    /// On a full run, drop tracked files that are absent from the input.
    pub prune_missing: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            workers: 4,
            embed: EmbedOptions::default(),
            upsert: RetryPolicy::default(),
            prune_missing: false,
        }
    }
}

/// Collection holding a repository's chunks.
#[must_use]
pub fn collection_name(repo_id: &str) -> String {
    let sanitized: String = repo_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("coderag_{sanitized}")
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

enum Job {
    Index { file: SourceFile, force: bool },
    Delete(String),
}

impl Job {
    fn path(&self) -> &str {
        match self {
            Self::Index { file, .. } => &file.file_path,
            Self::Delete(path) => path,
        }
    }
}

#[derive(Default)]
struct Progress {
    done: AtomicUsize,
    files_indexed: AtomicUsize,
    files_skipped: AtomicUsize,
    files_failed: AtomicUsize,
    chunks_created: AtomicUsize,
}

impl Progress {
    fn observe(&self, outcome: &Result<FileOutcome>) {
        match outcome {
            Ok(FileOutcome::Indexed { chunks, .. }) => {
                self.files_indexed.fetch_add(1, Ordering::Relaxed);
                self.chunks_created.fetch_add(*chunks, Ordering::Relaxed);
            }
            Ok(FileOutcome::Unchanged | FileOutcome::Skipped { .. }) => {
                self.files_skipped.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(_) => {
                self.files_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.done.fetch_add(1, Ordering::Relaxed);
    }
}

type FileKey = (String, String);

/// Orchestrates indexing of repositories into a vector store.
///
/// Every file is processed end to end by one worker: old vectors are
/// deleted, then the file is parsed, chunked, embedded and upserted, and
/// finally its [`FileIndexRecord`] is written. A file whose record hash
/// matches its content is skipped without any work.
///
/// The repository remembers which embedder produced its vectors. A full
/// run with a different provider, model or dimension re-embeds every file,
/// and incremental runs refuse to mix the two.
pub struct IndexManager<E: Embedder> {
    embedder: Arc<E>,
    store: Arc<dyn VectorStore>,
    metadata: Arc<dyn MetadataStore>,
    config: IndexerConfig,
    dimension: OnceCell<u64>,
    file_locks: Mutex<HashMap<FileKey, Arc<tokio::sync::Mutex<()>>>>,
    cancel: Mutex<CancellationToken>,
}

impl<E: Embedder> IndexManager<E> {
    #[must_use]
    pub fn new(
        embedder: Arc<E>,
        store: Arc<dyn VectorStore>,
        metadata: Arc<dyn MetadataStore>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            metadata,
            config,
            dimension: OnceCell::new(),
            file_locks: Mutex::new(HashMap::new()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Use an externally owned token, e.g. one cancelled on Ctrl-C.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Mutex::new(token);
        self
    }

    /// Token that stops the current run, or the next one if none is active.
    ///
    /// A token only ever stops one run: once a run has observed it, the
    /// manager switches to a fresh token, so fetch it again per run.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn rearm_cancel(&self) {
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    fn signature(&self, dimension: u64) -> EmbeddingSignature {
        EmbeddingSignature {
            provider: self.embedder.name().to_owned(),
            model: self.embedder.model().to_owned(),
            dimension,
        }
    }

    /// Rejects incremental work on a repository embedded by another model.
    fn check_signature(record: &RepositoryRecord, current: &EmbeddingSignature) -> Result<()> {
        match &record.embedding {
            Some(stored) if stored != current => Err(IndexError::EmbedderChanged {
                repo_id: record.repo_id.clone(),
                stored: stored.to_string(),
                current: current.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Index `files` into the repository's collection.
    ///
    /// Per-file failures are collected in [`IndexReport::failed_files`];
    /// the run still completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be created (the repository
    /// is then marked `failed`) or the metadata store is unavailable.
    pub async fn index_repository(
        &self,
        repo_id: &str,
        files: Vec<SourceFile>,
        force: bool,
    ) -> Result<IndexReport> {
        let start = Instant::now();
        let mut record = match self.metadata.get_repository(repo_id).await? {
            Some(r) => r,
            None => {
                let r = RepositoryRecord::new(repo_id, collection_name(repo_id));
                self.metadata.upsert_repository(r.clone()).await?;
                r
            }
        };

        let dimension = match self.ensure_collection(&record.collection).await {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(repo_id, collection = %record.collection, "collection setup failed: {e}");
                record.status = IndexState::Failed;
                self.metadata.upsert_repository(record).await?;
                return Err(e);
            }
        };

        let current = self.signature(dimension);
        let reembed = match &record.embedding {
            Some(stored) if *stored != current => {
                tracing::warn!(
                    repo_id,
                    stored = %stored,
                    current = %current,
                    "embedder changed, re-embedding every file"
                );
                true
            }
            _ => false,
        };
        let force = force || reembed;

        let mut jobs = Vec::with_capacity(files.len());
        if self.config.prune_missing || reembed {
            let present: HashSet<&str> = files.iter().map(|f| f.file_path.as_str()).collect();
            for tracked in self.metadata.list_files(repo_id).await? {
                if !present.contains(tracked.file_path.as_str()) {
                    jobs.push(Job::Delete(tracked.file_path));
                }
            }
        }
        jobs.extend(files.into_iter().map(|file| Job::Index { file, force }));

        tracing::info!(repo_id, total = jobs.len(), force, "indexing started");
        let report = self.run(&mut record, jobs, start, current).await?;
        Ok(report)
    }

    /// Index a single file of a known repository.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown repositories, and any error that kept
    /// the file from being indexed.
    pub async fn index_file(
        &self,
        repo_id: &str,
        file: SourceFile,
        force: bool,
    ) -> Result<FileOutcome> {
        let mut record = self.repository(repo_id).await?;
        let current = self.signature(self.ensure_collection(&record.collection).await?);
        Self::check_signature(&record, &current)?;
        let outcome = self
            .process_file(repo_id, &record.collection, file, force)
            .await;
        self.refresh_totals(&mut record).await?;
        self.metadata.upsert_repository(record).await?;
        outcome
    }

    /// Apply a batch of changes: modified files are re-indexed when their
    /// hash differs, deleted files lose all their chunks.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown repositories, `EmbedderChanged` when
    /// the repository was embedded by another model, or an error if the
    /// collection cannot be prepared.
    pub async fn incremental_index(
        &self,
        repo_id: &str,
        changes: Vec<FileChange>,
    ) -> Result<IndexReport> {
        let start = Instant::now();
        let mut record = self.repository(repo_id).await?;
        let current = self.signature(self.ensure_collection(&record.collection).await?);
        Self::check_signature(&record, &current)?;

        let jobs: Vec<Job> = changes
            .into_iter()
            .map(|change| match change {
                FileChange::Modified(file) => Job::Index { file, force: false },
                FileChange::Deleted(path) => Job::Delete(path),
            })
            .collect();
        tracing::info!(repo_id, total = jobs.len(), "incremental indexing started");
        self.run(&mut record, jobs, start, current).await
    }

    /// Remove every chunk of `file_path` and its record.
    ///
    /// Returns the number of chunks the record accounted for.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown repositories, or a store error.
    pub async fn delete_file_chunks(&self, repo_id: &str, file_path: &str) -> Result<usize> {
        let mut record = self.repository(repo_id).await?;
        let removed = self
            .remove_file(repo_id, &record.collection, file_path)
            .await?;
        self.refresh_totals(&mut record).await?;
        self.metadata.upsert_repository(record).await?;
        Ok(removed)
    }

    /// # Errors
    ///
    /// Returns `NotFound` for unknown repositories.
    pub async fn get_status(&self, repo_id: &str) -> Result<IndexStatus> {
        Ok(IndexStatus::from(&self.repository(repo_id).await?))
    }

    /// Status together with the live vector count of the collection.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown repositories, or a store error.
    pub async fn stats(&self, repo_id: &str) -> Result<RepositoryStats> {
        let record = self.repository(repo_id).await?;
        let vector_count = match self.store.stats(&record.collection).await {
            Ok(s) => s.count,
            Err(VectorStoreError::NotFound(_)) => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(RepositoryStats {
            status: IndexStatus::from(&record),
            collection: record.collection,
            vector_count,
        })
    }

    /// Drop the repository's collection and all of its records.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown repositories, or a store error.
    pub async fn delete_repository(&self, repo_id: &str) -> Result<()> {
        let record = self.repository(repo_id).await?;
        match self.store.drop_collection(&record.collection).await {
            Ok(()) | Err(VectorStoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.metadata.delete_repository(repo_id).await?;
        tracing::info!(repo_id, collection = %record.collection, "repository deleted");
        Ok(())
    }

    async fn repository(&self, repo_id: &str) -> Result<RepositoryRecord> {
        self.metadata
            .get_repository(repo_id)
            .await?
            .ok_or_else(|| IndexError::repository_not_found(repo_id))
    }

    async fn ensure_collection(&self, collection: &str) -> Result<u64> {
        let dimension = self
            .dimension
            .get_or_try_init(|| async {
                let dim = match self.embedder.dimension() {
                    Some(d) => d,
                    None => embed_query(&*self.embedder, "dimension check", &self.config.embed)
                        .await?
                        .len(),
                };
                u64::try_from(dim).map_err(|e| IndexError::Other(e.to_string()))
            })
            .await?;
        self.store.create_collection(collection, *dimension).await?;
        Ok(*dimension)
    }

    async fn run(
        &self,
        record: &mut RepositoryRecord,
        jobs: Vec<Job>,
        start: Instant,
        signature: EmbeddingSignature,
    ) -> Result<IndexReport> {
        let previous = record.status;
        record.status = IndexState::InProgress;
        self.metadata.upsert_repository(record.clone()).await?;

        let (repo, coll) = (record.repo_id.clone(), record.collection.clone());
        let (repo_id, collection) = (repo.as_str(), coll.as_str());
        let total = jobs.len();
        let progress = Progress::default();
        let cancel = self.cancel_token();

        let outcomes: Vec<(String, Result<FileOutcome>)> = futures::stream::iter(jobs)
            .map(|job| {
                let path = job.path().to_owned();
                let progress = &progress;
                let cancel = &cancel;
                let span = tracing::info_span!("index_file", file = %path);
                async move {
                    let outcome = if cancel.is_cancelled() {
                        Ok(FileOutcome::Cancelled)
                    } else {
                        match job {
                            Job::Index { file, force } => {
                                self.process_file(repo_id, collection, file, force).await
                            }
                            Job::Delete(path) => self
                                .remove_file(repo_id, collection, &path)
                                .await
                                .map(|chunks| FileOutcome::Deleted { chunks }),
                        }
                    };
                    match &outcome {
                        Ok(FileOutcome::Skipped { reason }) => {
                            tracing::debug!(reason = %reason, "file skipped");
                        }
                        Err(e) => tracing::warn!("file failed: {e:#}"),
                        Ok(_) => {}
                    }
                    progress.observe(&outcome);
                    tracing::debug!(
                        progress = format_args!("{}/{total}", progress.done.load(Ordering::Relaxed)),
                        indexed = progress.files_indexed.load(Ordering::Relaxed),
                        skipped = progress.files_skipped.load(Ordering::Relaxed),
                        failed = progress.files_failed.load(Ordering::Relaxed),
                        chunks = progress.chunks_created.load(Ordering::Relaxed),
                    );
                    (path, outcome)
                }
                .instrument(span)
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        let mut report = IndexReport {
            total_files: total,
            ..IndexReport::default()
        };
        for (path, outcome) in outcomes {
            report.record(path, outcome);
        }
        report.failed_files.sort_by(|a, b| a.file_path.cmp(&b.file_path));

        let failed = report.failed_files.iter().map(|f| f.file_path.clone());
        self.refresh_totals(record).await?;
        if report.files_cancelled > 0 {
            // Unprocessed files keep their old state, so the run cannot count
            // as completed and the stored embedder stays as it was.
            record.status = match previous {
                IndexState::InProgress => IndexState::Pending,
                other => other,
            };
            let merged: BTreeSet<String> = record.failed_files.drain(..).chain(failed).collect();
            record.failed_files = merged.into_iter().collect();
            self.rearm_cancel();
        } else {
            record.status = IndexState::Completed;
            record.last_indexed_at = Some(now_ms());
            record.failed_files = failed.collect();
            record.embedding = Some(signature);
        }
        self.metadata.upsert_repository(record.clone()).await?;

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        let secs = start.elapsed().as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let created = report.chunks_created as f64;
        if secs > 0.0 {
            report.chunks_per_second = created / secs;
        }

        tracing::info!(
            repo_id,
            total,
            indexed = report.files_indexed,
            unchanged = report.files_unchanged,
            skipped = report.files_skipped,
            deleted = report.files_deleted,
            cancelled = report.files_cancelled,
            failed = report.failed_files.len(),
            status = %record.status,
            chunks_created = report.chunks_created,
            chunks_removed = report.chunks_removed,
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }

    async fn refresh_totals(&self, record: &mut RepositoryRecord) -> Result<()> {
        let files = self.metadata.list_files(&record.repo_id).await?;
        record.total_files = u64::try_from(files.len()).unwrap_or(u64::MAX);
        record.total_chunks = files.iter().map(|f| f.chunk_count).sum();
        Ok(())
    }

    /// Runs `work` while holding the row lock of `(repo_id, file_path)`.
    ///
    /// Entries are created on demand and dropped again once no task holds
    /// or waits for them. Every clone is taken under the map mutex, so a
    /// strong count of one there means nobody else can be waiting.
    async fn with_file_lock<T>(
        &self,
        repo_id: &str,
        file_path: &str,
        work: impl Future<Output = T>,
    ) -> T {
        let key: FileKey = (repo_id.to_owned(), file_path.to_owned());
        let lock = {
            let mut locks = self.file_locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let out = {
            let _guard = lock.lock().await;
            work.await
        };
        drop(lock);

        let mut locks = self.file_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&key);
        }
        out
    }

    async fn delete_vectors(&self, collection: &str, file_path: &str) -> Result<()> {
        retry_transient(&self.config.upsert, "delete", || {
            self.store.delete(
                collection,
                DeleteSelector::Filter(VectorFilter::field("file_path", file_path)),
            )
        })
        .await?;
        Ok(())
    }

    async fn remove_file(&self, repo_id: &str, collection: &str, file_path: &str) -> Result<usize> {
        let work = self.remove_file_locked(repo_id, collection, file_path);
        self.with_file_lock(repo_id, file_path, work).await
    }

    async fn remove_file_locked(
        &self,
        repo_id: &str,
        collection: &str,
        file_path: &str,
    ) -> Result<usize> {
        let existing = self.metadata.get_file(repo_id, file_path).await?;
        self.delete_vectors(collection, file_path).await?;
        self.metadata.delete_file(repo_id, file_path).await?;
        let removed = existing.map_or(0, |r| usize::try_from(r.chunk_count).unwrap_or(usize::MAX));
        tracing::debug!(file_path, removed, "file chunks deleted");
        Ok(removed)
    }

    /// Best-effort cleanup after a failed write, so the file is retried next run.
    async fn forget_file(&self, repo_id: &str, collection: &str, file_path: &str) {
        if let Err(e) = self.delete_vectors(collection, file_path).await {
            tracing::warn!(file_path, "cleanup of partial vectors failed: {e}");
        }
        if let Err(e) = self.metadata.delete_file(repo_id, file_path).await {
            tracing::warn!(file_path, "removing stale record failed: {e}");
        }
    }

    async fn write_record(
        &self,
        repo_id: &str,
        file_path: &str,
        content_hash: String,
        chunk_count: usize,
        language: &str,
    ) -> Result<()> {
        self.metadata
            .upsert_file(FileIndexRecord {
                repo_id: repo_id.to_owned(),
                file_path: file_path.to_owned(),
                content_hash,
                chunk_count: u64::try_from(chunk_count).unwrap_or(u64::MAX),
                language: language.to_owned(),
                last_indexed_at: now_ms(),
            })
            .await?;
        Ok(())
    }

    async fn process_file(
        &self,
        repo_id: &str,
        collection: &str,
        file: SourceFile,
        force: bool,
    ) -> Result<FileOutcome> {
        let path = file.file_path.clone();
        let work = self.process_file_locked(repo_id, collection, file, force);
        self.with_file_lock(repo_id, &path, work).await
    }

    async fn process_file_locked(
        &self,
        repo_id: &str,
        collection: &str,
        file: SourceFile,
        force: bool,
    ) -> Result<FileOutcome> {
        if let Some(reason) = &file.read_error {
            return Err(IndexError::Unreadable {
                file_path: file.file_path.clone(),
                reason: reason.clone(),
            });
        }
        let path = file.file_path.as_str();
        let hash = file.hash();
        let existing = self.metadata.get_file(repo_id, path).await?;
        if !force && existing.as_ref().is_some_and(|r| r.content_hash == hash) {
            return Ok(FileOutcome::Unchanged);
        }
        let removed = existing.map_or(0, |r| usize::try_from(r.chunk_count).unwrap_or(usize::MAX));

        self.delete_vectors(collection, path).await?;

        let Some(lang) = detect_language(Path::new(path)) else {
            self.metadata.delete_file(repo_id, path).await?;
            return Ok(FileOutcome::Skipped {
                reason: "unsupported language".into(),
            });
        };

        let units = match parse(path, &file.content, lang) {
            Ok(units) => units,
            Err(e) => {
                tracing::warn!("{e}");
                self.write_record(repo_id, path, hash, 0, lang.id()).await?;
                return Ok(FileOutcome::Skipped {
                    reason: e.to_string(),
                });
            }
        };
        if units.is_empty() {
            self.write_record(repo_id, path, hash, 0, lang.id()).await?;
            return Ok(FileOutcome::Skipped {
                reason: "empty file".into(),
            });
        }

        let mut seen = HashSet::new();
        let chunks: Vec<Chunk> = chunk_units(&units, &self.config.chunker)
            .into_iter()
            .filter(|c| seen.insert(c.id.clone()))
            .map(|mut c| {
                c.is_uncommitted = file.is_uncommitted;
                c.commit_hash.clone_from(&file.commit_hash);
                c
            })
            .collect();

        let imports = extract_imports(&file.content, lang);
        let texts: Vec<String> = chunks
            .iter()
            .map(|c| contextualize_for_embedding(c, &imports))
            .collect();

        let embedded = embed_all(&*self.embedder, &texts, &self.config.embed).await;
        if !embedded.is_complete() {
            let failed = embedded.failures.len();
            self.forget_file(repo_id, collection, path).await;
            return Err(EmbedError::BatchFailed {
                failed,
                total: texts.len(),
            }
            .into());
        }
        let vectors = embedded.into_vectors()?;

        let count = chunks.len();
        let points: Vec<VectorPoint> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint {
                metadata: chunk.to_metadata(),
                id: chunk.id,
                vector,
                text: chunk.text,
            })
            .collect();

        if let Err(e) =
            upsert_batched(self.store.as_ref(), collection, points, &self.config.upsert).await
        {
            self.forget_file(repo_id, collection, path).await;
            return Err(e.into());
        }

        self.write_record(repo_id, path, hash, count, lang.id())
            .await?;
        tracing::debug!(chunks = count, removed, "file indexed");
        Ok(FileOutcome::Indexed {
            chunks: count,
            removed,
        })
    }
}
