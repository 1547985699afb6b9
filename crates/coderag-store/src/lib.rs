//! Persistence for the code index: chunk vectors and per-file bookkeeping.

pub mod error;
pub mod in_memory_store;
pub mod metadata;
pub mod qdrant_ops;
pub mod sqlite;
pub mod vector_store;

pub use error::MetadataError;
pub use in_memory_store::InMemoryVectorStore;
pub use metadata::{
    EmbeddingSignature, FileIndexRecord, InMemoryMetadataStore, IndexState, MetadataStore,
    RepositoryRecord,
};
pub use qdrant_ops::QdrantVectorStore;
pub use sqlite::SqliteMetadataStore;
pub use vector_store::{
    BoxFuture, CollectionStats, DeleteSelector, FieldCondition, FieldValue, Metadata, RetryPolicy,
    ScoredVectorPoint, TEXT_FIELD, VectorFilter, VectorPoint, VectorStore, VectorStoreError,
    cosine_similarity, retry_transient, upsert_batched,
};
