//! Code indexing and retrieval engine.
//!
//! Source files are split into semantic units by heuristic per-language
//! splitters, bounded into overlapping chunks, embedded and stored in a
//! vector store. Re-indexing is incremental by content hash. Queries go
//! through vector search, optional keyword union and MMR reranking, and the
//! result is packed into a bounded context block with citations.

pub mod assembler;
pub mod chunker;
pub mod context;
pub mod error;
pub mod indexer;
pub mod languages;
pub mod parser;
pub mod reranker;
pub mod retriever;

pub use assembler::{AssembledContext, Citation, ContextBudget, TextBlock, assemble};
pub use chunker::{Chunk, ChunkerConfig, chunk_unit, chunk_units};
pub use error::{IndexError, ParseError, Result};
pub use indexer::{
    FailedFile, FileChange, FileOutcome, IndexManager, IndexReport, IndexStatus, IndexerConfig,
    RepositoryStats, SourceFile, collection_name,
};
pub use languages::{Lang, detect_language, is_indexable, should_index_file};
pub use parser::{SourceUnit, UnitDetails, UnitType, parse};
pub use reranker::{Candidate, diversity_rerank, mmr, reciprocal_rank_fusion};
pub use retriever::{RankedResult, RetrievalConfig, Retriever};
