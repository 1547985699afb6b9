//! Query-time retrieval: vector search, optional keyword union, MMR.

use std::collections::HashSet;
use std::sync::Arc;

use coderag_embed::{EmbedOptions, Embedder, embed_query};
use coderag_store::{
    MetadataStore, ScoredVectorPoint, VectorFilter, VectorPoint, VectorStore, cosine_similarity,
};

use crate::chunker::Chunk;
use crate::error::{IndexError, Result};
use crate::reranker::{Candidate, mmr};

/// Lower bound on the number of candidates fetched before reranking.
const MIN_OVERFETCH: usize = 20;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "has", "have", "how",
    "its", "was", "what", "when", "where", "which", "who", "why", "with", "this", "that", "does",
    "from", "into", "there", "their", "them", "then", "than", "use", "used", "uses", "code",
    "show", "find", "get", "about",
];

/// Retrieval configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Results returned when the caller does not ask for a specific count.
    pub k: usize,
    /// MMR trade-off: 1.0 is pure relevance, 0.0 pure diversity.
    pub lambda: f32,
    /// Union keyword matches with the vector hits.
    pub hybrid: bool,
    /// Candidates scoring below this are dropped before reranking.
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 10,
            lambda: 0.5,
            hybrid: false,
            min_score: 0.0,
        }
    }
}

/// A chunk selected for a query, in final order.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
    pub chunk: Chunk,
    pub similarity_score: f32,
    /// 1-based position after reranking.
    pub final_rank: usize,
    pub keyword_only: bool,
}

/// Filter on a single file.
#[must_use]
pub fn by_file(file_path: &str) -> VectorFilter {
    VectorFilter::field("file_path", file_path)
}

#[must_use]
pub fn by_language(language: &str) -> VectorFilter {
    VectorFilter::field("language", language)
}

#[must_use]
pub fn by_unit_type(unit_type: &str) -> VectorFilter {
    VectorFilter::field("unit_type", unit_type)
}

/// Only chunks indexed from uncommitted changes.
#[must_use]
pub fn uncommitted_only() -> VectorFilter {
    VectorFilter::field("is_uncommitted", true)
}

/// Lowercased query words of at least three characters, minus stop words.
#[must_use]
pub fn extract_keywords(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Semantic retriever over one vector store.
pub struct Retriever<E: Embedder> {
    embedder: Arc<E>,
    store: Arc<dyn VectorStore>,
    metadata: Arc<dyn MetadataStore>,
    embed_options: EmbedOptions,
    config: RetrievalConfig,
}

impl<E: Embedder> Retriever<E> {
    #[must_use]
    pub fn new(
        embedder: Arc<E>,
        store: Arc<dyn VectorStore>,
        metadata: Arc<dyn MetadataStore>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            metadata,
            embed_options: EmbedOptions::default(),
            config,
        }
    }

    #[must_use]
    pub fn with_embed_options(mut self, options: EmbedOptions) -> Self {
        self.embed_options = options;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve up to `k` chunks relevant to `text`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown repositories, and embedding or vector
    /// store errors (including a query dimension that does not match the
    /// collection).
    pub async fn query(
        &self,
        repo_id: &str,
        text: &str,
        k: usize,
        filter: Option<VectorFilter>,
    ) -> Result<Vec<RankedResult>> {
        let collection = self.collection_for(repo_id).await?;
        let vector = embed_query(&*self.embedder, text, &self.embed_options).await?;
        let k_over = (k * 2).max(MIN_OVERFETCH);

        let hits = self
            .store
            .query(
                &collection,
                vector.clone(),
                u64::try_from(k_over).unwrap_or(u64::MAX),
                filter.clone(),
            )
            .await?;
        let mut candidates: Vec<Candidate> = hits.into_iter().filter_map(from_hit).collect();
        let vector_hits = candidates.len();

        let mut keyword_hits = 0;
        if self.config.hybrid {
            let keywords = extract_keywords(text);
            if !keywords.is_empty() {
                let known: HashSet<String> =
                    candidates.iter().map(|c| c.chunk.id.clone()).collect();
                let points = self.store.scroll(&collection, filter).await?;
                let mut extra = keyword_matches(points, &keywords, &known, &vector);
                extra.truncate(k_over);
                keyword_hits = extra.len();
                candidates.extend(extra);
            }
        }

        candidates.retain(|c| c.score >= self.config.min_score);
        let kept = candidates.len();
        let results: Vec<RankedResult> = mmr(candidates, k, self.config.lambda)
            .into_iter()
            .zip(1..)
            .map(|(c, final_rank)| RankedResult {
                chunk: c.chunk,
                similarity_score: c.score,
                final_rank,
                keyword_only: c.keyword_only,
            })
            .collect();

        tracing::debug!(
            repo_id,
            vector_hits,
            keyword_hits,
            kept,
            returned = results.len(),
            "query complete"
        );
        Ok(results)
    }

    /// Code similar to `code`, excluding chunks whose text is identical.
    ///
    /// # Errors
    ///
    /// Same as [`Retriever::query`].
    pub async fn find_similar(
        &self,
        repo_id: &str,
        code: &str,
        k: usize,
    ) -> Result<Vec<RankedResult>> {
        let needle = code.trim();
        let mut results = self.query(repo_id, code, k + 1, None).await?;
        results.retain(|r| r.chunk.text.trim() != needle);
        results.truncate(k);
        for (r, rank) in results.iter_mut().zip(1..) {
            r.final_rank = rank;
        }
        Ok(results)
    }

    async fn collection_for(&self, repo_id: &str) -> Result<String> {
        let record = self
            .metadata
            .get_repository(repo_id)
            .await?
            .ok_or_else(|| IndexError::repository_not_found(repo_id))?;
        if let Some(stored) = &record.embedding
            && (stored.provider != self.embedder.name() || stored.model != self.embedder.model())
        {
            tracing::warn!(
                repo_id,
                stored = %stored,
                model = self.embedder.model(),
                "querying with a different embedder than the index was built with"
            );
        }
        Ok(record.collection)
    }
}

fn from_hit(hit: ScoredVectorPoint) -> Option<Candidate> {
    let Some(chunk) = Chunk::from_stored(&hit.id, &hit.text, &hit.metadata) else {
        tracing::warn!(id = %hit.id, "stored point has incomplete metadata, skipping");
        return None;
    };
    Some(Candidate {
        chunk,
        score: hit.score,
        vector: hit.vector,
        keyword_only: false,
    })
}

/// Stored points not already retrieved whose text contains a keyword,
/// scored by cosine against the query and sorted best first.
fn keyword_matches(
    points: Vec<VectorPoint>,
    keywords: &[String],
    known: &HashSet<String>,
    query: &[f32],
) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = points
        .into_iter()
        .filter(|p| !known.contains(&p.id))
        .filter(|p| {
            let lower = p.text.to_lowercase();
            keywords.iter().any(|k| lower.contains(k.as_str()))
        })
        .filter_map(|p| {
            let chunk = Chunk::from_stored(&p.id, &p.text, &p.metadata)?;
            Some(Candidate {
                chunk,
                score: cosine_similarity(query, &p.vector),
                vector: Some(p.vector),
                keyword_only: true,
            })
        })
        .collect();
    out.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    out
}

#[cfg(test)]
mod tests {
    use coderag_embed::mock::MockEmbedder;
    use coderag_store::{InMemoryMetadataStore, InMemoryVectorStore, RepositoryRecord};

    use super::*;
    use crate::chunker::{ChunkerConfig, chunk_unit};
    use crate::languages::Lang;
    use crate::parser::{SourceUnit, UnitDetails, UnitType};

    const COLLECTION: &str = "coderag_repo";

    fn chunk(file: &str, name: &str, text: &str, lang: Lang) -> Chunk {
        let unit = SourceUnit {
            file_path: file.into(),
            language: lang,
            unit_type: UnitType::Function,
            name: name.into(),
            raw_text: text.into(),
            start_line: 1,
            end_line: text.lines().count(),
            details: UnitDetails::default(),
        };
        chunk_unit(&unit, &ChunkerConfig::default()).remove(0)
    }

    async fn fixture(hybrid: bool) -> (Retriever<MockEmbedder>, Arc<MockEmbedder>) {
        let embedder = Arc::new(MockEmbedder::default());
        let store = Arc::new(InMemoryVectorStore::new());
        let metadata = Arc::new(InMemoryMetadataStore::new());
        metadata
            .upsert_repository(RepositoryRecord::new("repo", COLLECTION))
            .await
            .unwrap();
        store.create_collection(COLLECTION, 64).await.unwrap();

        let chunks = [
            chunk("src/auth.py", "login", "def login(user):\n    return check_password(user)\n", Lang::Python),
            chunk("src/auth.py", "logout", "def logout(user):\n    session.clear()\n", Lang::Python),
            chunk("src/db.rs", "connect", "fn connect(url: &str) -> Pool {\n    Pool::new(url)\n}\n", Lang::Rust),
            chunk("docs/guide.md", "Setup", "# Setup\nInstall the zebra package first.\n", Lang::Markdown),
        ];
        let points = chunks
            .iter()
            .map(|c| VectorPoint {
                id: c.id.clone(),
                vector: embedder.vector_for(&c.text),
                text: c.text.clone(),
                metadata: c.to_metadata(),
            })
            .collect();
        store.upsert(COLLECTION, points).await.unwrap();

        let config = RetrievalConfig {
            hybrid,
            ..RetrievalConfig::default()
        };
        let retriever = Retriever::new(Arc::clone(&embedder), store, metadata, config);
        (retriever, embedder)
    }

    #[test]
    fn keywords_skip_short_and_stop_words() {
        assert_eq!(
            extract_keywords("How does the Zebra_parser handle it? zebra_parser"),
            vec!["zebra_parser", "handle"]
        );
        assert!(extract_keywords("is it ok").is_empty());
    }

    #[test]
    fn filter_helpers() {
        assert_eq!(by_file("a.rs").must[0].field, "file_path");
        assert_eq!(by_language("rust").must[0].value.as_str(), Some("rust"));
        assert_eq!(by_unit_type("class").must[0].field, "unit_type");
        assert_eq!(uncommitted_only().must[0].value.as_bool(), Some(true));
    }

    #[tokio::test]
    async fn unknown_repository_is_not_found() {
        let (retriever, _) = fixture(false).await;
        let err = retriever.query("nope", "login", 3, None).await.unwrap_err();
        assert!(matches!(err, IndexError::NotFound { kind: "repository", .. }));
    }

    #[tokio::test]
    async fn query_ranks_and_limits() {
        let (retriever, _) = fixture(false).await;
        let results = retriever
            .query("repo", "def login(user):\n    return check_password(user)\n", 2, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.name, "login");
        assert_eq!(results[0].final_rank, 1);
        assert_eq!(results[1].final_rank, 2);
        assert!(results.iter().all(|r| !r.keyword_only));
    }

    #[tokio::test]
    async fn filter_restricts_results() {
        let (retriever, _) = fixture(false).await;
        let results = retriever
            .query("repo", "connect", 5, Some(by_language("rust")))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.file_path, "src/db.rs");
    }

    #[tokio::test]
    async fn min_score_drops_weak_hits() {
        let (mut retriever, _) = fixture(false).await;
        retriever.config.min_score = 1.1;
        assert!(retriever.query("repo", "login", 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hybrid_adds_keyword_only_hits() {
        let (retriever, _) = fixture(true).await;
        // Over-fetch covers the whole collection, so nothing is keyword-only.
        let results = retriever.query("repo", "zebra", 4, None).await.unwrap();
        assert!(results.iter().any(|r| r.chunk.name == "Setup"));

        let hits = keyword_matches(
            vec![VectorPoint {
                id: "p1".into(),
                vector: vec![1.0, 0.0],
                text: "Install the Zebra".into(),
                metadata: chunk("docs/a.md", "A", "Install the Zebra", Lang::Markdown)
                    .to_metadata(),
            }],
            &["zebra".to_owned()],
            &HashSet::new(),
            &[1.0, 0.0],
        );
        assert_eq!(hits.len(), 1);
        assert!(hits[0].keyword_only);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn hybrid_keyword_hits_beyond_overfetch_are_ranked() {
        let embedder = Arc::new(MockEmbedder::default());
        let store = Arc::new(InMemoryVectorStore::new());
        let metadata = Arc::new(InMemoryMetadataStore::new());
        metadata
            .upsert_repository(RepositoryRecord::new("repo", COLLECTION))
            .await
            .unwrap();
        store.create_collection(COLLECTION, 64).await.unwrap();

        let query = embedder.vector_for("zulu_marker");
        let free = query.iter().position(|x| x.abs() < f32::EPSILON).unwrap();
        let point = |c: &Chunk, vector: Vec<f32>| VectorPoint {
            id: c.id.clone(),
            vector,
            text: c.text.clone(),
            metadata: c.to_metadata(),
        };

        // 25 exact vector matches without the keyword fill the whole over-fetch.
        let mut points = Vec::new();
        for i in 0..25 {
            let c = chunk(
                &format!("src/f{i}.rs"),
                &format!("filler_{i}"),
                &format!("fn filler_{i}() {{}}\n"),
                Lang::Rust,
            );
            points.push(point(&c, query.clone()));
        }
        // 22 keyword matches, each a little further from the query.
        let mut keyword_ids = Vec::new();
        for i in 0..22u8 {
            let c = chunk(
                &format!("src/k{i}.rs"),
                &format!("k{i}"),
                &format!("// zulu_marker {i}\n"),
                Lang::Rust,
            );
            let mut v = query.clone();
            v[free] = 0.1 * f32::from(i + 1);
            keyword_ids.push(c.id.clone());
            points.push(point(&c, v));
        }
        store.upsert(COLLECTION, points).await.unwrap();

        let config = RetrievalConfig {
            hybrid: true,
            lambda: 0.3,
            ..RetrievalConfig::default()
        };
        let retriever = Retriever::new(embedder, store, metadata, config);
        let results = retriever.query("repo", "zulu_marker", 2, None).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(!results[0].keyword_only);
        assert!(results[0].chunk.name.starts_with("filler_"));
        assert!(results[1].keyword_only);
        // The least similar keyword hit wins the diversity pick; only the 20
        // best keyword hits are kept, so that is the 20th, not the 22nd.
        assert_eq!(results[1].chunk.id, keyword_ids[19]);
        let expected = 1.0 / (1.0f32 + 2.0 * 2.0).sqrt();
        assert!((results[1].similarity_score - expected).abs() < 1e-4);
    }

    #[tokio::test]
    async fn keyword_matches_skip_known_ids() {
        let c = chunk("a.py", "a", "def zebra():\n    pass\n", Lang::Python);
        let point = VectorPoint {
            id: c.id.clone(),
            vector: vec![0.0, 1.0],
            text: c.text.clone(),
            metadata: c.to_metadata(),
        };
        let known = HashSet::from([c.id.clone()]);
        assert!(keyword_matches(vec![point], &["zebra".into()], &known, &[1.0, 0.0]).is_empty());
    }

    #[tokio::test]
    async fn find_similar_excludes_exact_text() {
        let (retriever, _) = fixture(false).await;
        let code = "def logout(user):\n    session.clear()\n";
        let results = retriever.find_similar("repo", code, 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.chunk.name != "logout"));
        assert_eq!(results[0].final_rank, 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_error() {
        let embedder = Arc::new(MockEmbedder::new(8));
        let store = Arc::new(InMemoryVectorStore::new());
        let metadata = Arc::new(InMemoryMetadataStore::new());
        metadata
            .upsert_repository(RepositoryRecord::new("repo", COLLECTION))
            .await
            .unwrap();
        store.create_collection(COLLECTION, 16).await.unwrap();
        let retriever = Retriever::new(embedder, store, metadata, RetrievalConfig::default());
        let err = retriever.query("repo", "anything", 3, None).await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::VectorStore(coderag_store::VectorStoreError::DimensionMismatch { .. })
        ));
    }
}
