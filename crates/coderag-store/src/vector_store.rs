use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Payload key under which chunk text is stored next to the metadata.
pub const TEXT_FIELD: &str = "text";

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("scroll error: {0}")]
    Scroll(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("collection {0} not found")]
    NotFound(String),
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: u64, actual: u64 },
}

impl VectorStoreError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Timeout(_)
                | Self::Upsert(_)
                | Self::Query(_)
                | Self::Delete(_)
                | Self::Scroll(_)
        )
    }
}

/// Scalar metadata value. Nested values are not representable on purpose so
/// every backend can store and filter on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
    Bool(bool),
}

impl FieldValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

pub type Metadata = HashMap<String, FieldValue>;

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub must: Vec<FieldCondition>,
    pub must_not: Vec<FieldCondition>,
}

impl VectorFilter {
    /// Filter matching a single field equality.
    #[must_use]
    pub fn field(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::default().and(field, value)
    }

    #[must_use]
    pub fn and(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.must.push(FieldCondition {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn and_not(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.must_not.push(FieldCondition {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }

    /// Evaluate the filter against a metadata map.
    #[must_use]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.must
            .iter()
            .all(|c| metadata.get(&c.field) == Some(&c.value))
            && !self
                .must_not
                .iter()
                .any(|c| metadata.get(&c.field) == Some(&c.value))
    }
}

#[derive(Debug, Clone)]
pub struct FieldCondition {
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone)]
pub enum DeleteSelector {
    Ids(Vec<String>),
    Filter(VectorFilter),
}

#[derive(Debug, Clone)]
pub struct ScoredVectorPoint {
    pub id: String,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
    pub text: String,
    pub metadata: Metadata,
    pub vector: Option<Vec<f32>>,
}

impl ScoredVectorPoint {
    /// Cosine distance, `1 - score`.
    #[must_use]
    pub fn distance(&self) -> f32 {
        1.0 - self.score
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionStats {
    pub count: u64,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait VectorStore: Send + Sync {
    /// Create the collection if missing. Idempotent for the same dimension.
    fn create_collection(
        &self,
        collection: &str,
        dimension: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn drop_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Nearest neighbours by cosine similarity, best first, with stored vectors.
    fn query(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    fn delete(
        &self,
        collection: &str,
        selector: DeleteSelector,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn stats(&self, collection: &str) -> BoxFuture<'_, Result<CollectionStats, VectorStoreError>>;

    /// Every stored point matching `filter`, with vectors.
    fn scroll(
        &self,
        collection: &str,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<VectorPoint>, VectorStoreError>>;
}

#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Retry and batching policy for store writes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub batch_size: usize,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            base_backoff: Duration::from_millis(200),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_backoff
            .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .unwrap_or(Duration::from_secs(60))
            .min(Duration::from_secs(60))
    }
}

/// Run `f` with a timeout, retrying transient failures with exponential backoff.
///
/// # Errors
///
/// Returns the first permanent error, or the last transient one once retries
/// are exhausted.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<T, VectorStoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VectorStoreError>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.call_timeout, f()).await {
            Ok(r) => r,
            Err(_) => Err(VectorStoreError::Timeout(policy.call_timeout)),
        };
        match result {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "vector store call failed, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Upsert `points` in bounded batches, retrying each batch on transient errors.
///
/// Returns the number of points written.
///
/// # Errors
///
/// Returns the error of the first batch that could not be written.
pub async fn upsert_batched(
    store: &dyn VectorStore,
    collection: &str,
    points: Vec<VectorPoint>,
    policy: &RetryPolicy,
) -> Result<usize, VectorStoreError> {
    let batch_size = policy.batch_size.max(1);
    let mut written = 0;
    for batch in points.chunks(batch_size) {
        retry_transient(policy, "upsert", || store.upsert(collection, batch.to_vec())).await?;
        written += batch.len();
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            batch_size: 2,
            max_retries: 2,
            base_backoff: Duration::from_millis(1),
            call_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn transient_classification() {
        assert!(VectorStoreError::Connection("x".into()).is_transient());
        assert!(VectorStoreError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!VectorStoreError::NotFound("c".into()).is_transient());
        assert!(
            !VectorStoreError::DimensionMismatch {
                expected: 3,
                actual: 4
            }
            .is_transient()
        );
        assert!(!VectorStoreError::Serialization("bad".into()).is_transient());
    }

    #[test]
    fn filter_matches_must_and_must_not() {
        let meta: Metadata = HashMap::from([
            ("file_path".into(), FieldValue::from("src/a.rs")),
            ("is_uncommitted".into(), FieldValue::from(false)),
        ]);
        assert!(VectorFilter::field("file_path", "src/a.rs").matches(&meta));
        assert!(!VectorFilter::field("file_path", "src/b.rs").matches(&meta));
        assert!(
            !VectorFilter::field("file_path", "src/a.rs")
                .and_not("is_uncommitted", false)
                .matches(&meta)
        );
        assert!(VectorFilter::default().matches(&meta));
    }

    #[test]
    fn cosine_handles_mismatch_and_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn retry_recovers_from_transient() {
        let attempts = AtomicU32::new(0);
        let result = retry_transient(&fast_policy(), "test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(VectorStoreError::Connection("down".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient(&fast_policy(), "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(VectorStoreError::Upsert("flaky".into())) }
        })
        .await;
        assert!(matches!(result, Err(VectorStoreError::Upsert(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient(&fast_policy(), "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(VectorStoreError::NotFound("c".into())) }
        })
        .await;
        assert!(matches!(result, Err(VectorStoreError::NotFound(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let policy = RetryPolicy {
            max_retries: 0,
            call_timeout: Duration::from_millis(5),
            ..fast_policy()
        };
        let result: Result<(), _> = retry_transient(&policy, "test", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(VectorStoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn upsert_batched_splits_batches() {
        let store = crate::InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        let points: Vec<VectorPoint> = (0..5)
            .map(|i| VectorPoint {
                id: format!("p{i}"),
                vector: vec![1.0, 0.0],
                text: String::new(),
                metadata: Metadata::new(),
            })
            .collect();
        let written = upsert_batched(&store, "c", points, &fast_policy())
            .await
            .unwrap();
        assert_eq!(written, 5);
        assert_eq!(store.stats("c").await.unwrap().count, 5);
    }

    struct RecordingStore {
        batches: Mutex<Vec<usize>>,
    }

    impl VectorStore for RecordingStore {
        fn create_collection(&self, _: &str, _: u64) -> BoxFuture<'_, Result<(), VectorStoreError>> {
            Box::pin(async { Ok(()) })
        }
        fn collection_exists(&self, _: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
            Box::pin(async { Ok(true) })
        }
        fn drop_collection(&self, _: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
            Box::pin(async { Ok(()) })
        }
        fn upsert(
            &self,
            _: &str,
            points: Vec<VectorPoint>,
        ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
            self.batches.lock().unwrap().push(points.len());
            Box::pin(async { Ok(()) })
        }
        fn query(
            &self,
            _: &str,
            _: Vec<f32>,
            _: u64,
            _: Option<VectorFilter>,
        ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
            Box::pin(async { Ok(vec![]) })
        }
        fn delete(&self, _: &str, _: DeleteSelector) -> BoxFuture<'_, Result<(), VectorStoreError>> {
            Box::pin(async { Ok(()) })
        }
        fn stats(&self, _: &str) -> BoxFuture<'_, Result<CollectionStats, VectorStoreError>> {
            Box::pin(async { Ok(CollectionStats::default()) })
        }
        fn scroll(
            &self,
            _: &str,
            _: Option<VectorFilter>,
        ) -> BoxFuture<'_, Result<Vec<VectorPoint>, VectorStoreError>> {
            Box::pin(async { Ok(vec![]) })
        }
    }

    #[tokio::test]
    async fn default_batch_size_is_hundred() {
        let store = RecordingStore {
            batches: Mutex::new(Vec::new()),
        };
        let points: Vec<VectorPoint> = (0..250)
            .map(|i| VectorPoint {
                id: i.to_string(),
                vector: vec![0.0],
                text: String::new(),
                metadata: Metadata::new(),
            })
            .collect();
        upsert_batched(&store, "c", points, &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(*store.batches.lock().unwrap(), vec![100, 100, 50]);
    }

    proptest::proptest! {
        #[test]
        fn cosine_stays_in_range(
            a in proptest::collection::vec(-100.0f32..100.0, 1..16),
            b in proptest::collection::vec(-100.0f32..100.0, 1..16),
        ) {
            let s = cosine_similarity(&a, &b);
            proptest::prop_assert!((-1.0001..=1.0001).contains(&s));
        }
    }
}
