//! Embedder contract, input preparation and batch orchestration.

use std::future::Future;
use std::time::Duration;

use crate::error::{EmbedError, Result};

pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_MAX_TOKENS: usize = 8191;
const CHARS_PER_TOKEN: usize = 4;

/// Converts text into fixed-dimension vectors.
///
/// Implementations must return exactly one vector per input, in input order,
/// and must be deterministic for identical input and model version.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// Model identifier; vectors from different models must not be mixed.
    fn model(&self) -> &str {
        self.name()
    }

    /// Output dimension when it is known without calling the model.
    fn dimension(&self) -> Option<usize> {
        None
    }

    /// Embed a batch of already prepared texts.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the batch or cannot be reached.
    fn embed_batch(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send;
}

/// Batching and preprocessing knobs shared by indexing and querying.
#[derive(Debug, Clone)]
pub struct EmbedOptions {
    pub batch_size: usize,
    pub max_tokens: usize,
    pub call_timeout: Duration,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_tokens: DEFAULT_MAX_TOKENS,
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// A single text that could not be embedded even on its own.
#[derive(Debug, Clone)]
pub struct EmbedFailure {
    pub index: usize,
    pub error: String,
}

/// Result of [`embed_all`]: one slot per input text.
#[derive(Debug, Default)]
pub struct BatchEmbedding {
    pub vectors: Vec<Option<Vec<f32>>>,
    pub failures: Vec<EmbedFailure>,
}

impl BatchEmbedding {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Unwrap into dense vectors, failing if any text was not embedded.
    ///
    /// # Errors
    ///
    /// Returns `EmbedError::BatchFailed` when at least one text failed.
    pub fn into_vectors(self) -> Result<Vec<Vec<f32>>> {
        let total = self.vectors.len();
        if !self.failures.is_empty() {
            return Err(EmbedError::BatchFailed {
                failed: self.failures.len(),
                total,
            });
        }
        self.vectors
            .into_iter()
            .map(|v| v.ok_or(EmbedError::BatchFailed { failed: 1, total }))
            .collect()
    }
}

/// Normalize text before embedding.
///
/// Trailing whitespace is stripped from every line, trailing blank lines are
/// dropped and the result is cut to `max_tokens * 4` characters.
#[must_use]
pub fn prepare_input(text: &str, max_tokens: usize) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    let kept = out.trim_end().len();
    out.truncate(kept);

    let limit = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    if let Some((idx, _)) = out.char_indices().nth(limit) {
        out.truncate(idx);
    }
    out
}

/// Embed every text, splitting failed batches in half down to single texts.
///
/// Never fails as a whole: texts that fail alone are reported in
/// [`BatchEmbedding::failures`] and their slot stays `None`.
pub async fn embed_all<E: Embedder>(
    embedder: &E,
    texts: &[String],
    opts: &EmbedOptions,
) -> BatchEmbedding {
    let prepared: Vec<String> = texts
        .iter()
        .map(|t| prepare_input(t, opts.max_tokens))
        .collect();
    let total = prepared.len();
    let batch_size = opts.batch_size.max(1);

    let mut vectors: Vec<Option<Vec<f32>>> = vec![None; total];
    let mut failures = Vec::new();

    // Spans are popped from the back, so push them in reverse input order.
    let mut pending: Vec<(usize, usize)> = (0..total)
        .step_by(batch_size)
        .map(|start| (start, batch_size.min(total - start)))
        .rev()
        .collect();

    while let Some((start, len)) = pending.pop() {
        let batch = &prepared[start..start + len];
        match call_with_timeout(embedder, batch, opts.call_timeout).await {
            Ok(batch_vectors) => {
                for (offset, vector) in batch_vectors.into_iter().enumerate() {
                    vectors[start + offset] = Some(vector);
                }
            }
            Err(e) if len > 1 => {
                let half = len / 2;
                tracing::warn!(
                    provider = embedder.name(),
                    start,
                    len,
                    "embedding batch failed, retrying at half size: {e}"
                );
                pending.push((start + half, len - half));
                pending.push((start, half));
            }
            Err(e) => {
                tracing::warn!(
                    provider = embedder.name(),
                    index = start,
                    "text could not be embedded: {e}"
                );
                failures.push(EmbedFailure {
                    index: start,
                    error: e.to_string(),
                });
            }
        }
    }

    BatchEmbedding { vectors, failures }
}

/// Embed a single query string with the same preparation as indexed chunks.
///
/// # Errors
///
/// Returns an error if the backend fails, times out or returns nothing.
pub async fn embed_query<E: Embedder>(
    embedder: &E,
    text: &str,
    opts: &EmbedOptions,
) -> Result<Vec<f32>> {
    let prepared = vec![prepare_input(text, opts.max_tokens)];
    let mut vectors = call_with_timeout(embedder, &prepared, opts.call_timeout).await?;
    vectors.pop().ok_or(EmbedError::EmptyResponse { provider: "query" })
}

async fn call_with_timeout<E: Embedder>(
    embedder: &E,
    batch: &[String],
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    let vectors = tokio::time::timeout(timeout, embedder.embed_batch(batch))
        .await
        .map_err(|_| EmbedError::Timeout(timeout))??;
    if vectors.len() != batch.len() {
        return Err(EmbedError::CountMismatch {
            expected: batch.len(),
            actual: vectors.len(),
        });
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Fails any batch larger than `max_ok` and any batch containing `poison`.
    struct FlakyEmbedder {
        max_ok: usize,
        poison: Option<&'static str>,
        calls: Mutex<Vec<usize>>,
    }

    impl FlakyEmbedder {
        fn new(max_ok: usize) -> Self {
            Self {
                max_ok,
                poison: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Embedder for FlakyEmbedder {
        #[allow(clippy::unnecessary_literal_bound)]
        fn name(&self) -> &str {
            "flaky"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.lock().unwrap().push(texts.len());
            if texts.len() > self.max_ok {
                return Err(EmbedError::Other("batch too large".into()));
            }
            if let Some(p) = self.poison
                && texts.iter().any(|t| t == p)
            {
                return Err(EmbedError::Other("poisoned".into()));
            }
            #[allow(clippy::cast_precision_loss)]
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| "x".repeat(i + 1)).collect()
    }

    #[test]
    fn prepare_strips_trailing_whitespace_per_line() {
        let out = prepare_input("fn a() {   \n    body\t\n}\n\n\n", 100);
        assert_eq!(out, "fn a() {\n    body\n}");
    }

    #[test]
    fn prepare_truncates_to_token_budget() {
        let out = prepare_input(&"a".repeat(100), 5);
        assert_eq!(out.len(), 20);
    }

    #[test]
    fn prepare_truncates_on_char_boundary() {
        let out = prepare_input(&"é".repeat(50), 2);
        assert_eq!(out.chars().count(), 8);
    }

    #[tokio::test]
    async fn embed_all_batches_by_size() {
        let embedder = FlakyEmbedder::new(usize::MAX);
        let opts = EmbedOptions {
            batch_size: 4,
            ..EmbedOptions::default()
        };
        let result = embed_all(&embedder, &texts(10), &opts).await;
        assert!(result.is_complete());
        assert_eq!(*embedder.calls.lock().unwrap(), vec![4, 4, 2]);
        let vectors = result.into_vectors().unwrap();
        assert_eq!(vectors.len(), 10);
        assert!((vectors[9][0] - 10.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn failed_batch_is_halved() {
        let embedder = FlakyEmbedder::new(2);
        let opts = EmbedOptions {
            batch_size: 8,
            ..EmbedOptions::default()
        };
        let result = embed_all(&embedder, &texts(8), &opts).await;
        assert!(result.is_complete());
        assert_eq!(
            *embedder.calls.lock().unwrap(),
            vec![8, 4, 2, 2, 4, 2, 2]
        );
        let vectors = result.into_vectors().unwrap();
        for (i, v) in vectors.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let expected = (i + 1) as f32;
            assert!((v[0] - expected).abs() < f32::EPSILON);
        }
    }

    #[tokio::test]
    async fn single_bad_text_is_isolated() {
        let mut embedder = FlakyEmbedder::new(usize::MAX);
        embedder.poison = Some("xxx");
        let opts = EmbedOptions {
            batch_size: 4,
            ..EmbedOptions::default()
        };
        let result = embed_all(&embedder, &texts(4), &opts).await;
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].index, 2);
        assert!(result.vectors[0].is_some());
        assert!(result.vectors[1].is_some());
        assert!(result.vectors[2].is_none());
        assert!(result.vectors[3].is_some());
        assert!(matches!(
            result.into_vectors(),
            Err(EmbedError::BatchFailed {
                failed: 1,
                total: 4
            })
        ));
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let embedder = FlakyEmbedder::new(1);
        let result = embed_all(&embedder, &[], &EmbedOptions::default()).await;
        assert!(result.vectors.is_empty());
        assert!(embedder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn embed_query_returns_single_vector() {
        let embedder = FlakyEmbedder::new(1);
        let v = embed_query(&embedder, "abc  \n", &EmbedOptions::default())
            .await
            .unwrap();
        assert!((v[0] - 3.0).abs() < f32::EPSILON);
    }

    struct SlowEmbedder;

    impl Embedder for SlowEmbedder {
        #[allow(clippy::unnecessary_literal_bound)]
        fn name(&self) -> &str {
            "slow"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(texts.iter().map(|_| vec![0.0]).collect())
        }
    }

    #[tokio::test]
    async fn timeout_marks_text_failed() {
        let opts = EmbedOptions {
            batch_size: 1,
            call_timeout: Duration::from_millis(10),
            ..EmbedOptions::default()
        };
        let result = embed_all(&SlowEmbedder, &texts(1), &opts).await;
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].error.contains("timed out"));
    }
}
