//! Deterministic embedder for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::embedder::Embedder;
use crate::error::{EmbedError, Result};

/// Hashes character trigrams into a fixed number of buckets and L2-normalizes.
///
/// Texts sharing many trigrams get similar vectors, which is enough to make
/// ranking and diversity behave sensibly in tests.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dimension: usize,
    model: String,
    calls: Arc<AtomicUsize>,
    texts_embedded: Arc<AtomicUsize>,
    failing: Arc<Mutex<HashSet<String>>>,
    fail_all: bool,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            model: "trigram".into(),
            calls: Arc::new(AtomicUsize::new(0)),
            texts_embedded: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(Mutex::new(HashSet::new())),
            fail_all: false,
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    /// Report a different model name; the vectors are unchanged.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Any batch containing a text that includes `needle` fails.
    pub fn fail_on(&self, needle: &str) {
        if let Ok(mut set) = self.failing.lock() {
            set.insert(needle.to_owned());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut set) = self.failing.lock() {
            set.clear();
        }
    }

    /// Number of `embed_batch` calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of texts successfully embedded so far.
    #[must_use]
    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        if chars.is_empty() {
            v[0] = 1.0;
            return v;
        }
        for window in chars.windows(3.min(chars.len())) {
            let gram: String = window.iter().collect();
            let hash = blake3::hash(gram.as_bytes());
            let bytes = hash.as_bytes();
            let bucket = usize::from(u16::from_le_bytes([bytes[0], bytes[1]])) % self.dimension;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Embedder for MockEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all {
            return Err(EmbedError::Other("mock embedder failure".into()));
        }
        let poisoned = self
            .failing
            .lock()
            .map(|set| {
                texts
                    .iter()
                    .any(|t| set.iter().any(|needle| t.contains(needle.as_str())))
            })
            .unwrap_or(false);
        if poisoned {
            return Err(EmbedError::Other("mock embedder rejected batch".into()));
        }
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}
