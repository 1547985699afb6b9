use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_embedding();
        self.apply_env_overrides_storage();
        self.apply_env_overrides_engine();
    }

    fn apply_env_overrides_embedding(&mut self) {
        if let Ok(v) = std::env::var("CODERAG_EMBEDDING_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.embedding.provider = kind;
            } else {
                tracing::warn!("ignoring invalid CODERAG_EMBEDDING_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODERAG_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("CODERAG_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("CODERAG_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("CODERAG_EMBEDDING_DIMENSION") {
            match v.parse::<usize>() {
                Ok(n) => self.embedding.dimension = Some(n),
                Err(_) => tracing::warn!("ignoring invalid CODERAG_EMBEDDING_DIMENSION value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("CODERAG_EMBEDDING_BATCH_SIZE") {
            match v.parse::<usize>() {
                Ok(n) => self.embedding.batch_size = n,
                Err(_) => tracing::warn!("ignoring invalid CODERAG_EMBEDDING_BATCH_SIZE value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("CODERAG_EMBEDDING_TIMEOUT")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.embedding.timeout_secs = secs;
        }
    }

    fn apply_env_overrides_storage(&mut self) {
        if let Ok(v) = std::env::var("CODERAG_VECTOR_BACKEND") {
            if let Ok(backend) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.vector_store.backend = backend;
            } else {
                tracing::warn!("ignoring invalid CODERAG_VECTOR_BACKEND value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODERAG_QDRANT_URL") {
            self.vector_store.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("CODERAG_SQLITE_PATH") {
            self.metadata.sqlite_path = v;
        }
    }

    fn apply_env_overrides_engine(&mut self) {
        if let Ok(v) = std::env::var("CODERAG_INDEX_WORKERS") {
            match v.parse::<usize>() {
                Ok(n) => self.indexing.workers = n,
                Err(_) => tracing::warn!("ignoring invalid CODERAG_INDEX_WORKERS value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("CODERAG_INDEX_MAX_CHARS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.indexing.max_chars = n;
        }
        if let Ok(v) = std::env::var("CODERAG_INDEX_OVERLAP_CHARS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.indexing.overlap_chars = n;
        }
        if let Ok(v) = std::env::var("CODERAG_RETRIEVAL_K")
            && let Ok(k) = v.parse::<usize>()
        {
            self.retrieval.k = k;
        }
        if let Ok(v) = std::env::var("CODERAG_RETRIEVAL_LAMBDA") {
            match v.parse::<f32>() {
                Ok(lambda) => self.retrieval.lambda = lambda.clamp(0.0, 1.0),
                Err(_) => tracing::warn!("ignoring invalid CODERAG_RETRIEVAL_LAMBDA value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("CODERAG_RETRIEVAL_HYBRID")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.retrieval.hybrid = enabled;
        }
        if let Ok(v) = std::env::var("CODERAG_CONTEXT_BUDGET_CHARS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.retrieval.context_budget_chars = n;
        }
    }
}
