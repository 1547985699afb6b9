use std::io::Write;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 17] = [
    "CODERAG_EMBEDDING_PROVIDER",
    "CODERAG_EMBEDDING_BASE_URL",
    "CODERAG_EMBEDDING_MODEL",
    "CODERAG_EMBEDDING_API_KEY",
    "CODERAG_EMBEDDING_DIMENSION",
    "CODERAG_EMBEDDING_BATCH_SIZE",
    "CODERAG_EMBEDDING_TIMEOUT",
    "CODERAG_VECTOR_BACKEND",
    "CODERAG_QDRANT_URL",
    "CODERAG_SQLITE_PATH",
    "CODERAG_INDEX_WORKERS",
    "CODERAG_INDEX_MAX_CHARS",
    "CODERAG_INDEX_OVERLAP_CHARS",
    "CODERAG_RETRIEVAL_K",
    "CODERAG_RETRIEVAL_LAMBDA",
    "CODERAG_RETRIEVAL_HYBRID",
    "CODERAG_CONTEXT_BUDGET_CHARS",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coderag.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, "{contents}").unwrap();
    (dir, path)
}

#[test]
fn defaults_when_file_missing() {
    let config = Config::default();
    assert_eq!(config.embedding.provider, EmbeddingProvider::Ollama);
    assert_eq!(config.embedding.base_url, "http://localhost:11434");
    assert_eq!(config.embedding.batch_size, 32);
    assert!(config.embedding.api_key.is_none());
    assert_eq!(config.vector_store.backend, VectorBackend::Qdrant);
    assert_eq!(config.vector_store.qdrant_url, "http://localhost:6334");
    assert_eq!(config.indexing.workers, 4);
    assert_eq!(config.indexing.max_chars, 4000);
    assert_eq!(config.indexing.overlap_chars, 200);
    assert_eq!(config.retrieval.k, 10);
    assert!((config.retrieval.lambda - 0.5).abs() < f32::EPSILON);
    assert!(!config.retrieval.hybrid);
    config.validate().unwrap();
}

#[test]
#[serial]
fn load_missing_file_uses_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.embedding.model, "nomic-embed-text");
    assert_eq!(config.metadata.sqlite_path, ".coderag/index.db");
}

#[test]
#[serial]
fn parse_valid_toml() {
    let (_dir, path) = write_config(
        r#"
[embedding]
provider = "openai"
base_url = "https://api.openai.com/v1"
model = "text-embedding-3-small"
api_key = "sk-test"
dimension = 1536

[vector_store]
backend = "memory"

[metadata]
sqlite_path = "./test.db"

[indexing]
workers = 8
max_chars = 2000
overlap_chars = 100

[retrieval]
k = 5
lambda = 0.7
hybrid = true
"#,
    );
    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.embedding.provider, EmbeddingProvider::OpenAi);
    assert_eq!(config.embedding.dimension, Some(1536));
    assert_eq!(config.embedding.timeout_secs, 60);
    assert_eq!(config.vector_store.backend, VectorBackend::Memory);
    assert_eq!(config.vector_store.upsert_batch_size, 100);
    assert_eq!(config.metadata.sqlite_path, "./test.db");
    assert_eq!(config.indexing.workers, 8);
    assert_eq!(config.retrieval.k, 5);
    assert!(config.retrieval.hybrid);
    assert_eq!(config.retrieval.context_budget_chars, 24_000);
    config.validate().unwrap();
}

#[test]
#[serial]
fn partial_sections_fill_defaults() {
    let (_dir, path) = write_config("[indexing]\nworkers = 2\n");
    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.indexing.workers, 2);
    assert_eq!(config.indexing.max_chars, 4000);
    assert_eq!(config.embedding.provider, EmbeddingProvider::Ollama);
}

#[test]
#[serial]
fn invalid_toml_is_an_error() {
    let (_dir, path) = write_config("[indexing\nworkers = ");
    clear_env();
    assert!(Config::load(&path).is_err());
}

#[test]
#[serial]
fn unknown_provider_is_an_error() {
    let (_dir, path) = write_config("[embedding]\nprovider = \"bert\"\n");
    clear_env();
    assert!(Config::load(&path).is_err());
}

#[test]
#[serial]
fn env_overrides() {
    clear_env();
    let mut config = Config::default();

    unsafe {
        std::env::set_var("CODERAG_EMBEDDING_MODEL", "mxbai-embed-large");
        std::env::set_var("CODERAG_VECTOR_BACKEND", "memory");
        std::env::set_var("CODERAG_INDEX_WORKERS", "16");
        std::env::set_var("CODERAG_RETRIEVAL_LAMBDA", "0.9");
        std::env::set_var("CODERAG_RETRIEVAL_HYBRID", "true");
    };
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.embedding.model, "mxbai-embed-large");
    assert_eq!(config.vector_store.backend, VectorBackend::Memory);
    assert_eq!(config.indexing.workers, 16);
    assert!((config.retrieval.lambda - 0.9).abs() < f32::EPSILON);
    assert!(config.retrieval.hybrid);
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    let mut config = Config::default();

    unsafe {
        std::env::set_var("CODERAG_EMBEDDING_PROVIDER", "bert");
        std::env::set_var("CODERAG_INDEX_WORKERS", "many");
        std::env::set_var("CODERAG_RETRIEVAL_LAMBDA", "high");
    };
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.embedding.provider, EmbeddingProvider::Ollama);
    assert_eq!(config.indexing.workers, 4);
    assert!((config.retrieval.lambda - 0.5).abs() < f32::EPSILON);
}

#[test]
#[serial]
fn env_lambda_is_clamped() {
    clear_env();
    let mut config = Config::default();
    unsafe { std::env::set_var("CODERAG_RETRIEVAL_LAMBDA", "3.5") };
    config.apply_env_overrides();
    clear_env();
    assert!((config.retrieval.lambda - 1.0).abs() < f32::EPSILON);
}

#[test]
#[serial]
fn env_overrides_file_values() {
    let (_dir, path) = write_config("[metadata]\nsqlite_path = \"from-file.db\"\n");
    clear_env();
    unsafe { std::env::set_var("CODERAG_SQLITE_PATH", "from-env.db") };
    let config = Config::load(&path).unwrap();
    clear_env();
    assert_eq!(config.metadata.sqlite_path, "from-env.db");
}

#[test]
fn validate_rejects_zero_workers() {
    let mut config = Config::default();
    config.indexing.workers = 0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("workers"));
}

#[test]
fn validate_rejects_zero_batch_sizes() {
    let mut config = Config::default();
    config.embedding.batch_size = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.vector_store.upsert_batch_size = 0;
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_lambda_out_of_range() {
    for lambda in [-0.1, 1.5, f32::NAN] {
        let mut config = Config::default();
        config.retrieval.lambda = lambda;
        assert!(config.validate().is_err(), "lambda {lambda} accepted");
    }
}

#[test]
fn validate_rejects_overlap_not_below_max() {
    let mut config = Config::default();
    config.indexing.max_chars = 1000;
    config.indexing.overlap_chars = 1000;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("overlap_chars"));
}

#[test]
fn validate_requires_openai_key() {
    let mut config = Config::default();
    config.embedding.provider = EmbeddingProvider::OpenAi;
    assert!(config.validate().is_err());
    config.embedding.api_key = Some("sk-test".into());
    config.validate().unwrap();
}

#[test]
fn debug_redacts_api_key() {
    let mut config = Config::default();
    config.embedding.api_key = Some("sk-very-secret".into());
    let debug = format!("{:?}", config.embedding);
    assert!(!debug.contains("sk-very-secret"));
    assert!(debug.contains("[REDACTED]"));
}

#[test]
#[serial]
fn shipped_default_config_is_valid() {
    clear_env();
    let path =
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/default.toml");
    let config = Config::load(&path).unwrap();
    assert_eq!(config.embedding.provider, EmbeddingProvider::Ollama);
    assert_eq!(config.retrieval.context_budget_chars, 24_000);
    config.validate().unwrap();
}
