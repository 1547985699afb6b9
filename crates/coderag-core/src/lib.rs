//! Configuration loading and construction of the indexing engine from config.

pub mod bootstrap;
pub mod config;

pub use bootstrap::{Engine, build_embedder, build_metadata_store, build_vector_store};
pub use config::Config;
