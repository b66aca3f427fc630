//! # ragforge-core
//!
//! Plugin registry, configuration normalizer, batching, retry, and pipeline
//! executor for a RAG (retrieval-augmented-generation) runtime composed
//! entirely of plugins: loaders, embedders, retrievers, rerankers, and LLMs.
//!
//! ## Overview
//!
//! - [`model`] — the data types that flow through ingest and query, and the
//!   canonical pipeline configuration shape.
//! - [`contracts`] — required/optional method sets per plugin kind, and the
//!   structural descriptor plugins self-report at registration.
//! - [`registry`] — the concurrent, contract-validating plugin store.
//! - [`config`] — normalizes legacy and enhanced `.ragrc.json` shapes into
//!   one canonical [`model::PipelineConfig`], and resolves plugin versions.
//! - [`retry`] — a single backoff-and-retry utility used around any
//!   operation that can raise [`error::CoreError::Transient`].
//! - [`batching`] — parallel and token-budgeted batch embedding.
//! - [`executor`] — drives ingest and query across the configured pipeline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ragforge_core::config::Normalizer;
//! use ragforge_core::executor::{NullObserver, PipelineExecutor};
//! use ragforge_core::registry::PluginRegistry;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), ragforge_core::error::CoreError> {
//! let config_json = serde_json::json!({
//!     "plugins": { "loader": { "main": "fs-loader" } },
//!     "pipeline": { "stages": [{ "stage": "loader", "name": "main" }] }
//! });
//! let config = Normalizer::normalize(&config_json)?;
//! let registry = Arc::new(PluginRegistry::new());
//! let executor = PipelineExecutor::new(registry, config, Arc::new(NullObserver));
//! let cancel = CancellationToken::new();
//! let _ = executor.ingest("/tmp/docs", &cancel).await;
//! # Ok(())
//! # }
//! ```

pub mod batching;
pub mod config;
pub mod contracts;
pub mod error;
pub mod executor;
pub mod model;
pub mod registry;
pub mod retry;

pub use error::CoreError;
pub use model::{Chunk, Document, PipelineConfig, PluginKind, ScoredChunk, Vector};
pub use registry::PluginRegistry;
