//! # Error Handling Module
//!
//! Standardized error types for the pipeline executor, the plugin registry,
//! and the configuration normalizer.
//!
//! ## Overview
//!
//! Two enums carry the taxonomy:
//! - [`CoreError`] — the outer, user-facing error returned by every public
//!   operation in this crate.
//! - [`StageError`] — the narrower set of ingest/query stage failures that
//!   `CoreError::Stage` wraps, kept separate so callers can match on stage
//!   failures without also matching registry/cancellation variants.
//!
//! Retry is only ever attempted around [`CoreError::Transient`]; every other
//! variant is terminal at the layer that raised it.

use std::fmt;
use thiserror::Error;

/// Top-level error type for pipeline, registry, and configuration operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A required argument was missing or had the wrong shape.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// A plugin kind outside the closed set `{loader, embedder, retriever, llm, reranker}`.
    #[error("unknown plugin kind: {kind}")]
    UnknownKind { kind: String },

    /// No plugin registered under `(kind, name)`.
    #[error("plugin not found: {kind}/{name}")]
    PluginNotFound { kind: String, name: String },

    /// A plugin is missing one or more required methods for its kind.
    #[error("contract violation for {kind}/{name}: missing {missing:?}")]
    ContractViolation {
        kind: String,
        name: String,
        missing: Vec<String>,
    },

    /// A stage-level failure (load/chunk/embed/query/generate).
    #[error(transparent)]
    Stage(#[from] StageError),

    /// More than half of chunks failed to embed during parallel batching.
    #[error(
        "parallel embedding failed: {failed_chunks}/{total_chunks} chunks failed: {first_error}"
    )]
    ParallelEmbeddingFailed {
        failed_chunks: usize,
        total_chunks: usize,
        first_error: String,
    },

    /// A transient failure eligible for retry (network timeout, 5xx, plugin panic).
    #[error("transient error: {message}")]
    Transient { message: String },

    /// The operation was cancelled via its abort signal.
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration is malformed or inconsistent.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

/// Stage-level failures raised by [`crate::executor::PipelineExecutor`].
///
/// These are never retried by the layer that raises them — retry, if any,
/// happens around the individual plugin call that produced the underlying
/// condition, not around the post-hoc validation itself.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("loader produced zero documents")]
    LoadFailed,

    #[error("chunking produced zero chunks")]
    ChunkingFailed,

    #[error("embedder returned {got} vectors for {expected} chunks")]
    EmbeddingMismatch { expected: usize, got: usize },

    #[error("query embedding was empty")]
    QueryEmbeddingFailed,

    #[error("generation produced an empty response")]
    GenerationFailed,
}

impl CoreError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        CoreError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn unknown_kind(kind: impl fmt::Display) -> Self {
        CoreError::UnknownKind {
            kind: kind.to_string(),
        }
    }

    pub fn plugin_not_found(kind: impl fmt::Display, name: impl Into<String>) -> Self {
        CoreError::PluginNotFound {
            kind: kind.to_string(),
            name: name.into(),
        }
    }

    pub fn contract_violation(
        kind: impl fmt::Display,
        name: impl Into<String>,
        missing: Vec<String>,
    ) -> Self {
        CoreError::ContractViolation {
            kind: kind.to_string(),
            name: name.into(),
            missing,
        }
    }

    /// Whether the retry utility should attempt this error again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient { .. })
    }
}
