//! # Runtime Error Types
//!
//! Errors raised by the marketplace client, sandbox scanner, and rate
//! limiter — the operational surface around the core pipeline executor.
//! Kept separate from [`ragforge_core::CoreError`] so a caller can match on
//! "something about the plugin ecosystem went wrong" without also handling
//! stage/registry failures (mirrors the core/runtime error split).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("plugin package integrity check failed for {name}@{version}: {reason}")]
    IntegrityFailed {
        name: String,
        version: String,
        reason: String,
    },

    #[error("security scan rejected {name}@{version}: {findings:?}")]
    SecurityScanFailed {
        name: String,
        version: String,
        findings: Vec<String>,
    },

    #[error("{name}@{version} is not certified and certified-only mode is enabled")]
    NotCertified { name: String, version: String },

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("marketplace registry error: {message}")]
    Registry { message: String },

    #[error("marketplace client transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("sandboxed install timed out after {timeout_secs}s")]
    SandboxTimeout { timeout_secs: u64 },

    #[error("rating {rating} is out of range, must be 1..=5")]
    RatingOutOfRange { rating: u8 },

    #[error("invalid plugin package: {reason}")]
    InvalidPluginPackage { reason: String },

    #[error("local filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] ragforge_core::CoreError),
}
