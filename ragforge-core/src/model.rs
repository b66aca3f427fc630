//! # Core Data Model
//!
//! The types that flow through ingest and query: [`Document`], [`Chunk`],
//! [`Vector`], [`ScoredChunk`], and the plugin/pipeline configuration shapes
//! [`PluginSpec`] and [`PipelineConfig`].
//!
//! Documents and chunks are transient per ingest invocation; plugins are
//! registered once and live for the process (see [`crate::registry`]).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The closed set of plugin kinds a pipeline can compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Loader,
    Embedder,
    Retriever,
    Llm,
    Reranker,
}

impl PluginKind {
    /// Canonical ordering used when projecting legacy config shapes (§4.2 rule 4).
    pub const CANONICAL_ORDER: [PluginKind; 5] = [
        PluginKind::Loader,
        PluginKind::Embedder,
        PluginKind::Retriever,
        PluginKind::Reranker,
        PluginKind::Llm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Loader => "loader",
            PluginKind::Embedder => "embedder",
            PluginKind::Retriever => "retriever",
            PluginKind::Llm => "llm",
            PluginKind::Reranker => "reranker",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PluginKind {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loader" => Ok(PluginKind::Loader),
            "embedder" => Ok(PluginKind::Embedder),
            "retriever" => Ok(PluginKind::Retriever),
            "llm" => Ok(PluginKind::Llm),
            "reranker" => Ok(PluginKind::Reranker),
            other => Err(crate::error::CoreError::unknown_kind(other)),
        }
    }
}

/// A loaded document, immutable after the loader produces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    /// Split this document into chunks using a naive fixed-size splitter.
    ///
    /// Loaders that implement the optional `chunk` method override this
    /// behavior entirely; this default is only used when a loader declares
    /// no `chunk` capability in its [`crate::contracts::PluginDescriptor`].
    pub fn chunk(&self, max_chars: usize) -> Vec<Chunk> {
        if self.content.is_empty() || max_chars == 0 {
            return Vec::new();
        }
        self.content
            .as_bytes()
            .chunks(max_chars)
            .map(|bytes| {
                let text = String::from_utf8_lossy(bytes).into_owned();
                Chunk {
                    text,
                    metadata: self.metadata.clone(),
                }
            })
            .collect()
    }
}

/// A bounded text segment produced from a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Chunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: HashMap::new(),
        }
    }
}

/// A fixed-length sequence of 32-bit floats produced by an embedder.
///
/// The "all vectors from one embedder instance share the same length"
/// invariant is enforced by the embedder wrapper in [`crate::executor`],
/// not by this type — a single `Vector` has no notion of what its sibling
/// vectors should look like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector(pub Vec<f32>);

impl Vector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A chunk paired with a relevance score. Higher is more relevant.
///
/// Order is producer-defined but must be stable for equal scores — callers
/// that need a deterministic order should sort with a stable sort keyed on
/// `score` plus a tiebreaker from `chunk`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// Where a plugin's implementation is sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginSource {
    Registry,
    Local,
    Git,
    Npm,
}

impl Default for PluginSource {
    fn default() -> Self {
        PluginSource::Registry
    }
}

fn default_version() -> String {
    "latest".to_string()
}

fn default_true() -> bool {
    true
}

/// The canonical object form of a plugin specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSpecObject {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub source: PluginSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl PluginSpecObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            source: PluginSource::Registry,
            url: None,
            path: None,
            config: None,
            enabled: true,
            fallback: None,
        }
    }
}

/// A plugin specification: either a bare name or the full object form.
///
/// `PluginSpec::Bare("pdf-loader")` is equivalent to
/// `PluginSpec::Full(PluginSpecObject { name: "pdf-loader", version: "latest",
/// source: Registry, .. })` — see [`PluginSpec::normalize`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginSpec {
    Bare(String),
    Full(PluginSpecObject),
}

impl PluginSpec {
    /// Project to the canonical object form.
    pub fn normalize(&self) -> PluginSpecObject {
        match self {
            PluginSpec::Bare(name) => PluginSpecObject::new(name.clone()),
            PluginSpec::Full(obj) => obj.clone(),
        }
    }
}

/// An ordered pipeline stage entry: `{stage, name, ...options}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStageEntry {
    pub stage: String,
    pub name: String,
    #[serde(flatten)]
    pub options: HashMap<String, serde_json::Value>,
}

/// Retry options attached to `pipeline.retries` in the canonical config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryOptions {
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub multiplier: Option<f64>,
    #[serde(default)]
    pub jitter: Option<bool>,
}

/// `pipeline` section of the canonical config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineSection {
    pub stages: Vec<PipelineStageEntry>,
    #[serde(default)]
    pub retries: RetryOptions,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// The canonical, normalized pipeline configuration (§3, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    pub namespace: String,
    /// `plugins[kind][name] = PluginSpec`, kind keyed by its string name.
    pub plugins: HashMap<String, HashMap<String, PluginSpecObject>>,
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub performance: serde_json::Value,
    #[serde(default)]
    pub observability: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Known top-level fields preserved verbatim (§4.2 rule 5).
    #[serde(default)]
    pub cache: serde_json::Value,
    #[serde(default)]
    pub limits: serde_json::Value,
    #[serde(default)]
    pub storage: serde_json::Value,
}

impl PipelineConfig {
    pub fn kind_plugins(&self, kind: PluginKind) -> Option<&HashMap<String, PluginSpecObject>> {
        self.plugins.get(kind.as_str())
    }
}
