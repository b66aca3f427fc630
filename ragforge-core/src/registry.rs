//! # Plugin Registry & Contract Validator
//!
//! Stores plugins indexed by `(kind, name)` and rejects registrations that
//! violate the kind's contract. Fail-fast at registration prevents a
//! pipeline from composing then crashing at first use (§4.1).
//!
//! Two registration paths exist:
//! - [`PluginRegistry::register_loader`] / `register_embedder` / … — the
//!   common, statically-typed path. Callers implement [`LoaderPlugin`] etc.
//!   and the compiler guarantees the required methods exist.
//! - [`PluginRegistry::register_descriptor`] — the structural, duck-typed
//!   path used for dynamically composed plugins (and exercised directly by
//!   the contract tests below), where a caller self-reports a method set
//!   that may or may not satisfy the contract.

use crate::contracts::{PluginContract, PluginDescriptor};
use crate::error::CoreError;
use crate::model::{Chunk, Document, ScoredChunk, Vector};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

/// Loader plugin: `load(path) -> Document[]`, optionally `chunk(doc)`.
#[async_trait]
pub trait LoaderPlugin: Send + Sync {
    async fn load(&self, path: &str) -> Result<Vec<Document>, CoreError>;

    /// Optional: custom chunking. Default reports unsupported; callers fall
    /// back to [`Document::chunk`].
    fn supports_chunk(&self) -> bool {
        false
    }

    async fn chunk(&self, doc: &Document) -> Result<Vec<Chunk>, CoreError> {
        Ok(doc.chunk(1000))
    }
}

/// Embedder plugin: `embed(chunks) -> Vector[]`, `embedQuery(text) -> Vector`.
#[async_trait]
pub trait EmbedderPlugin: Send + Sync {
    async fn embed(&self, chunks: &[Chunk]) -> Result<Vec<Vector>, CoreError>;
    async fn embed_query(&self, text: &str) -> Result<Vector, CoreError>;

    fn supports_dimensions(&self) -> bool {
        false
    }

    fn dimensions(&self) -> Option<usize> {
        None
    }
}

/// Retriever plugin: `store(vectors)`, `retrieve(queryVector) -> ScoredChunk[]`.
#[async_trait]
pub trait RetrieverPlugin: Send + Sync {
    async fn store(&self, chunks: &[Chunk], vectors: &[Vector]) -> Result<(), CoreError>;
    async fn retrieve(&self, query: &Vector) -> Result<Vec<ScoredChunk>, CoreError>;

    fn supports_delete(&self) -> bool {
        false
    }

    async fn delete(&self, _ids: &[String]) -> Result<(), CoreError> {
        Ok(())
    }
}

/// LLM plugin: `generate(prompt, context) -> string`, optional streaming.
#[async_trait]
pub trait LlmPlugin: Send + Sync {
    async fn generate(&self, prompt: &str, context: &[ScoredChunk]) -> Result<String, CoreError>;

    fn supports_generate_stream(&self) -> bool {
        false
    }
}

/// Reranker plugin: `rerank(query, chunks) -> ScoredChunk[]`.
#[async_trait]
pub trait RerankerPlugin: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        chunks: Vec<ScoredChunk>,
    ) -> Result<Vec<ScoredChunk>, CoreError>;
}

/// A plugin as stored in the registry: either a typed trait object built
/// through the common registration path, or a bare structural descriptor
/// registered through the duck-typed path.
pub enum RegisteredPlugin {
    Loader(Arc<dyn LoaderPlugin>),
    Embedder(Arc<dyn EmbedderPlugin>),
    Retriever(Arc<dyn RetrieverPlugin>),
    Llm(Arc<dyn LlmPlugin>),
    Reranker(Arc<dyn RerankerPlugin>),
    Described(PluginDescriptor),
}

impl RegisteredPlugin {
    pub fn as_loader(&self) -> Option<Arc<dyn LoaderPlugin>> {
        match self {
            RegisteredPlugin::Loader(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_embedder(&self) -> Option<Arc<dyn EmbedderPlugin>> {
        match self {
            RegisteredPlugin::Embedder(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_retriever(&self) -> Option<Arc<dyn RetrieverPlugin>> {
        match self {
            RegisteredPlugin::Retriever(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_llm(&self) -> Option<Arc<dyn LlmPlugin>> {
        match self {
            RegisteredPlugin::Llm(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_reranker(&self) -> Option<Arc<dyn RerankerPlugin>> {
        match self {
            RegisteredPlugin::Reranker(p) => Some(p.clone()),
            _ => None,
        }
    }
}

fn declared_methods_for(kind: crate::model::PluginKind, optional_present: &[&'static str]) -> PluginDescriptor {
    let contract = PluginContract::for_kind(kind);
    let mut methods: HashSet<&'static str> = contract.required.iter().copied().collect();
    methods.extend(optional_present.iter().copied());
    PluginDescriptor::new(kind, methods)
}

/// Type-indexed, structurally-validated plugin store.
///
/// Read-mostly after startup: registration (`register_*`) is the only
/// mutating path and is serialized by `DashMap`'s per-shard locking; lookups
/// (`get_*`, `list`) are lock-free reads.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: DashMap<(crate::model::PluginKind, String), RegisteredPlugin>,
}

use crate::model::PluginKind;

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: DashMap::new(),
        }
    }

    fn insert_validated(
        &self,
        kind: PluginKind,
        name: &str,
        descriptor: PluginDescriptor,
        plugin: RegisteredPlugin,
    ) -> Result<(), CoreError> {
        let missing = descriptor.validate();
        if !missing.is_empty() {
            return Err(CoreError::contract_violation(kind, name, missing));
        }
        self.plugins.insert((kind, name.to_string()), plugin);
        Ok(())
    }

    /// The duck-typed structural path: register a plugin described only by
    /// the method names it claims to provide, with no backing callable.
    /// Used for contract validation scenarios and for plugins whose loading
    /// mechanics live outside this crate (§6 "Plugin ABI").
    pub fn register_descriptor(
        &self,
        kind: PluginKind,
        name: &str,
        descriptor: PluginDescriptor,
    ) -> Result<(), CoreError> {
        self.insert_validated(
            kind,
            name,
            descriptor.clone(),
            RegisteredPlugin::Described(descriptor),
        )
    }

    pub fn register_loader(&self, name: &str, plugin: Arc<dyn LoaderPlugin>) -> Result<(), CoreError> {
        let optional: &[&'static str] = if plugin.supports_chunk() { &["chunk"] } else { &[] };
        let descriptor = declared_methods_for(PluginKind::Loader, optional);
        self.insert_validated(PluginKind::Loader, name, descriptor, RegisteredPlugin::Loader(plugin))
    }

    pub fn register_embedder(
        &self,
        name: &str,
        plugin: Arc<dyn EmbedderPlugin>,
    ) -> Result<(), CoreError> {
        let optional: &[&'static str] = if plugin.supports_dimensions() {
            &["dimensions"]
        } else {
            &[]
        };
        let descriptor = declared_methods_for(PluginKind::Embedder, optional);
        self.insert_validated(
            PluginKind::Embedder,
            name,
            descriptor,
            RegisteredPlugin::Embedder(plugin),
        )
    }

    pub fn register_retriever(
        &self,
        name: &str,
        plugin: Arc<dyn RetrieverPlugin>,
    ) -> Result<(), CoreError> {
        let optional: &[&'static str] = if plugin.supports_delete() { &["delete"] } else { &[] };
        let descriptor = declared_methods_for(PluginKind::Retriever, optional);
        self.insert_validated(
            PluginKind::Retriever,
            name,
            descriptor,
            RegisteredPlugin::Retriever(plugin),
        )
    }

    pub fn register_llm(&self, name: &str, plugin: Arc<dyn LlmPlugin>) -> Result<(), CoreError> {
        let optional: &[&'static str] = if plugin.supports_generate_stream() {
            &["generate_stream"]
        } else {
            &[]
        };
        let descriptor = declared_methods_for(PluginKind::Llm, optional);
        self.insert_validated(PluginKind::Llm, name, descriptor, RegisteredPlugin::Llm(plugin))
    }

    pub fn register_reranker(
        &self,
        name: &str,
        plugin: Arc<dyn RerankerPlugin>,
    ) -> Result<(), CoreError> {
        let descriptor = declared_methods_for(PluginKind::Reranker, &[]);
        self.insert_validated(
            PluginKind::Reranker,
            name,
            descriptor,
            RegisteredPlugin::Reranker(plugin),
        )
    }

    pub fn get(&self, kind: PluginKind, name: &str) -> Result<RegisteredPluginRef, CoreError> {
        self.plugins
            .get(&(kind, name.to_string()))
            .map(|entry| RegisteredPluginRef::clone_from(entry.value()))
            .ok_or_else(|| CoreError::plugin_not_found(kind, name))
    }

    pub fn list(&self, kind: PluginKind) -> Vec<String> {
        self.plugins
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .map(|entry| entry.key().1.clone())
            .collect()
    }

    pub fn contains(&self, kind: PluginKind, name: &str) -> bool {
        self.plugins.contains_key(&(kind, name.to_string()))
    }
}

/// A cheaply-cloneable handle to a registered plugin, returned by `get`.
///
/// `DashMap` references can't outlive the guard they came from; this clones
/// the `Arc`/descriptor out so callers can hold it across `.await` points.
#[derive(Clone)]
pub enum RegisteredPluginRef {
    Loader(Arc<dyn LoaderPlugin>),
    Embedder(Arc<dyn EmbedderPlugin>),
    Retriever(Arc<dyn RetrieverPlugin>),
    Llm(Arc<dyn LlmPlugin>),
    Reranker(Arc<dyn RerankerPlugin>),
    Described(PluginDescriptor),
}

impl RegisteredPluginRef {
    fn clone_from(p: &RegisteredPlugin) -> Self {
        match p {
            RegisteredPlugin::Loader(x) => RegisteredPluginRef::Loader(x.clone()),
            RegisteredPlugin::Embedder(x) => RegisteredPluginRef::Embedder(x.clone()),
            RegisteredPlugin::Retriever(x) => RegisteredPluginRef::Retriever(x.clone()),
            RegisteredPlugin::Llm(x) => RegisteredPluginRef::Llm(x.clone()),
            RegisteredPlugin::Reranker(x) => RegisteredPluginRef::Reranker(x.clone()),
            RegisteredPlugin::Described(d) => RegisteredPluginRef::Described(d.clone()),
        }
    }

    pub fn as_loader(&self) -> Option<Arc<dyn LoaderPlugin>> {
        match self {
            RegisteredPluginRef::Loader(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_embedder(&self) -> Option<Arc<dyn EmbedderPlugin>> {
        match self {
            RegisteredPluginRef::Embedder(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_retriever(&self) -> Option<Arc<dyn RetrieverPlugin>> {
        match self {
            RegisteredPluginRef::Retriever(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_llm(&self) -> Option<Arc<dyn LlmPlugin>> {
        match self {
            RegisteredPluginRef::Llm(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_reranker(&self) -> Option<Arc<dyn RerankerPlugin>> {
        match self {
            RegisteredPluginRef::Reranker(p) => Some(p.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FnLoader;

    #[async_trait]
    impl LoaderPlugin for FnLoader {
        async fn load(&self, path: &str) -> Result<Vec<Document>, CoreError> {
            Ok(vec![Document::new("doc-1", format!("contents of {path}"))])
        }
    }

    #[test]
    fn register_and_get_last_write_wins() {
        let registry = PluginRegistry::new();
        registry
            .register_loader("pdf", Arc::new(FnLoader))
            .unwrap();
        assert!(registry.get(PluginKind::Loader, "pdf").is_ok());

        // overwrite with another instance — last write wins, no error
        registry
            .register_loader("pdf", Arc::new(FnLoader))
            .unwrap();
        assert!(registry.get(PluginKind::Loader, "pdf").is_ok());
    }

    #[test]
    fn registering_loader_with_no_load_method_is_a_contract_violation() {
        let registry = PluginRegistry::new();
        let descriptor = PluginDescriptor::new(PluginKind::Loader, []);
        let err = registry
            .register_descriptor(PluginKind::Loader, "bad", descriptor)
            .unwrap_err();
        match err {
            CoreError::ContractViolation { missing, .. } => {
                assert_eq!(missing, vec!["load".to_string()]);
            }
            other => panic!("expected ContractViolation, got {other:?}"),
        }
        assert!(!registry.contains(PluginKind::Loader, "bad"));
    }

    #[test]
    fn registering_loader_with_load_method_succeeds() {
        let registry = PluginRegistry::new();
        let descriptor = PluginDescriptor::new(PluginKind::Loader, ["load"]);
        assert!(registry
            .register_descriptor(PluginKind::Loader, "pdf", descriptor)
            .is_ok());
    }

    #[test]
    fn get_unknown_name_is_plugin_not_found() {
        let registry = PluginRegistry::new();
        let err = registry.get(PluginKind::Loader, "missing").unwrap_err();
        assert!(matches!(err, CoreError::PluginNotFound { .. }));
    }

    #[test]
    fn list_returns_only_names_for_that_kind() {
        let registry = PluginRegistry::new();
        registry.register_loader("a", Arc::new(FnLoader)).unwrap();
        registry
            .register_descriptor(
                PluginKind::Embedder,
                "b",
                PluginDescriptor::new(PluginKind::Embedder, ["embed", "embed_query"]),
            )
            .unwrap();
        assert_eq!(registry.list(PluginKind::Loader), vec!["a".to_string()]);
        assert_eq!(registry.list(PluginKind::Embedder), vec!["b".to_string()]);
    }
}
