//! # Plugin Contracts
//!
//! The required/optional method sets per [`PluginKind`], and the structural
//! [`PluginDescriptor`] every plugin self-reports at registration time so
//! [`crate::registry::PluginRegistry`] can validate it before storing it —
//! see SPEC_FULL.md §3's note on why contract checking is structural rather
//! than purely type-level.

use crate::model::PluginKind;
use std::collections::HashSet;

/// Required and optional method names for one plugin kind.
#[derive(Debug, Clone, Copy)]
pub struct PluginContract {
    pub kind: PluginKind,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

impl PluginContract {
    pub fn for_kind(kind: PluginKind) -> PluginContract {
        match kind {
            PluginKind::Loader => PluginContract {
                kind,
                required: &["load"],
                optional: &["chunk"],
            },
            PluginKind::Embedder => PluginContract {
                kind,
                required: &["embed", "embed_query"],
                optional: &["dimensions"],
            },
            PluginKind::Retriever => PluginContract {
                kind,
                required: &["store", "retrieve"],
                optional: &["delete"],
            },
            PluginKind::Llm => PluginContract {
                kind,
                required: &["generate"],
                optional: &["generate_stream"],
            },
            PluginKind::Reranker => PluginContract {
                kind,
                required: &["rerank"],
                optional: &["score"],
            },
        }
    }

    /// Method names this plugin declares but that aren't part of its
    /// contract at all (neither required nor optional) — reported
    /// diagnostically, never a failure.
    pub fn extraneous<'a>(&self, declared: &'a HashSet<&'static str>) -> Vec<&'a str> {
        declared
            .iter()
            .filter(|m| !self.required.contains(m) && !self.optional.contains(m))
            .copied()
            .collect()
    }

    /// Required methods absent from `declared`.
    pub fn missing(&self, declared: &HashSet<&'static str>) -> Vec<String> {
        self.required
            .iter()
            .filter(|m| !declared.contains(*m))
            .map(|m| m.to_string())
            .collect()
    }
}

/// What a plugin self-reports about itself at registration time.
///
/// For plugins built against the typed traits in [`crate::registry`], this
/// is produced automatically (the trait bound guarantees the required
/// methods, so `methods()` only needs to report which *optional* methods
/// were overridden). For dynamically composed plugins — the duck-typed path
/// used by `register_descriptor` and exercised by the registry's contract
/// tests — a caller builds this directly to describe an arbitrary method
/// set, including an incomplete one.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub kind: PluginKind,
    pub methods: HashSet<&'static str>,
}

impl PluginDescriptor {
    pub fn new(kind: PluginKind, methods: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            kind,
            methods: methods.into_iter().collect(),
        }
    }

    /// Validate against the kind's contract, returning the missing required
    /// methods (empty iff the descriptor satisfies the contract).
    pub fn validate(&self) -> Vec<String> {
        PluginContract::for_kind(self.kind).missing(&self.methods)
    }
}
