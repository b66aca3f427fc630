//! # Pipeline Executor
//!
//! Drives the two top-level operations — [`PipelineExecutor::ingest`] and
//! [`PipelineExecutor::query`] — by walking the configured pipeline stages,
//! resolving each stage's plugin from the [`PluginRegistry`], and reporting
//! progress through an injected [`PipelineObserver`] rather than a global
//! singleton (§9's "explicit lifecycle over ambient globals").

use crate::batching::{embed_intelligent, embed_parallel, BatchingOptions, IntelligentBatchingOptions};
use crate::error::{CoreError, StageError};
use crate::model::{Chunk, Document, PluginKind, PluginSpecObject, ScoredChunk, Vector};
use crate::registry::{PluginRegistry, RegisteredPluginRef};
use crate::retry::{retry, RetryOptions};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Reranking retries at most twice no matter how the pipeline's general
/// retry policy is configured (§4.3 rerank stage is fixed, unlike the other
/// stages which honor `pipeline.retries`).
const RERANK_RETRY_OPTS: RetryOptions = RetryOptions {
    retries: 2,
    base_delay_ms: 200,
    multiplier: 2.0,
    jitter: false,
};

/// Observes pipeline stage transitions. Injected explicitly rather than
/// looked up from a global — tests and embedders use [`NullObserver`], a
/// host process wires in tracing/metrics (see ragforge-runtime).
pub trait PipelineObserver: Send + Sync {
    fn on_stage_start(&self, _stage: &str) {}
    fn on_stage_end(&self, _stage: &str, _duration: Duration) {}
    fn on_plugin_error(&self, _stage: &str, _err: &CoreError) {}
    fn on_warning(&self, _stage: &str, _message: &str) {}
    /// Reports incremental progress within a stage (currently emitted only
    /// by the intelligent-batching embed path). `completed`/`total` are
    /// item counts, not percentages.
    fn on_progress(&self, _stage: &str, _completed: usize, _total: usize) {}
}

/// An observer that does nothing; the default when no caller supplies one.
pub struct NullObserver;
impl PipelineObserver for NullObserver {}

/// Result of a completed [`PipelineExecutor::ingest`] call.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub documents_loaded: usize,
    pub chunks_produced: usize,
    pub vectors_embedded: usize,
    pub warnings: Vec<String>,
}

/// Result of a completed [`PipelineExecutor::query`] call.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub retrieved: Vec<ScoredChunk>,
    pub response: Option<String>,
}

/// Runs ingest and query against a configured pipeline.
pub struct PipelineExecutor {
    registry: Arc<PluginRegistry>,
    config: crate::model::PipelineConfig,
    observer: Arc<dyn PipelineObserver>,
    retry_opts: RetryOptions,
}

impl PipelineExecutor {
    pub fn new(
        registry: Arc<PluginRegistry>,
        config: crate::model::PipelineConfig,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        let retry_opts = RetryOptions {
            retries: config
                .pipeline
                .retries
                .retries
                .unwrap_or(RetryOptions::default().retries),
            base_delay_ms: config
                .pipeline
                .retries
                .base_delay_ms
                .unwrap_or(RetryOptions::default().base_delay_ms),
            multiplier: config
                .pipeline
                .retries
                .multiplier
                .unwrap_or(RetryOptions::default().multiplier),
            jitter: config
                .pipeline
                .retries
                .jitter
                .unwrap_or(RetryOptions::default().jitter),
        };
        Self {
            registry,
            config,
            observer,
            retry_opts,
        }
    }

    /// Load, chunk, embed, and store one source. Cancellation is checked
    /// between every stage and between embedding batches (§4.3.3).
    pub async fn ingest(
        &self,
        source_path: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestReport, CoreError> {
        let mut warnings = Vec::new();

        let loader = self.resolve(PluginKind::Loader)?;
        let loader_plugin = loader
            .as_loader()
            .ok_or_else(|| CoreError::invalid_input("plugin registered as loader lacks load()"))?;

        self.checkpoint(cancel)?;
        self.observer.on_stage_start("load");
        let started = Instant::now();
        let documents = self.call_with_retry("load", || loader_plugin.load(source_path)).await?;
        self.observer.on_stage_end("load", started.elapsed());
        if documents.is_empty() {
            return Err(CoreError::Stage(StageError::LoadFailed));
        }

        self.checkpoint(cancel)?;
        self.observer.on_stage_start("chunk");
        let started = Instant::now();
        let chunks = self.chunk_all(&loader_plugin, &documents).await?;
        self.observer.on_stage_end("chunk", started.elapsed());
        if chunks.is_empty() {
            return Err(CoreError::Stage(StageError::ChunkingFailed));
        }

        self.checkpoint(cancel)?;
        let embedder = self.resolve(PluginKind::Embedder)?;
        let embedder_plugin = embedder.as_embedder().ok_or_else(|| {
            CoreError::invalid_input("plugin registered as embedder lacks embed()")
        })?;
        self.observer.on_stage_start("embed");
        let started = Instant::now();
        let embedded = if self.intelligent_batching_enabled() {
            let embedder_for_batch = embedder_plugin.clone();
            let observer_for_progress = self.observer.clone();
            let vectors = embed_intelligent(
                &chunks,
                self.intelligent_batching_opts(),
                cancel,
                move |batch| {
                    let embedder = embedder_for_batch.clone();
                    let batch = batch.to_vec();
                    async move { embedder.embed(&batch).await }
                },
                move |done, total| observer_for_progress.on_progress("embed", done, total),
            )
            .await?;
            vectors.into_iter().enumerate().collect::<Vec<_>>()
        } else {
            let embedder_for_batch = embedder_plugin.clone();
            let observer_for_warn = self.observer.clone();
            embed_parallel(
                &chunks,
                self.batching_opts(),
                cancel,
                move |batch| {
                    let embedder = embedder_for_batch.clone();
                    let batch = batch.to_vec();
                    async move { embedder.embed(&batch).await }
                },
                move |idx, err| observer_for_warn.on_warning("embed", &format!("chunk {idx}: {err}")),
            )
            .await?
        };
        self.observer.on_stage_end("embed", started.elapsed());

        if embedded.len() != chunks.len() {
            warnings.push(format!(
                "{} of {} chunks failed to embed and were skipped",
                chunks.len() - embedded.len(),
                chunks.len()
            ));
        }

        self.checkpoint(cancel)?;
        let retriever = self.resolve(PluginKind::Retriever)?;
        let retriever_plugin = retriever
            .as_retriever()
            .ok_or_else(|| CoreError::invalid_input("plugin registered as retriever lacks store()"))?;
        self.observer.on_stage_start("store");
        let started = Instant::now();
        let (stored_chunks, stored_vectors): (Vec<Chunk>, Vec<Vector>) = embedded
            .into_iter()
            .map(|(idx, vector)| (chunks[idx].clone(), vector))
            .unzip();
        let vectors_embedded = stored_chunks.len();
        self.call_with_retry("store", || retriever_plugin.store(&stored_chunks, &stored_vectors))
            .await?;
        self.observer.on_stage_end("store", started.elapsed());

        Ok(IngestReport {
            documents_loaded: documents.len(),
            chunks_produced: chunks.len(),
            vectors_embedded,
            warnings,
        })
    }

    /// Embed the query, retrieve the top matching chunks, optionally rerank,
    /// optionally generate a final response.
    pub async fn query(
        &self,
        prompt: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, CoreError> {
        self.checkpoint(cancel)?;
        let embedder = self.resolve(PluginKind::Embedder)?;
        let embedder_plugin = embedder.as_embedder().ok_or_else(|| {
            CoreError::invalid_input("plugin registered as embedder lacks embed_query()")
        })?;
        self.observer.on_stage_start("query_embed");
        let query_vector = self
            .call_with_retry("query_embed", || embedder_plugin.embed_query(prompt))
            .await?;
        self.observer.on_stage_end("query_embed", Duration::ZERO);
        if query_vector.is_empty() {
            return Err(CoreError::Stage(StageError::QueryEmbeddingFailed));
        }

        self.checkpoint(cancel)?;
        let retriever = self.resolve(PluginKind::Retriever)?;
        let retriever_plugin = retriever.as_retriever().ok_or_else(|| {
            CoreError::invalid_input("plugin registered as retriever lacks retrieve()")
        })?;
        self.observer.on_stage_start("retrieve");
        let mut retrieved = self
            .call_with_retry("retrieve", || retriever_plugin.retrieve(&query_vector))
            .await?;
        retrieved.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        retrieved.truncate(top_k);
        self.observer.on_stage_end("retrieve", Duration::ZERO);

        self.checkpoint(cancel)?;
        if let Ok(reranker) = self.resolve(PluginKind::Reranker) {
            if let Some(reranker_plugin) = reranker.as_reranker() {
                self.observer.on_stage_start("rerank");
                let to_rerank = retrieved.clone();
                retrieved = self
                    .call_with_retry_opts("rerank", RERANK_RETRY_OPTS, || {
                        let reranker_plugin = reranker_plugin.clone();
                        let to_rerank = to_rerank.clone();
                        async move { reranker_plugin.rerank(prompt, to_rerank).await }
                    })
                    .await?;
                self.observer.on_stage_end("rerank", Duration::ZERO);
            }
        }

        self.checkpoint(cancel)?;
        let response = if let Ok(llm) = self.resolve(PluginKind::Llm) {
            if let Some(llm_plugin) = llm.as_llm() {
                self.observer.on_stage_start("generate");
                let text = self
                    .call_with_retry("generate", || llm_plugin.generate(prompt, &retrieved))
                    .await?;
                self.observer.on_stage_end("generate", Duration::ZERO);
                if text.is_empty() {
                    return Err(CoreError::Stage(StageError::GenerationFailed));
                }
                Some(text)
            } else {
                None
            }
        } else {
            None
        };

        Ok(QueryResult {
            retrieved,
            response,
        })
    }

    fn checkpoint(&self, cancel: &CancellationToken) -> Result<(), CoreError> {
        if cancel.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// `performance.parallel.*` (§4.3.1), defaulting per spec when absent or
    /// malformed.
    fn batching_opts(&self) -> BatchingOptions {
        let parallel = self.config.performance.get("parallel");
        let defaults = BatchingOptions::default();
        BatchingOptions {
            batch_size: parallel
                .and_then(|v| v.get("batchSize"))
                .and_then(serde_json::Value::as_u64)
                .map(|v| v as usize)
                .unwrap_or(defaults.batch_size),
            max_concurrency: parallel
                .and_then(|v| v.get("maxConcurrency"))
                .and_then(serde_json::Value::as_u64)
                .map(|v| v as usize)
                .unwrap_or(defaults.max_concurrency),
            retry_attempts: parallel
                .and_then(|v| v.get("retryAttempts"))
                .and_then(serde_json::Value::as_u64)
                .map(|v| v as u32)
                .unwrap_or(defaults.retry_attempts),
            retry_delay: parallel
                .and_then(|v| v.get("retryDelay"))
                .and_then(serde_json::Value::as_u64)
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
        }
    }

    /// Whether `performance.batching.strategy == "intelligent"` selects the
    /// token-aware ingest path (§4.3.2) over fixed-size parallel batching.
    fn intelligent_batching_enabled(&self) -> bool {
        self.config
            .performance
            .get("batching")
            .and_then(|v| v.get("strategy"))
            .and_then(serde_json::Value::as_str)
            == Some("intelligent")
    }

    /// `performance.batching.*` (§4.3.2), defaulting per spec when absent.
    fn intelligent_batching_opts(&self) -> IntelligentBatchingOptions {
        let batching = self.config.performance.get("batching");
        let defaults = IntelligentBatchingOptions::default();
        IntelligentBatchingOptions {
            max_tokens_per_batch: batching
                .and_then(|v| v.get("maxTokensPerBatch"))
                .and_then(serde_json::Value::as_u64)
                .map(|v| v as usize)
                .unwrap_or(defaults.max_tokens_per_batch),
            max_items_per_batch: batching
                .and_then(|v| v.get("maxItemsPerBatch"))
                .and_then(serde_json::Value::as_u64)
                .map(|v| v as usize)
                .unwrap_or(defaults.max_items_per_batch),
            target_utilization: batching
                .and_then(|v| v.get("targetUtilization"))
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(defaults.target_utilization),
            adaptive: batching
                .and_then(|v| v.get("adaptive"))
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(defaults.adaptive),
            progress_interval: batching
                .and_then(|v| v.get("progressInterval"))
                .and_then(serde_json::Value::as_u64)
                .map(|v| v as usize)
                .unwrap_or(defaults.progress_interval),
        }
    }

    async fn chunk_all(
        &self,
        loader: &Arc<dyn crate::registry::LoaderPlugin>,
        documents: &[Document],
    ) -> Result<Vec<Chunk>, CoreError> {
        let mut chunks = Vec::new();
        for doc in documents {
            let doc_chunks = if loader.supports_chunk() {
                loader.chunk(doc).await?
            } else {
                doc.chunk(1000)
            };
            chunks.extend(doc_chunks);
        }
        Ok(chunks)
    }

    async fn call_with_retry<T, F, Fut>(&self, stage: &str, op: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        self.call_with_retry_opts(stage, self.retry_opts, op).await
    }

    async fn call_with_retry_opts<T, F, Fut>(
        &self,
        stage: &str,
        retry_opts: RetryOptions,
        op: F,
    ) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let observer = self.observer.clone();
        let stage_owned = stage.to_string();
        retry(
            || async { op().await.map_err(|e| { observer.on_plugin_error(&stage_owned, &e); e }) },
            retry_opts,
            tokio::time::sleep,
            |_, _| {},
        )
        .await
    }

    /// Resolve the registered plugin for `kind`, using the first enabled
    /// entry configured for that kind and falling back to its configured
    /// `fallback` sibling if the primary isn't registered.
    fn resolve(&self, kind: PluginKind) -> Result<RegisteredPluginRef, CoreError> {
        let by_name = self
            .config
            .kind_plugins(kind)
            .ok_or_else(|| CoreError::invalid_input(format!("no {kind} configured")))?;

        let primary = by_name
            .values()
            .find(|spec| spec.enabled)
            .ok_or_else(|| CoreError::invalid_input(format!("no enabled {kind} configured")))?;

        match self.registry.get(kind, &primary.name) {
            Ok(plugin) => Ok(plugin),
            Err(primary_err) => self.resolve_fallback(kind, primary, by_name, primary_err),
        }
    }

    fn resolve_fallback(
        &self,
        kind: PluginKind,
        primary: &PluginSpecObject,
        by_name: &std::collections::HashMap<String, PluginSpecObject>,
        primary_err: CoreError,
    ) -> Result<RegisteredPluginRef, CoreError> {
        let Some(fallback_name) = &primary.fallback else {
            return Err(primary_err);
        };
        let Some(fallback_spec) = by_name.get(fallback_name) else {
            return Err(primary_err);
        };
        self.registry
            .get(kind, &fallback_spec.name)
            .map_err(|_| primary_err)
    }
}
