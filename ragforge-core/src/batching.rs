//! # Batch Embedding
//!
//! Two complementary batching strategies used by [`crate::executor`] when
//! embedding chunks during ingest:
//!
//! - [`embed_parallel`] (§4.3.1, "Parallel Batching") splits chunks into
//!   fixed-size contiguous batches and embeds each batch — not each chunk —
//!   in one call to the embedder, concurrently, bounded by a
//!   [`tokio::sync::Semaphore`], with linear per-batch retry.
//! - [`embed_intelligent`] (§4.3.2, "Intelligent Batching") greedily packs
//!   chunks into token-budgeted batches for embedders charged per request,
//!   optionally rescaling the budget toward a target wall-clock duration and
//!   reporting progress at an item interval.

use crate::error::{CoreError, StageError};
use crate::model::{Chunk, Vector};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Options governing [`embed_parallel`] (§4.3.1).
#[derive(Debug, Clone, Copy)]
pub struct BatchingOptions {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for BatchingOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_concurrency: 3,
            retry_attempts: 2,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Above this fraction of chunks dropped from the tail, ingest aborts
/// instead of continuing with partial results. See DESIGN.md for why a
/// trailing-suffix drop (rather than scattered holes) was chosen to satisfy
/// the "order preserved, no holes" invariant.
const MAX_FAILURE_RATIO: f64 = 0.5;

/// Retry one batch up to `retry_attempts` additional times, with delay
/// `retry_delay × attempt` (attempt is 1-based: the first retry waits one
/// `retry_delay`, the second waits two). A batch whose result length doesn't
/// match its input length is treated as failed and retried the same as an
/// embedder error.
async fn retry_batch<F, Fut>(
    batch: &[Chunk],
    retry_attempts: u32,
    retry_delay: Duration,
    cancel: &CancellationToken,
    embed_batch: &F,
) -> Result<Vec<Vector>, CoreError>
where
    F: Fn(&[Chunk]) -> Fut,
    Fut: Future<Output = Result<Vec<Vector>, CoreError>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let outcome = match embed_batch(batch).await {
            Ok(vectors) if vectors.len() == batch.len() => return Ok(vectors),
            Ok(vectors) => Err(CoreError::Stage(StageError::EmbeddingMismatch {
                expected: batch.len(),
                got: vectors.len(),
            })),
            Err(err) => Err(err),
        };

        attempt += 1;
        if attempt > retry_attempts {
            return outcome;
        }
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        tokio::time::sleep(retry_delay * attempt).await;
    }
}

/// Embed `chunks` concurrently in fixed-size batches, each batch handed to
/// the embedder in one call and retried as a unit. The returned vectors are
/// indexed by their position in `chunks`, reassembled in original batch
/// order regardless of which batch's future resolves first (§8 scenario 3).
///
/// Partial-failure policy: batches are processed in order; if the batch at
/// the lowest index fails after retry, every batch from that index onward
/// is dropped as a contiguous trailing suffix — never scattered holes. If
/// the dropped suffix is at most [`MAX_FAILURE_RATIO`] of all chunks, the
/// successful prefix is returned with a warning per dropped chunk;
/// otherwise [`CoreError::ParallelEmbeddingFailed`] is raised carrying the
/// first batch's error.
pub async fn embed_parallel<F, Fut>(
    chunks: &[Chunk],
    opts: BatchingOptions,
    cancel: &CancellationToken,
    embed_batch: F,
    mut on_warning: impl FnMut(usize, &CoreError),
) -> Result<Vec<(usize, Vector)>, CoreError>
where
    F: Fn(&[Chunk]) -> Fut + Sync,
    Fut: Future<Output = Result<Vec<Vector>, CoreError>>,
{
    if chunks.is_empty() {
        return Ok(Vec::new());
    }
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }

    let batch_size = opts.batch_size.max(1);
    let semaphore = Arc::new(Semaphore::new(opts.max_concurrency.max(1)));
    let batches: Vec<&[Chunk]> = chunks.chunks(batch_size).collect();

    let mut futures_in_order = Vec::with_capacity(batches.len());
    for batch in &batches {
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        let embed_batch = &embed_batch;
        futures_in_order.push(async move {
            let permit = semaphore.acquire_owned().await.map_err(|_| CoreError::Transient {
                message: "batch semaphore closed".to_string(),
            });
            let permit = match permit {
                Ok(permit) => permit,
                Err(err) => return Err(err),
            };
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let result = retry_batch(batch, opts.retry_attempts, opts.retry_delay, &cancel, embed_batch).await;
            drop(permit);
            result
        });
    }

    let batch_outcomes: Vec<Result<Vec<Vector>, CoreError>> = futures::future::join_all(futures_in_order).await;

    let batch_lens: Vec<usize> = batches.iter().map(|b| b.len()).collect();
    let first_failed_batch = batch_outcomes.iter().position(|o| o.is_err());

    let Some(cut) = first_failed_batch else {
        // every batch succeeded
        let mut results = Vec::with_capacity(chunks.len());
        let mut idx = 0;
        for outcome in batch_outcomes {
            for vector in outcome.expect("checked Ok above") {
                results.push((idx, vector));
                idx += 1;
            }
        }
        return Ok(results);
    };

    let kept_chunks: usize = batch_lens[..cut].iter().sum();
    let dropped_chunks = chunks.len() - kept_chunks;
    let failure_ratio = dropped_chunks as f64 / chunks.len() as f64;

    let first_error = batch_outcomes[cut]
        .as_ref()
        .err()
        .map(|e| e.to_string())
        .unwrap_or_default();

    if failure_ratio > MAX_FAILURE_RATIO {
        return Err(CoreError::ParallelEmbeddingFailed {
            failed_chunks: dropped_chunks,
            total_chunks: chunks.len(),
            first_error,
        });
    }

    let mut results = Vec::with_capacity(kept_chunks);
    let mut idx = 0;
    for outcome in batch_outcomes.into_iter().take(cut) {
        for vector in outcome.expect("prefix before `cut` is all Ok") {
            results.push((idx, vector));
            idx += 1;
        }
    }
    for dropped_idx in kept_chunks..chunks.len() {
        on_warning(dropped_idx, &CoreError::Transient { message: first_error.clone() });
    }
    Ok(results)
}

/// Options governing [`embed_intelligent`] (§4.3.2).
#[derive(Debug, Clone, Copy)]
pub struct IntelligentBatchingOptions {
    pub max_tokens_per_batch: usize,
    pub max_items_per_batch: usize,
    pub target_utilization: f64,
    pub adaptive: bool,
    pub progress_interval: usize,
}

impl Default for IntelligentBatchingOptions {
    fn default() -> Self {
        Self {
            max_tokens_per_batch: 8191,
            max_items_per_batch: 2048,
            target_utilization: 0.85,
            adaptive: false,
            progress_interval: 100,
        }
    }
}

/// Estimate the token cost of `text` using the cheap `ceil(len/4) + 2`
/// heuristic (characters-per-token approximation plus a per-item overhead).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4) + 2
}

/// Determine how many leading chunks of `chunks` fit in one batch under
/// `max_tokens`/`max_items`. A single chunk exceeding the token budget still
/// gets its own one-item batch rather than being dropped or split.
fn next_batch_len(chunks: &[Chunk], max_tokens: usize, max_items: usize) -> usize {
    let mut count = 0usize;
    let mut tokens = 0usize;
    for chunk in chunks {
        let cost = estimate_tokens(&chunk.text);
        if count > 0 && (tokens + cost > max_tokens || count >= max_items) {
            break;
        }
        tokens += cost;
        count += 1;
        if count >= max_items {
            break;
        }
    }
    count.max(1)
}

/// Greedily pack `chunks` into batches whose estimated token total stays at
/// or under `max_tokens_per_batch`. Exposed for callers that want the full
/// partition up front rather than the incremental, adaptive walk
/// [`embed_intelligent`] performs.
pub fn pack_into_batches(chunks: &[Chunk], max_tokens_per_batch: usize) -> Vec<Vec<Chunk>> {
    let mut batches = Vec::new();
    let mut offset = 0;
    while offset < chunks.len() {
        let len = next_batch_len(&chunks[offset..], max_tokens_per_batch, usize::MAX);
        batches.push(chunks[offset..offset + len].to_vec());
        offset += len;
    }
    batches
}

/// Target wall-clock duration per batch the adaptive packer rescales
/// toward (§4.3.2).
pub const TARGET_BATCH_DURATION: Duration = Duration::from_secs(3);

/// Rescale `current_max_tokens` based on how long the previous batch took,
/// nudging toward [`TARGET_BATCH_DURATION`]. Clamped to stay within `[floor,
/// ceiling]` so a single slow batch can't collapse the budget to zero or
/// runaway unbounded.
pub fn rescale_batch_budget(
    current_max_tokens: usize,
    last_batch_duration: Duration,
    floor: usize,
    ceiling: usize,
) -> usize {
    if last_batch_duration.is_zero() {
        return current_max_tokens;
    }
    let ratio = TARGET_BATCH_DURATION.as_secs_f64() / last_batch_duration.as_secs_f64();
    let rescaled = (current_max_tokens as f64 * ratio).round() as usize;
    rescaled.clamp(floor, ceiling)
}

/// Embed `chunks` via token-budgeted batches, one batch at a time (no
/// cross-batch concurrency — a token-billed embedder is typically rate
/// limited per request, not per connection). Checks `cancel` between
/// packed batches, reports progress every `progress_interval` items via
/// `on_progress(completed, total)`, and in adaptive mode rescales the
/// token budget toward [`TARGET_BATCH_DURATION`] using the mean of the
/// last 10 batch durations.
///
/// Unlike [`embed_parallel`], a batch whose length mismatches its input
/// (or that errors) is not tolerated — §4.3.2 has no partial-failure
/// clause, so any batch failure here is fatal.
pub async fn embed_intelligent<F, Fut>(
    chunks: &[Chunk],
    opts: IntelligentBatchingOptions,
    cancel: &CancellationToken,
    mut embed_batch: F,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<Vec<Vector>, CoreError>
where
    F: FnMut(&[Chunk]) -> Fut,
    Fut: Future<Output = Result<Vec<Vector>, CoreError>>,
{
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let mut budget = ((opts.max_tokens_per_batch as f64) * opts.target_utilization.clamp(0.0, 1.0)).round() as usize;
    budget = budget.max(1);

    let mut results = Vec::with_capacity(chunks.len());
    let mut durations: VecDeque<Duration> = VecDeque::with_capacity(10);
    let mut offset = 0;
    let mut next_report = opts.progress_interval.max(1);

    while offset < chunks.len() {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let len = next_batch_len(&chunks[offset..], budget, opts.max_items_per_batch.max(1));
        let batch = &chunks[offset..offset + len];

        let started = Instant::now();
        let vectors = embed_batch(batch).await?;
        let elapsed = started.elapsed();
        if vectors.len() != batch.len() {
            return Err(CoreError::Stage(StageError::EmbeddingMismatch {
                expected: batch.len(),
                got: vectors.len(),
            }));
        }
        results.extend(vectors);
        offset += len;

        if offset >= next_report || offset == chunks.len() {
            on_progress(offset, chunks.len());
            next_report += opts.progress_interval.max(1);
        }

        if opts.adaptive {
            if durations.len() == 10 {
                durations.pop_front();
            }
            durations.push_back(elapsed);
            let mean = durations.iter().sum::<Duration>() / durations.len() as u32;
            budget = rescale_batch_budget(budget, mean, 1, opts.max_tokens_per_batch);
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fast_opts() -> BatchingOptions {
        BatchingOptions {
            batch_size: 2,
            max_concurrency: 4,
            retry_attempts: 0,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn embeds_all_chunks_successfully() {
        let chunks = vec![Chunk::new("a"), Chunk::new("bb"), Chunk::new("ccc")];
        let cancel = CancellationToken::new();
        let result = embed_parallel(
            &chunks,
            fast_opts(),
            &cancel,
            |batch| {
                let vectors = batch.iter().map(|c| Vector::new(vec![c.text.len() as f32])).collect();
                async move { Ok(vectors) }
            },
            |_, _| {},
        )
        .await
        .unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result[0], (0, Vector::new(vec![1.0])));
        assert_eq!(result[2], (2, Vector::new(vec![3.0])));
    }

    #[tokio::test]
    async fn batches_are_reassembled_by_index_not_completion_order() {
        // Mirrors §8 scenario 3: batch 1 finishes before batch 0 but the
        // output must still be concatenated in batch-index order.
        let chunks: Vec<Chunk> = ["a", "b", "c", "d"].iter().map(|s| Chunk::new(*s)).collect();
        let cancel = CancellationToken::new();
        let opts = BatchingOptions {
            batch_size: 2,
            max_concurrency: 2,
            retry_attempts: 0,
            retry_delay: Duration::from_millis(1),
        };
        let result = embed_parallel(
            &chunks,
            opts,
            &cancel,
            |batch| {
                let is_first_batch = batch[0].text == "a";
                let vectors: Vec<Vector> = batch
                    .iter()
                    .map(|c| {
                        let v = match c.text.as_str() {
                            "a" => 5.0,
                            "b" => 6.0,
                            "c" => 7.0,
                            "d" => 8.0,
                            _ => unreachable!(),
                        };
                        Vector::new(vec![v])
                    })
                    .collect();
                async move {
                    if is_first_batch {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    Ok(vectors)
                }
            },
            |_, _| {},
        )
        .await
        .unwrap();
        let values: Vec<f32> = result.into_iter().map(|(_, v)| v.0[0]).collect();
        assert_eq!(values, vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[tokio::test]
    async fn batch_retried_with_linear_delay_on_length_mismatch() {
        let chunks = vec![Chunk::new("a"), Chunk::new("b")];
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts2 = attempts.clone();
        let opts = BatchingOptions {
            batch_size: 2,
            max_concurrency: 1,
            retry_attempts: 2,
            retry_delay: Duration::from_millis(1),
        };
        let result = embed_parallel(
            &chunks,
            opts,
            &cancel,
            move |batch| {
                let n = attempts2.fetch_add(1, Ordering::SeqCst);
                let batch_len = batch.len();
                async move {
                    if n < 2 {
                        Ok(vec![Vector::new(vec![0.0])]) // wrong length
                    } else {
                        Ok((0..batch_len).map(|i| Vector::new(vec![i as f32])).collect())
                    }
                }
            },
            |_, _| {},
        )
        .await
        .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn drops_only_trailing_batches_under_failure_threshold() {
        // 6 chunks, batch_size=2 -> 3 batches. Last batch fails -> 2/6 dropped (33%).
        let chunks: Vec<Chunk> = (0..6).map(|i| Chunk::new(format!("c{i}"))).collect();
        let cancel = CancellationToken::new();
        let warnings = Arc::new(Mutex::new(Vec::new()));
        let warnings2 = warnings.clone();
        let result = embed_parallel(
            &chunks,
            fast_opts(),
            &cancel,
            |batch| {
                let fail = batch[0].text == "c4";
                let vectors = batch.iter().map(|_| Vector::new(vec![1.0])).collect::<Vec<_>>();
                async move {
                    if fail {
                        Err(CoreError::invalid_input("boom"))
                    } else {
                        Ok(vectors)
                    }
                }
            },
            move |idx, _| warnings2.lock().unwrap().push(idx),
        )
        .await
        .unwrap();
        assert_eq!(result.len(), 4);
        assert_eq!(*warnings.lock().unwrap(), vec![4, 5]);
    }

    #[tokio::test]
    async fn aborts_when_majority_of_chunks_in_trailing_batches_fail() {
        let chunks: Vec<Chunk> = (0..6).map(|i| Chunk::new(format!("c{i}"))).collect();
        let cancel = CancellationToken::new();
        let result = embed_parallel(
            &chunks,
            fast_opts(),
            &cancel,
            |batch| {
                let fail = batch[0].text != "c0";
                let vectors = batch.iter().map(|_| Vector::new(vec![1.0])).collect::<Vec<_>>();
                async move {
                    if fail {
                        Err(CoreError::invalid_input("boom"))
                    } else {
                        Ok(vectors)
                    }
                }
            },
            |_, _| {},
        )
        .await;
        assert!(matches!(
            result,
            Err(CoreError::ParallelEmbeddingFailed { failed_chunks: 4, total_chunks: 6, .. })
        ));
    }

    #[tokio::test]
    async fn already_cancelled_token_aborts_before_any_work() {
        let chunks = vec![Chunk::new("a")];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = embed_parallel(
            &chunks,
            fast_opts(),
            &cancel,
            |batch| {
                let vectors = batch.iter().map(|_| Vector::new(vec![1.0])).collect::<Vec<_>>();
                async move { Ok(vectors) }
            },
            |_, _| {},
        )
        .await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[test]
    fn estimate_tokens_matches_formula() {
        assert_eq!(estimate_tokens(""), 2);
        assert_eq!(estimate_tokens("abcd"), 3);
        assert_eq!(estimate_tokens("abcde"), 4);
    }

    #[test]
    fn pack_into_batches_respects_token_budget() {
        let chunks = vec![
            Chunk::new("a".repeat(40)),
            Chunk::new("b".repeat(40)),
            Chunk::new("c".repeat(40)),
        ];
        let batches = pack_into_batches(&chunks, 15);
        assert!(batches.len() >= 2);
        assert!(batches.iter().all(|b| !b.is_empty()));
    }

    #[test]
    fn pack_into_batches_gives_oversized_chunk_its_own_batch() {
        let chunks = vec![Chunk::new("x".repeat(1000)), Chunk::new("y")];
        let batches = pack_into_batches(&chunks, 10);
        assert_eq!(batches[0].len(), 1);
    }

    #[test]
    fn rescale_budget_shrinks_when_batch_ran_long() {
        let next = rescale_batch_budget(1000, Duration::from_secs(6), 100, 5000);
        assert!(next < 1000);
    }

    #[test]
    fn rescale_budget_grows_when_batch_ran_short() {
        let next = rescale_batch_budget(1000, Duration::from_millis(500), 100, 5000);
        assert!(next > 1000);
    }

    #[test]
    fn rescale_budget_respects_clamp() {
        let next = rescale_batch_budget(1000, Duration::from_millis(1), 100, 1200);
        assert_eq!(next, 1200);
    }

    #[tokio::test]
    async fn intelligent_batching_embeds_everything_and_reports_progress() {
        let chunks: Vec<Chunk> = (0..5).map(|i| Chunk::new(format!("chunk-{i}"))).collect();
        let cancel = CancellationToken::new();
        let opts = IntelligentBatchingOptions {
            max_tokens_per_batch: 100,
            max_items_per_batch: 2,
            target_utilization: 1.0,
            adaptive: false,
            progress_interval: 2,
        };
        let progress = Arc::new(Mutex::new(Vec::new()));
        let progress2 = progress.clone();
        let result = embed_intelligent(
            &chunks,
            opts,
            &cancel,
            |batch| {
                let vectors = batch.iter().map(|_| Vector::new(vec![1.0])).collect::<Vec<_>>();
                async move { Ok(vectors) }
            },
            move |done, total| progress2.lock().unwrap().push((done, total)),
        )
        .await
        .unwrap();
        assert_eq!(result.len(), 5);
        assert!(!progress.lock().unwrap().is_empty());
        assert_eq!(progress.lock().unwrap().last().unwrap(), &(5, 5));
    }

    #[tokio::test]
    async fn intelligent_batching_is_cancellable_between_batches() {
        let chunks: Vec<Chunk> = (0..10).map(|i| Chunk::new(format!("chunk-{i}"))).collect();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let cancel_for_embed = cancel.clone();
        let opts = IntelligentBatchingOptions {
            max_items_per_batch: 1,
            ..IntelligentBatchingOptions::default()
        };
        let result = embed_intelligent(
            &chunks,
            opts,
            &cancel,
            move |batch| {
                let n = calls2.fetch_add(1, Ordering::SeqCst);
                if n == 2 {
                    cancel_for_embed.cancel();
                }
                let vectors = batch.iter().map(|_| Vector::new(vec![1.0])).collect::<Vec<_>>();
                async move { Ok(vectors) }
            },
            |_, _| {},
        )
        .await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert!(calls.load(Ordering::SeqCst) < 10);
    }

    #[tokio::test]
    async fn intelligent_batching_fails_hard_on_mismatch() {
        let chunks = vec![Chunk::new("a"), Chunk::new("b")];
        let cancel = CancellationToken::new();
        let result = embed_intelligent(
            &chunks,
            IntelligentBatchingOptions::default(),
            &cancel,
            |_batch| async { Ok(vec![Vector::new(vec![1.0])]) },
            |_, _| {},
        )
        .await;
        assert!(matches!(result, Err(CoreError::Stage(StageError::EmbeddingMismatch { .. }))));
    }
}
