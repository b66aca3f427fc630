//! # Pipeline Metrics (§4.4.3)
//!
//! Counters, gauges, and latency histograms for ingest/query stage
//! execution. Percentiles use the nearest-rank method and spread uses
//! population standard deviation — not the teacher's `(len as f64 * p) as
//! usize` truncating-index approach, which under-ranks small samples (see
//! DESIGN.md).

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

/// A monotonically increasing named counter.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self, by: u64) {
        self.0.fetch_add(by, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// A named value that can move up or down.
#[derive(Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// Default histogram bucket upper bounds (§4.4.3), in milliseconds.
pub const DEFAULT_HISTOGRAM_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0];

struct HistogramState {
    samples: Vec<f64>,
    bucket_counts: Vec<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

/// A bounded sample buffer for latency observations, reporting cumulative
/// bucket counts, nearest-rank percentiles, and population standard
/// deviation.
pub struct Histogram {
    buckets: Vec<f64>,
    state: Mutex<HistogramState>,
    capacity: usize,
}

impl Histogram {
    pub fn new(capacity: usize) -> Self {
        Self::with_buckets(capacity, DEFAULT_HISTOGRAM_BUCKETS.to_vec())
    }

    pub fn with_buckets(capacity: usize, mut buckets: Vec<f64>) -> Self {
        buckets.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let bucket_count = buckets.len();
        Self {
            buckets,
            state: Mutex::new(HistogramState {
                samples: Vec::with_capacity(capacity.min(4096)),
                bucket_counts: vec![0; bucket_count],
                count: 0,
                sum: 0.0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            }),
            capacity,
        }
    }

    /// Record one observation. Every configured bucket whose bound is `≥
    /// value` has its cumulative count incremented by one, along with the
    /// implicit `+Inf` bucket (tracked as the overall `count`) — so for all
    /// `b ≥ v` the bucket strictly increases by one (§8).
    pub fn observe(&self, value: f64) {
        let mut state = self.state.lock().unwrap();
        if state.samples.len() >= self.capacity {
            state.samples.remove(0);
        }
        state.samples.push(value);
        state.count += 1;
        state.sum += value;
        state.min = state.min.min(value);
        state.max = state.max.max(value);
        for (bound, bucket_count) in self.buckets.iter().zip(state.bucket_counts.iter_mut()) {
            if value <= *bound {
                *bucket_count += 1;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().samples.len()
    }

    /// Nearest-rank percentile: `ceil(p/100 * n)`-th smallest sample,
    /// 1-indexed, clamped to `[1, n]`.
    pub fn percentile(&self, p: f64) -> f64 {
        let mut samples = self.state.lock().unwrap().samples.clone();
        if samples.is_empty() {
            return 0.0;
        }
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let n = samples.len();
        let rank = ((p / 100.0) * n as f64).ceil() as usize;
        let index = rank.clamp(1, n) - 1;
        samples[index]
    }

    pub fn get_percentiles(&self, ps: &[f64]) -> HashMap<String, f64> {
        ps.iter().map(|p| (format_number(*p), self.percentile(*p))).collect()
    }

    pub fn mean(&self) -> f64 {
        let state = self.state.lock().unwrap();
        if state.samples.is_empty() {
            return 0.0;
        }
        state.samples.iter().sum::<f64>() / state.samples.len() as f64
    }

    /// Population standard deviation (divides by `n`, not `n - 1`).
    pub fn stddev(&self) -> f64 {
        let state = self.state.lock().unwrap();
        if state.samples.is_empty() {
            return 0.0;
        }
        let mean = state.samples.iter().sum::<f64>() / state.samples.len() as f64;
        let variance = state.samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / state.samples.len() as f64;
        variance.sqrt()
    }

    pub fn get_statistics(&self) -> HistogramStatistics {
        let state = self.state.lock().unwrap();
        HistogramStatistics {
            mean: self.mean_locked(&state.samples),
            std_dev: self.stddev_locked(&state.samples),
            min: if state.count == 0 { 0.0 } else { state.min },
            max: if state.count == 0 { 0.0 } else { state.max },
            count: state.count,
            sum: state.sum,
        }
    }

    fn mean_locked(&self, samples: &[f64]) -> f64 {
        if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        }
    }

    fn stddev_locked(&self, samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let mean = self.mean_locked(samples);
        (samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / samples.len() as f64).sqrt()
    }

    /// `{buckets: {bound -> cumulativeCount, "+Inf": count}, mean, stdDev,
    /// min, max, count, sum}`.
    pub fn export(&self) -> serde_json::Value {
        let state = self.state.lock().unwrap();
        let mut bucket_map = serde_json::Map::new();
        for (bound, bucket_count) in self.buckets.iter().zip(state.bucket_counts.iter()) {
            bucket_map.insert(format_number(*bound), serde_json::json!(bucket_count));
        }
        bucket_map.insert("+Inf".to_string(), serde_json::json!(state.count));

        serde_json::json!({
            "buckets": bucket_map,
            "mean": self.mean_locked(&state.samples),
            "stdDev": self.stddev_locked(&state.samples),
            "min": if state.count == 0 { 0.0 } else { state.min },
            "max": if state.count == 0 { 0.0 } else { state.max },
            "count": state.count,
            "sum": state.sum,
        })
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramStatistics {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
    pub sum: f64,
}

/// Per-stage latency and outcome counters for one pipeline run or process
/// lifetime, keyed by stage name (`load`, `chunk`, `embed`, `store`,
/// `query_embed`, `retrieve`, `rerank`, `generate`).
#[derive(Default)]
pub struct PipelineMetrics {
    successes: DashMap<String, Counter>,
    failures: DashMap<String, Counter>,
    latencies: DashMap<String, Histogram>,
}

const DEFAULT_HISTOGRAM_CAPACITY: usize = 2048;

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, stage: &str, duration_ms: f64) {
        self.successes
            .entry(stage.to_string())
            .or_default()
            .incr(1);
        self.latencies
            .entry(stage.to_string())
            .or_insert_with(|| Histogram::new(DEFAULT_HISTOGRAM_CAPACITY))
            .observe(duration_ms);
    }

    pub fn record_failure(&self, stage: &str) {
        self.failures
            .entry(stage.to_string())
            .or_default()
            .incr(1);
    }

    pub fn success_count(&self, stage: &str) -> u64 {
        self.successes.get(stage).map(|c| c.value()).unwrap_or(0)
    }

    pub fn failure_count(&self, stage: &str) -> u64 {
        self.failures.get(stage).map(|c| c.value()).unwrap_or(0)
    }

    pub fn p50(&self, stage: &str) -> f64 {
        self.latencies.get(stage).map(|h| h.percentile(50.0)).unwrap_or(0.0)
    }

    pub fn p95(&self, stage: &str) -> f64 {
        self.latencies.get(stage).map(|h| h.percentile(95.0)).unwrap_or(0.0)
    }

    pub fn p99(&self, stage: &str) -> f64 {
        self.latencies.get(stage).map(|h| h.percentile(99.0)).unwrap_or(0.0)
    }

    pub fn stddev(&self, stage: &str) -> f64 {
        self.latencies.get(stage).map(|h| h.stddev()).unwrap_or(0.0)
    }

    /// Reset every counter and histogram for `stage`, leaving other stages
    /// untouched. Useful between test cases or SLO measurement windows.
    pub fn reset_stage(&self, stage: &str) {
        if let Some(c) = self.successes.get(stage) {
            c.reset();
        }
        if let Some(c) = self.failures.get(stage) {
            c.reset();
        }
        self.latencies.remove(stage);
    }
}
