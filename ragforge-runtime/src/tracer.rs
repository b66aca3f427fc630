//! # Tracer (§4.4.2)
//!
//! Span tracking for ingest/query runs: 128-bit trace ids, 64-bit span ids,
//! status/attributes/events/links on each span, and a FIFO-bounded retention
//! of completed spans so a long-running process doesn't grow this structure
//! unbounded.

use chrono::{DateTime, Utc};
use rand::RngCore;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// A span's outcome. `Unset` until explicitly set by `recordException` (→
/// `Error`) or by `endSpan` defaulting an otherwise-untouched span to `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

/// A point-in-time annotation attached to a span (e.g. `exception`).
#[derive(Debug, Clone)]
pub struct SpanEvent {
    pub name: String,
    pub attributes: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// A reference from one span to another, carrying no ordering guarantee.
#[derive(Debug, Clone)]
pub struct SpanLink {
    pub trace_id: String,
    pub span_id: String,
    pub attributes: serde_json::Value,
}

/// Options accepted by [`Tracer::start_span`].
#[derive(Debug, Clone, Default)]
pub struct SpanOptions {
    /// Inherit this trace id instead of the current open span's (or a fresh
    /// one if there is no open span).
    pub trace_id: Option<String>,
    pub parent_span_id: Option<String>,
    pub attributes: serde_json::Value,
    pub links: Vec<SpanLink>,
}

/// A completed span: a named, timed unit of work within a trace.
#[derive(Debug, Clone)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub status: SpanStatus,
    pub attributes: serde_json::Value,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
    pub resource: serde_json::Value,
    pub instrumentation_library: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
}

struct OpenSpan {
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    name: String,
    status: SpanStatus,
    attributes: serde_json::Value,
    events: Vec<SpanEvent>,
    links: Vec<SpanLink>,
    exception_recorded: bool,
    started_at: Instant,
    started_at_wall: DateTime<Utc>,
}

/// Aggregate span statistics (§4.4.2).
#[derive(Debug, Clone)]
pub struct TracerStatistics {
    pub total_spans: usize,
    pub active_spans: usize,
    pub completed_spans: usize,
    pub unique_traces: usize,
    pub status_counts: std::collections::HashMap<String, usize>,
    pub spans_by_type: std::collections::HashMap<String, usize>,
    pub average_duration: Duration,
}

/// Filters accepted by [`Tracer::get_completed_spans`].
#[derive(Debug, Clone, Default)]
pub struct SpanFilter {
    pub trace_id: Option<String>,
    pub name: Option<String>,
    pub name_pattern: Option<String>,
    pub status: Option<SpanStatus>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Plugin kinds that collapse into the logical `plugin` category when
/// grouping statistics by span type (§4.4.2).
const PLUGIN_KIND_NAMES: &[&str] = &["embedder", "llm", "retriever", "loader", "reranker"];

fn span_type(name: &str) -> String {
    let leading = name.split('.').next().unwrap_or(name);
    if PLUGIN_KIND_NAMES.contains(&leading) {
        "plugin".to_string()
    } else {
        leading.to_string()
    }
}

/// Tracks open and completed spans, retaining at most `max_completed`
/// finished spans in FIFO order.
pub struct Tracer {
    resource: serde_json::Value,
    instrumentation_library: String,
    open: Mutex<Vec<OpenSpan>>,
    completed: Mutex<VecDeque<Span>>,
    max_completed: usize,
}

impl Tracer {
    pub fn new(max_completed: usize) -> Self {
        Self::with_resource(max_completed, serde_json::Value::Null, "ragforge-runtime")
    }

    pub fn with_resource(max_completed: usize, resource: serde_json::Value, instrumentation_library: impl Into<String>) -> Self {
        Self {
            resource,
            instrumentation_library: instrumentation_library.into(),
            open: Mutex::new(Vec::new()),
            completed: Mutex::new(VecDeque::new()),
            max_completed,
        }
    }

    /// Begin a span with default options, inheriting the current open
    /// span's trace id as its parent if one exists.
    pub fn start_span(&self, name: &str) -> String {
        self.start_span_with(name, SpanOptions::default())
    }

    pub fn start_span_with(&self, name: &str, options: SpanOptions) -> String {
        let mut open = self.open.lock().unwrap();
        let parent = options.parent_span_id.or_else(|| open.last().map(|s| s.span_id.clone()));
        let trace_id = options
            .trace_id
            .or_else(|| open.last().map(|s| s.trace_id.clone()))
            .unwrap_or_else(|| random_hex(16));
        let span_id = random_hex(8);
        open.push(OpenSpan {
            trace_id,
            span_id: span_id.clone(),
            parent_span_id: parent,
            name: name.to_string(),
            status: SpanStatus::Unset,
            attributes: options.attributes,
            events: Vec::new(),
            links: options.links,
            exception_recorded: false,
            started_at: Instant::now(),
            started_at_wall: Utc::now(),
        });
        span_id
    }

    /// Run `f(span_id)`; on `Ok`, end the span with status `Ok`; on `Err`,
    /// record the error as an exception event, end the span with status
    /// `Error`, and propagate the error.
    pub fn start_active_span<T, E: std::fmt::Display>(
        &self,
        name: &str,
        f: impl FnOnce(&str) -> Result<T, E>,
    ) -> Result<T, E> {
        let span_id = self.start_span(name);
        match f(&span_id) {
            Ok(value) => {
                self.end_span(&span_id);
                Ok(value)
            }
            Err(err) => {
                self.record_exception(&span_id, &err);
                self.end_span(&span_id);
                Err(err)
            }
        }
    }

    pub fn add_event(&self, span_id: &str, name: &str, attributes: serde_json::Value) {
        let mut open = self.open.lock().unwrap();
        if let Some(span) = open.iter_mut().find(|s| s.span_id == span_id) {
            span.events.push(SpanEvent {
                name: name.to_string(),
                attributes,
                timestamp: Utc::now(),
            });
        }
    }

    pub fn set_status(&self, span_id: &str, status: SpanStatus) {
        let mut open = self.open.lock().unwrap();
        if let Some(span) = open.iter_mut().find(|s| s.span_id == span_id) {
            span.status = status;
        }
    }

    /// Append an `exception` event with `exception.type`/`exception.message`
    /// attributes and set the span's status to `Error`. At most one
    /// exception event is recorded per span — later calls are no-ops.
    pub fn record_exception(&self, span_id: &str, err: impl std::fmt::Display) {
        let mut open = self.open.lock().unwrap();
        if let Some(span) = open.iter_mut().find(|s| s.span_id == span_id) {
            if span.exception_recorded {
                return;
            }
            span.exception_recorded = true;
            span.status = SpanStatus::Error;
            span.events.push(SpanEvent {
                name: "exception".to_string(),
                attributes: serde_json::json!({
                    "exception.type": "Error",
                    "exception.message": err.to_string(),
                }),
                timestamp: Utc::now(),
            });
        }
    }

    /// End the span with `span_id`, moving it to completed spans. Idempotent
    /// — ending an already-ended or unknown span id is a no-op. A span
    /// still `Unset` when ended defaults to `Ok`. Duration is clamped to at
    /// least 1ms (§8: "for all spans S ended exactly once, duration ≥ 1").
    pub fn end_span(&self, span_id: &str) {
        let mut open = self.open.lock().unwrap();
        let Some(pos) = open.iter().position(|s| s.span_id == span_id) else {
            return;
        };
        let span = open.remove(pos);
        drop(open);

        let status = if span.status == SpanStatus::Unset { SpanStatus::Ok } else { span.status };
        let duration = span.started_at.elapsed().max(Duration::from_millis(1));

        let completed_span = Span {
            trace_id: span.trace_id,
            span_id: span.span_id,
            parent_span_id: span.parent_span_id,
            name: span.name,
            status,
            attributes: span.attributes,
            events: span.events,
            links: span.links,
            resource: self.resource.clone(),
            instrumentation_library: self.instrumentation_library.clone(),
            started_at: span.started_at_wall,
            ended_at: Utc::now(),
            duration,
        };

        let mut completed = self.completed.lock().unwrap();
        if completed.len() >= self.max_completed {
            completed.pop_front();
        }
        completed.push_back(completed_span);
    }

    pub fn completed_spans(&self) -> Vec<Span> {
        self.completed.lock().unwrap().iter().cloned().collect()
    }

    pub fn get_completed_spans(&self, filter: &SpanFilter) -> Vec<Span> {
        let name_pattern = filter
            .name_pattern
            .as_deref()
            .and_then(|p| Regex::new(p).ok());

        let matches: Vec<Span> = self
            .completed
            .lock()
            .unwrap()
            .iter()
            .filter(|s| filter.trace_id.as_deref().map(|t| s.trace_id == t).unwrap_or(true))
            .filter(|s| filter.name.as_deref().map(|n| s.name.contains(n)).unwrap_or(true))
            .filter(|s| name_pattern.as_ref().map(|re| re.is_match(&s.name)).unwrap_or(true))
            .filter(|s| filter.status.map(|st| s.status == st).unwrap_or(true))
            .filter(|s| filter.since.map(|since| s.ended_at >= since).unwrap_or(true))
            .cloned()
            .collect();

        match filter.limit {
            Some(limit) if matches.len() > limit => matches[matches.len() - limit..].to_vec(),
            _ => matches,
        }
    }

    pub fn statistics(&self) -> TracerStatistics {
        let open = self.open.lock().unwrap();
        let completed = self.completed.lock().unwrap();

        let mut status_counts = std::collections::HashMap::new();
        let mut spans_by_type = std::collections::HashMap::new();
        let mut traces = std::collections::HashSet::new();
        let mut total_duration = Duration::ZERO;

        for span in completed.iter() {
            *status_counts.entry(status_label(span.status).to_string()).or_insert(0) += 1;
            *spans_by_type.entry(span_type(&span.name)).or_insert(0) += 1;
            traces.insert(span.trace_id.clone());
            total_duration += span.duration;
        }
        for span in open.iter() {
            *status_counts.entry(status_label(span.status).to_string()).or_insert(0) += 1;
            *spans_by_type.entry(span_type(&span.name)).or_insert(0) += 1;
            traces.insert(span.trace_id.clone());
        }

        let average_duration = if completed.is_empty() {
            Duration::ZERO
        } else {
            total_duration / completed.len() as u32
        };

        TracerStatistics {
            total_spans: open.len() + completed.len(),
            active_spans: open.len(),
            completed_spans: completed.len(),
            unique_traces: traces.len(),
            status_counts,
            spans_by_type,
            average_duration,
        }
    }
}

fn status_label(status: SpanStatus) -> &'static str {
    match status {
        SpanStatus::Unset => "unset",
        SpanStatus::Ok => "ok",
        SpanStatus::Error => "error",
    }
}
