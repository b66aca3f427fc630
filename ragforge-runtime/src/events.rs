//! # Event Logger (§4.4.1)
//!
//! A structured, queryable log of pipeline lifecycle events, correlated by a
//! per-session id — distinct from `tracing`'s unstructured diagnostic logs
//! used elsewhere in this crate. Events are the kind of thing a host process
//! might want to list or filter after the fact ("show me every
//! `plugin_error` event for the current session in the last hour");
//! `tracing` output is for humans watching a live stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Event severity, ordered least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// One structured event in the session's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub severity: Severity,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_type: Option<String>,
    pub message: String,
    pub metadata: serde_json::Value,
}

/// Filters accepted by [`EventLogger::get_event_history`] and
/// [`EventLogger::export_events`].
#[derive(Debug, Clone, Default)]
pub struct EventHistoryFilter {
    pub event_type: Option<String>,
    pub severity: Option<Severity>,
    pub plugin_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Keep only the last N matching events.
    pub limit: Option<usize>,
}

/// `{sessionId, eventCount, events}` as produced by
/// [`EventLogger::export_events`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedEvents {
    pub session_id: String,
    pub event_count: usize,
    pub events: Vec<Event>,
}

/// Describe the size of an input/result value per the spec's sized
/// descriptions: arrays carry `length`, strings carry `length` (in chars),
/// objects carry their key names, and null collapses to a bare object
/// descriptor. Any other JSON scalar (number, bool) also collapses to the
/// bare object descriptor — there is no size concept for a scalar.
pub fn describe_size(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Array(items) => serde_json::json!({"type": "array", "length": items.len()}),
        serde_json::Value::String(s) => serde_json::json!({"type": "string", "length": s.chars().count()}),
        serde_json::Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            serde_json::json!({"type": "object", "keys": keys})
        }
        _ => serde_json::json!({"type": "object"}),
    }
}

fn process_metadata() -> serde_json::Value {
    serde_json::json!({
        "pid": std::process::id(),
        "platform": std::env::consts::OS,
        "runtimeVersion": env!("CARGO_PKG_VERSION"),
    })
}

fn merge_metadata(mut base: serde_json::Value, extra: serde_json::Value) -> serde_json::Value {
    if let (Some(base_map), serde_json::Value::Object(extra_map)) = (base.as_object_mut(), extra) {
        base_map.extend(extra_map);
    }
    base
}

/// An in-memory, bounded ring of recent events correlated under one session
/// id. Not persisted — a host process that needs durable event history
/// should forward [`Event`]s at the call site instead of reaching into this
/// buffer after the fact.
pub struct EventLogger {
    session_id: Mutex<String>,
    events: Mutex<Vec<Event>>,
    capacity: usize,
}

impl EventLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            session_id: Mutex::new(Uuid::new_v4().to_string()),
            events: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Assign a fresh session id, unique per process invocation, and clear
    /// no prior history — events logged under the previous session remain
    /// queryable, now tagged with their original `sessionId`.
    pub fn start_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        *self.session_id.lock().unwrap() = id.clone();
        id
    }

    pub fn session_id(&self) -> String {
        self.session_id.lock().unwrap().clone()
    }

    fn push(
        &self,
        severity: Severity,
        event_type: &str,
        plugin_type: Option<&str>,
        message: impl Into<String>,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) {
        let message = message.into();
        match severity {
            Severity::Debug => tracing::debug!(event_type, "{}", message),
            Severity::Info => tracing::info!(event_type, "{}", message),
            Severity::Warning => tracing::warn!(event_type, "{}", message),
            Severity::Error => tracing::error!(event_type, "{}", message),
        }
        let mut events = self.events.lock().unwrap();
        if events.len() >= self.capacity {
            events.remove(0);
        }
        events.push(Event {
            timestamp: now,
            session_id: self.session_id(),
            severity,
            event_type: event_type.to_string(),
            plugin_type: plugin_type.map(str::to_string),
            message,
            metadata,
        });
    }

    pub fn log_plugin_start(&self, plugin_type: &str, plugin_name: &str, input: &serde_json::Value, now: DateTime<Utc>) {
        let metadata = merge_metadata(
            process_metadata(),
            serde_json::json!({"pluginName": plugin_name, "input": describe_size(input)}),
        );
        self.push(
            Severity::Info,
            "plugin_start",
            Some(plugin_type),
            format!("{plugin_type}:{plugin_name} started"),
            metadata,
            now,
        );
    }

    pub fn log_plugin_end(
        &self,
        plugin_type: &str,
        plugin_name: &str,
        result: &serde_json::Value,
        duration: Duration,
        now: DateTime<Utc>,
    ) {
        let metadata = merge_metadata(
            process_metadata(),
            serde_json::json!({
                "pluginName": plugin_name,
                "result": describe_size(result),
                "durationMs": duration.as_secs_f64() * 1000.0,
            }),
        );
        self.push(
            Severity::Info,
            "plugin_end",
            Some(plugin_type),
            format!("{plugin_type}:{plugin_name} completed"),
            metadata,
            now,
        );
    }

    pub fn log_plugin_error(&self, plugin_type: &str, plugin_name: &str, error: impl std::fmt::Display, now: DateTime<Utc>) {
        let metadata = merge_metadata(
            process_metadata(),
            serde_json::json!({"pluginName": plugin_name, "error": error.to_string()}),
        );
        self.push(
            Severity::Error,
            "plugin_error",
            Some(plugin_type),
            format!("{plugin_type}:{plugin_name} failed: {error}"),
            metadata,
            now,
        );
    }

    pub fn log_stage_start(&self, stage: &str, now: DateTime<Utc>) {
        self.push(
            Severity::Info,
            "stage_start",
            None,
            format!("stage {stage} started"),
            process_metadata(),
            now,
        );
    }

    pub fn log_stage_end(&self, stage: &str, duration: Duration, now: DateTime<Utc>) {
        let metadata = merge_metadata(
            process_metadata(),
            serde_json::json!({"durationMs": duration.as_secs_f64() * 1000.0}),
        );
        self.push(
            Severity::Info,
            "stage_end",
            None,
            format!("stage {stage} completed in {:.1}ms", duration.as_secs_f64() * 1000.0),
            metadata,
            now,
        );
    }

    pub fn log_memory_warning(&self, heap_used_bytes: u64, heap_total_bytes: u64, now: DateTime<Utc>) {
        let percentage = if heap_total_bytes == 0 {
            0.0
        } else {
            heap_used_bytes as f64 / heap_total_bytes as f64 * 100.0
        };
        let metadata = merge_metadata(
            process_metadata(),
            serde_json::json!({"heapUsed": heap_used_bytes, "heapTotal": heap_total_bytes, "heapPercentage": percentage}),
        );
        self.push(
            Severity::Warning,
            "memory_warning",
            None,
            format!("heap usage at {percentage:.1}%"),
            metadata,
            now,
        );
    }

    /// A catch-all for events outside the six named lifecycle methods
    /// (stage warnings, progress updates) — still correlated by session id
    /// and subject to the same capacity and query rules.
    pub fn log_custom(&self, severity: Severity, event_type: &str, plugin_type: Option<&str>, message: impl Into<String>, metadata: serde_json::Value, now: DateTime<Utc>) {
        self.push(severity, event_type, plugin_type, message, metadata, now);
    }

    /// Chronologically ordered events matching `filter`; `limit` keeps only
    /// the last N matches.
    pub fn get_event_history(&self, filter: &EventHistoryFilter) -> Vec<Event> {
        let matches: Vec<Event> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| filter.event_type.as_deref().map(|t| e.event_type == t).unwrap_or(true))
            .filter(|e| filter.severity.map(|s| e.severity == s).unwrap_or(true))
            .filter(|e| {
                filter
                    .plugin_type
                    .as_deref()
                    .map(|p| e.plugin_type.as_deref() == Some(p))
                    .unwrap_or(true)
            })
            .filter(|e| filter.since.map(|since| e.timestamp >= since).unwrap_or(true))
            .filter(|e| filter.until.map(|until| e.timestamp <= until).unwrap_or(true))
            .cloned()
            .collect();

        match filter.limit {
            Some(limit) if matches.len() > limit => matches[matches.len() - limit..].to_vec(),
            _ => matches,
        }
    }

    /// Deprecated narrow query used by call sites predating the full
    /// filter set; kept for the observer's stage-lifecycle bookkeeping.
    pub fn query(&self, plugin_type: Option<&str>, event_type: Option<&str>) -> Vec<Event> {
        self.get_event_history(&EventHistoryFilter {
            plugin_type: plugin_type.map(str::to_string),
            event_type: event_type.map(str::to_string),
            ..Default::default()
        })
    }

    pub fn export_events(&self, filter: &EventHistoryFilter) -> ExportedEvents {
        let events = self.get_event_history(filter);
        ExportedEvents {
            session_id: self.session_id(),
            event_count: events.len(),
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn describe_size_matches_spec_shapes() {
        assert_eq!(describe_size(&serde_json::json!([1, 2, 3])), serde_json::json!({"type":"array","length":3}));
        assert_eq!(describe_size(&serde_json::json!("hello")), serde_json::json!({"type":"string","length":5}));
        assert_eq!(describe_size(&serde_json::Value::Null), serde_json::json!({"type":"object"}));
        let described = describe_size(&serde_json::json!({"a":1,"b":2}));
        assert_eq!(described["type"], "object");
        assert_eq!(described["keys"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn log_plugin_lifecycle_carries_session_and_plugin_type() {
        let logger = EventLogger::new(100);
        let session = logger.start_session();
        logger.log_plugin_start("embedder", "openai-embed", &serde_json::json!(["a", "b"]), fixed_now());
        logger.log_plugin_end("embedder", "openai-embed", &serde_json::json!([[0.1]]), Duration::from_millis(5), fixed_now());

        let events = logger.get_event_history(&EventHistoryFilter { plugin_type: Some("embedder".to_string()), ..Default::default() });
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.session_id == session));
        assert_eq!(events[0].metadata["input"], serde_json::json!({"type":"array","length":2}));
    }

    #[test]
    fn log_plugin_error_is_error_severity() {
        let logger = EventLogger::new(100);
        logger.log_plugin_error("loader", "pdf-loader", "disk full", fixed_now());
        let events = logger.get_event_history(&EventHistoryFilter { severity: Some(Severity::Error), ..Default::default() });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "plugin_error");
    }

    #[test]
    fn get_event_history_limit_keeps_last_n() {
        let logger = EventLogger::new(100);
        for stage in ["load", "chunk", "embed"] {
            logger.log_stage_start(stage, fixed_now());
        }
        let events = logger.get_event_history(&EventHistoryFilter { limit: Some(2), ..Default::default() });
        assert_eq!(events.len(), 2);
        assert!(events[0].message.contains("chunk"));
        assert!(events[1].message.contains("embed"));
    }

    #[test]
    fn get_event_history_filters_by_since_and_until() {
        let logger = EventLogger::new(100);
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        logger.log_stage_start("load", early);
        logger.log_stage_start("embed", late);

        let since_filtered = logger.get_event_history(&EventHistoryFilter {
            since: Some(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()),
            ..Default::default()
        });
        assert_eq!(since_filtered.len(), 1);
        assert!(since_filtered[0].message.contains("embed"));
    }

    #[test]
    fn ring_buffer_drops_oldest_past_capacity() {
        let logger = EventLogger::new(2);
        logger.log_stage_start("a", fixed_now());
        logger.log_stage_start("b", fixed_now());
        logger.log_stage_start("c", fixed_now());
        let events = logger.get_event_history(&EventHistoryFilter::default());
        assert_eq!(events.len(), 2);
        assert!(events[0].message.contains('b'));
    }

    #[test]
    fn export_events_round_trips_event_list() {
        let logger = EventLogger::new(100);
        logger.log_memory_warning(900, 1000, fixed_now());
        let exported = logger.export_events(&EventHistoryFilter::default());
        assert_eq!(exported.event_count, 1);
        assert_eq!(exported.events[0].event_type, "memory_warning");
        assert_eq!(exported.session_id, logger.session_id());
    }

    #[test]
    fn start_session_changes_session_id() {
        let logger = EventLogger::new(10);
        let first = logger.session_id();
        let second = logger.start_session();
        assert_ne!(first, second);
        assert_eq!(logger.session_id(), second);
    }
}
