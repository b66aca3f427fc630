//! # Runtime observer (§4.3.5)
//!
//! Composes [`EventLogger`], [`Tracer`], and [`PipelineMetrics`] into a
//! single [`ragforge_core::executor::PipelineObserver`] implementation, so a
//! host process gets structured events, spans, and latency histograms out of
//! one object handed to `PipelineExecutor::new`, instead of wiring each
//! concern in separately.

use crate::events::{EventLogger, Severity};
use crate::metrics::PipelineMetrics;
use crate::tracer::Tracer;
use ragforge_core::CoreError;
use ragforge_core::executor::PipelineObserver;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Binds the three observability primitives to one pipeline run.
pub struct RuntimeObserver {
    events: EventLogger,
    tracer: Tracer,
    metrics: PipelineMetrics,
    open_spans: Mutex<HashMap<String, String>>,
}

impl RuntimeObserver {
    pub fn new(namespace: impl Into<String>, event_capacity: usize, max_completed_spans: usize) -> Self {
        let _ = namespace.into();
        Self {
            events: EventLogger::new(event_capacity),
            tracer: Tracer::new(max_completed_spans),
            metrics: PipelineMetrics::new(),
            open_spans: Mutex::new(HashMap::new()),
        }
    }

    pub fn events(&self) -> &EventLogger {
        &self.events
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }
}

impl PipelineObserver for RuntimeObserver {
    fn on_stage_start(&self, stage: &str) {
        let span_id = self.tracer.start_span(stage);
        self.open_spans.lock().unwrap().insert(stage.to_string(), span_id);
        self.events.log_stage_start(stage, chrono::Utc::now());
    }

    fn on_stage_end(&self, stage: &str, duration: Duration) {
        if let Some(span_id) = self.open_spans.lock().unwrap().remove(stage) {
            self.tracer.end_span(&span_id);
        }
        self.metrics.record_success(stage, duration.as_secs_f64() * 1000.0);
        self.events.log_stage_end(stage, duration, chrono::Utc::now());
    }

    fn on_plugin_error(&self, stage: &str, err: &CoreError) {
        if let Some(span_id) = self.open_spans.lock().unwrap().remove(stage) {
            self.tracer.record_exception(&span_id, err);
            self.tracer.end_span(&span_id);
        }
        self.metrics.record_failure(stage);
        self.events.log_plugin_error(stage, stage, err, chrono::Utc::now());
    }

    fn on_warning(&self, stage: &str, message: &str) {
        self.events.log_custom(
            Severity::Warning,
            "stage_warning",
            Some(stage),
            format!("stage {stage}: {message}"),
            serde_json::Value::Null,
            chrono::Utc::now(),
        );
    }

    fn on_progress(&self, stage: &str, completed: usize, total: usize) {
        self.events.log_custom(
            Severity::Debug,
            "stage_progress",
            Some(stage),
            format!("stage {stage}: {completed}/{total}"),
            serde_json::json!({"completed": completed, "total": total}),
            chrono::Utc::now(),
        );
    }
}
