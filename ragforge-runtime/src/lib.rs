//! # ragforge-runtime
//!
//! The operational layer around [`ragforge_core`]: observability (events,
//! tracing, metrics, SLOs), the marketplace registry client, plugin
//! sandboxing, and rate limiting.
//!
//! ## Overview
//!
//! - [`error`] — [`error::RuntimeError`], the taxonomy for everything in
//!   this crate.
//! - [`events`] — a structured, queryable log of pipeline lifecycle events.
//! - [`tracer`] — per-run span tracking with trace/span ids.
//! - [`metrics`] — counters, gauges, and percentile/stddev latency
//!   histograms per pipeline stage.
//! - [`slo`] — evaluates metrics against configured service-level
//!   objectives.
//! - [`marketplace`] — HTTP client for the plugin registry, with a
//!   TTL-cached plugin-info lookup.
//! - [`sandbox`] — PII and suspicious-dependency scanning plus a
//!   timeout-bounded install wrapper, run before a downloaded plugin is
//!   trusted.
//! - [`rate_limiter`] — sliding-window rate limiting over hashed
//!   identifiers.
//! - [`observer`] — composes [`events::EventLogger`], [`tracer::Tracer`],
//!   and [`metrics::PipelineMetrics`] into one
//!   `ragforge_core::executor::PipelineObserver` impl.

pub mod error;
pub mod events;
pub mod marketplace;
pub mod metrics;
pub mod observer;
pub mod rate_limiter;
pub mod sandbox;
pub mod slo;
pub mod tracer;

pub use error::RuntimeError;
pub use observer::RuntimeObserver;
