//! # SLO Monitor (§4.4.4)
//!
//! Tracks named service-level objectives against a rolling window of
//! success/failure measurements and reports error-budget consumption.
//! Unlike [`crate::metrics::PipelineMetrics`], which records latency and
//! raw counts, an SLO here is an explicit target with its own measurement
//! window — a host process decides what counts as a "success" for a given
//! SLO and calls [`SloMonitor::record_measurement`] accordingly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A named objective: `target` success ratio in `(0, 1]`, the rolling
/// `measurement_window` over which SLI is computed, the total `error_budget`
/// (in SLI points) allotted, and the `alert_threshold` below which a breach
/// alert fires.
#[derive(Debug, Clone, Copy)]
pub struct SloDefinition {
    pub target: f64,
    pub measurement_window: Duration,
    pub error_budget: f64,
    pub alert_threshold: f64,
}

struct Measurement {
    at: Instant,
    success: bool,
    #[allow(dead_code)]
    metadata: serde_json::Value,
}

struct SloState {
    definition: SloDefinition,
    measurements: Vec<Measurement>,
}

/// Emitted by [`SloMonitor::record_measurement`] when a recorded measurement
/// pushes the SLI below the SLO's `alert_threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct SloAlert {
    pub slo_name: String,
    pub current_sli: f64,
    pub message: String,
}

/// Result of [`SloMonitor::get_error_budget`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorBudgetReport {
    pub target: f64,
    pub current: f64,
    pub error_budget_used: f64,
    pub error_budget_remaining: f64,
    pub error_budget_percentage: f64,
}

/// A registry of named SLOs, each with its own measurement history.
pub struct SloMonitor {
    slos: Mutex<HashMap<String, SloState>>,
}

impl Default for SloMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SloMonitor {
    pub fn new() -> Self {
        Self {
            slos: Mutex::new(HashMap::new()),
        }
    }

    pub fn define_slo(&self, name: impl Into<String>, definition: SloDefinition) {
        self.slos.lock().unwrap().insert(
            name.into(),
            SloState {
                definition,
                measurements: Vec::new(),
            },
        );
    }

    /// Append a timestamped result for `slo_name`. Returns an alert if the
    /// resulting SLI falls below the SLO's `alert_threshold`. A measurement
    /// for an undefined SLO is silently dropped — callers that need to know
    /// about that should check [`SloMonitor::calculate_sli`] separately.
    pub fn record_measurement(&self, slo_name: &str, success: bool, metadata: serde_json::Value) -> Option<SloAlert> {
        let mut slos = self.slos.lock().unwrap();
        let state = slos.get_mut(slo_name)?;
        state.measurements.push(Measurement {
            at: Instant::now(),
            success,
            metadata,
        });
        prune(state);
        let sli = calculate_sli_locked(state);
        if sli < state.definition.alert_threshold {
            Some(SloAlert {
                slo_name: slo_name.to_string(),
                current_sli: sli,
                message: format!(
                    "SLO '{slo_name}' SLI {sli:.4} fell below alert threshold {:.4}",
                    state.definition.alert_threshold
                ),
            })
        } else {
            None
        }
    }

    /// Success ratio over the SLO's measurement window, or `1.0` if there
    /// are no in-window measurements (an unmeasured SLO is assumed healthy).
    pub fn calculate_sli(&self, slo_name: &str) -> f64 {
        let mut slos = self.slos.lock().unwrap();
        let Some(state) = slos.get_mut(slo_name) else {
            return 1.0;
        };
        prune(state);
        calculate_sli_locked(state)
    }

    pub fn get_error_budget(&self, slo_name: &str) -> Option<ErrorBudgetReport> {
        let mut slos = self.slos.lock().unwrap();
        let state = slos.get_mut(slo_name)?;
        prune(state);
        let current = calculate_sli_locked(state);
        let target = state.definition.target;
        let error_budget = state.definition.error_budget;
        let error_budget_used = (target - current).max(0.0);
        let error_budget_remaining = error_budget - error_budget_used;
        let error_budget_percentage = if error_budget == 0.0 {
            0.0
        } else {
            (error_budget_remaining / error_budget) * 100.0
        };
        Some(ErrorBudgetReport {
            target,
            current,
            error_budget_used,
            error_budget_remaining,
            error_budget_percentage,
        })
    }
}

fn prune(state: &mut SloState) {
    let window = state.definition.measurement_window;
    let now = Instant::now();
    state.measurements.retain(|m| now.duration_since(m.at) <= window);
}

fn calculate_sli_locked(state: &SloState) -> f64 {
    if state.measurements.is_empty() {
        return 1.0;
    }
    let successes = state.measurements.iter().filter(|m| m.success).count();
    successes as f64 / state.measurements.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn availability_slo() -> SloDefinition {
        SloDefinition {
            target: 0.99,
            measurement_window: Duration::from_secs(3600),
            error_budget: 0.01,
            alert_threshold: 0.95,
        }
    }

    #[test]
    fn unmeasured_slo_has_sli_one() {
        let monitor = SloMonitor::new();
        monitor.define_slo("availability", availability_slo());
        assert_eq!(monitor.calculate_sli("availability"), 1.0);
    }

    #[test]
    fn calculate_sli_is_success_ratio() {
        let monitor = SloMonitor::new();
        monitor.define_slo("availability", availability_slo());
        for success in [true, true, true, false] {
            monitor.record_measurement("availability", success, serde_json::Value::Null);
        }
        assert_eq!(monitor.calculate_sli("availability"), 0.75);
    }

    #[test]
    fn alert_fires_when_sli_drops_below_threshold() {
        let monitor = SloMonitor::new();
        monitor.define_slo("availability", availability_slo());
        for _ in 0..3 {
            monitor.record_measurement("availability", true, serde_json::Value::Null);
        }
        let alert = monitor.record_measurement("availability", false, serde_json::Value::Null);
        assert!(alert.is_none(), "3/4 success still above 0.95 threshold? got {:?}", alert);

        // push further below threshold
        for _ in 0..10 {
            monitor.record_measurement("availability", false, serde_json::Value::Null);
        }
        let alert = monitor.record_measurement("availability", false, serde_json::Value::Null);
        assert!(alert.is_some());
        assert_eq!(alert.unwrap().slo_name, "availability");
    }

    #[test]
    fn error_budget_reflects_deficit_below_target() {
        let monitor = SloMonitor::new();
        monitor.define_slo("availability", availability_slo());
        for success in [true, true, true, true, false] {
            monitor.record_measurement("availability", success, serde_json::Value::Null);
        }
        // current sli = 0.8, target 0.99 -> used = 0.19, budget 0.01 -> remaining negative
        let budget = monitor.get_error_budget("availability").unwrap();
        assert!((budget.current - 0.8).abs() < 1e-9);
        assert!((budget.error_budget_used - 0.19).abs() < 1e-9);
        assert!(budget.error_budget_remaining < 0.0);
    }

    #[test]
    fn error_budget_is_full_when_sli_meets_target() {
        let monitor = SloMonitor::new();
        monitor.define_slo("availability", availability_slo());
        monitor.record_measurement("availability", true, serde_json::Value::Null);
        let budget = monitor.get_error_budget("availability").unwrap();
        assert_eq!(budget.error_budget_used, 0.0);
        assert_eq!(budget.error_budget_remaining, budget.target * 0.0 + 0.01);
        assert_eq!(budget.error_budget_percentage, 100.0);
    }

    #[test]
    fn undefined_slo_measurement_is_dropped_silently() {
        let monitor = SloMonitor::new();
        assert!(monitor.record_measurement("nonexistent", true, serde_json::Value::Null).is_none());
        assert_eq!(monitor.calculate_sli("nonexistent"), 1.0);
        assert!(monitor.get_error_budget("nonexistent").is_none());
    }

    #[test]
    fn measurements_outside_window_are_pruned() {
        let monitor = SloMonitor::new();
        monitor.define_slo(
            "fast-window",
            SloDefinition {
                target: 0.99,
                measurement_window: Duration::from_millis(0),
                error_budget: 0.01,
                alert_threshold: 0.5,
            },
        );
        monitor.record_measurement("fast-window", false, serde_json::Value::Null);
        std::thread::sleep(Duration::from_millis(5));
        // the failed measurement should now be outside the zero-length window
        assert_eq!(monitor.calculate_sli("fast-window"), 1.0);
    }
}
