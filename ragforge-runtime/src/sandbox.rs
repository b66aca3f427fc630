//! # Plugin Sandbox & PII Scanner (§4.6)
//!
//! Security heuristics run at plugin install and publish time: a dependency
//! and permission scanner producing a risk classification, a PII detector
//! over arbitrary JSON input, and a timeout wrapper around the actual
//! install step so a hung installer can't block the runtime indefinitely.

use crate::error::RuntimeError;
use regex::Regex;
use serde::Serialize;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

fn ssn_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap())
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(?:\(\d{3}\)\s?|\d{3}-)\d{3}-\d{4}\b").unwrap())
}

fn credit_card_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b").unwrap())
}

/// One PII category's findings in a scanned payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PiiTypeFinding {
    #[serde(rename = "type")]
    pub pii_type: String,
    pub count: usize,
    pub samples: Vec<String>,
}

/// Result of [`scan_for_pii`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PiiScanResult {
    pub detected: bool,
    pub types: Vec<PiiTypeFinding>,
    pub confidence: f64,
}

/// Scan the JSON serialization of `value` for email, US SSN, US phone, and
/// 16-digit credit-card patterns. `confidence` rises with the volume of
/// matches found and saturates at `1.0`; it is a heuristic signal for a
/// human reviewer, not a certainty.
pub fn scan_for_pii(value: &serde_json::Value) -> PiiScanResult {
    let content = value.to_string();
    let mut types = Vec::new();

    for (name, pattern) in [
        ("email", email_pattern()),
        ("ssn", ssn_pattern()),
        ("phone", phone_pattern()),
        ("creditCard", credit_card_pattern()),
    ] {
        let matches: Vec<&str> = pattern.find_iter(&content).map(|m| m.as_str()).collect();
        if !matches.is_empty() {
            types.push(PiiTypeFinding {
                pii_type: name.to_string(),
                count: matches.len(),
                samples: matches.iter().take(3).map(|s| s.to_string()).collect(),
            });
        }
    }

    let total_matches: usize = types.iter().map(|t| t.count).sum();
    let detected = !types.is_empty();
    let confidence = if detected { (0.5 + 0.1 * total_matches as f64).min(1.0) } else { 0.0 };

    PiiScanResult { detected, types, confidence }
}

/// A plugin package's declared dependencies and requested permissions, as
/// read from its manifest ahead of install or publish.
#[derive(Debug, Clone, Default)]
pub struct PluginManifest {
    pub dependencies: Vec<String>,
    pub permissions: Vec<String>,
}

/// Dependency substrings considered unsafe regardless of surrounding
/// package name (§4.6).
const SUSPICIOUS_DEPENDENCY_SUBSTRINGS: &[&str] = &["eval", "vm2", "child_process", "fs-extra", "shelljs"];

/// Permissions that alone justify a `high` risk classification (§4.6).
const HIGH_RISK_PERMISSIONS: &[&str] = &["filesystem:write", "network:external", "process:spawn", "system:admin"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Outcome of [`scan_manifest`]: a risk tier plus human-readable issues and
/// mitigations.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub risk: RiskLevel,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

fn is_wildcard_dependency(dep: &str) -> bool {
    let trimmed = dep.trim();
    trimmed == "*" || trimmed.ends_with("@*") || trimmed.ends_with('*')
}

/// Classify a plugin's risk from its declared dependencies and permissions.
/// `high` if any dependency matches the denylist or any permission is
/// high-risk; `medium` if only lesser warnings (e.g. a wildcard-pinned
/// dependency) were raised; `low` otherwise.
pub fn scan_manifest(manifest: &PluginManifest) -> ScanReport {
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();
    let mut high_risk = false;

    for dep in &manifest.dependencies {
        if let Some(hit) = SUSPICIOUS_DEPENDENCY_SUBSTRINGS.iter().find(|s| dep.contains(*s)) {
            high_risk = true;
            issues.push(format!("dependency '{dep}' matches suspicious pattern '{hit}'"));
            recommendations.push(format!("review dependency '{dep}' before installing"));
        } else if is_wildcard_dependency(dep) {
            issues.push(format!("dependency '{dep}' is wildcard-pinned"));
            recommendations.push(format!("pin '{dep}' to an exact version"));
        }
    }

    for perm in &manifest.permissions {
        if HIGH_RISK_PERMISSIONS.contains(&perm.as_str()) {
            high_risk = true;
            issues.push(format!("requests high-risk permission '{perm}'"));
            recommendations.push(format!("confirm '{perm}' is required before granting"));
        }
    }

    let risk = if high_risk {
        RiskLevel::High
    } else if !issues.is_empty() {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    ScanReport { risk, issues, recommendations }
}

/// Run `install` with a hard timeout (default 30s per §4.6), mapping a
/// timeout into [`RuntimeError::SandboxTimeout`] instead of leaving the
/// caller to guess why nothing happened. Never panics on timeout.
pub async fn run_sandboxed<F, Fut, T>(timeout: Duration, install: F) -> Result<T, RuntimeError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, RuntimeError>>,
{
    match tokio::time::timeout(timeout, install()).await {
        Ok(result) => result,
        Err(_) => Err(RuntimeError::SandboxTimeout {
            timeout_secs: timeout.as_secs(),
        }),
    }
}

pub const DEFAULT_SANDBOX_TIMEOUT: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_email_addresses() {
        let result = scan_for_pii(&serde_json::json!({"note": "contact support@example.com"}));
        assert!(result.detected);
        assert!(result.types.iter().any(|t| t.pii_type == "email"));
    }

    #[test]
    fn detects_us_ssn() {
        let result = scan_for_pii(&serde_json::json!("ssn: 123-45-6789"));
        assert!(result.types.iter().any(|t| t.pii_type == "ssn"));
    }

    #[test]
    fn detects_us_phone_number() {
        let result = scan_for_pii(&serde_json::json!("call (555) 123-4567"));
        assert!(result.types.iter().any(|t| t.pii_type == "phone"));
    }

    #[test]
    fn detects_sixteen_digit_credit_card() {
        let result = scan_for_pii(&serde_json::json!("card 4111 1111 1111 1111"));
        assert!(result.types.iter().any(|t| t.pii_type == "creditCard"));
    }

    #[test]
    fn clean_content_has_no_findings_and_zero_confidence() {
        let result = scan_for_pii(&serde_json::json!({"chunk": "just loader code"}));
        assert!(!result.detected);
        assert!(result.types.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn samples_are_capped_at_three() {
        let emails = (0..10).map(|i| format!("user{i}@example.com")).collect::<Vec<_>>().join(", ");
        let result = scan_for_pii(&serde_json::json!(emails));
        let email_finding = result.types.iter().find(|t| t.pii_type == "email").unwrap();
        assert_eq!(email_finding.count, 10);
        assert_eq!(email_finding.samples.len(), 3);
    }

    #[test]
    fn denylisted_dependency_substring_is_high_risk() {
        let manifest = PluginManifest {
            dependencies: vec!["shelljs".to_string()],
            permissions: vec![],
        };
        let report = scan_manifest(&manifest);
        assert_eq!(report.risk, RiskLevel::High);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn high_risk_permission_is_high_risk() {
        let manifest = PluginManifest {
            dependencies: vec![],
            permissions: vec!["process:spawn".to_string()],
        };
        assert_eq!(scan_manifest(&manifest).risk, RiskLevel::High);
    }

    #[test]
    fn wildcard_dependency_is_medium_risk() {
        let manifest = PluginManifest {
            dependencies: vec!["some-loader@*".to_string()],
            permissions: vec![],
        };
        assert_eq!(scan_manifest(&manifest).risk, RiskLevel::Medium);
    }

    #[test]
    fn clean_manifest_is_low_risk() {
        let manifest = PluginManifest {
            dependencies: vec!["serde@1.0.0".to_string()],
            permissions: vec!["network:internal".to_string()],
        };
        let report = scan_manifest(&manifest);
        assert_eq!(report.risk, RiskLevel::Low);
        assert!(report.issues.is_empty());
    }

    #[tokio::test]
    async fn sandboxed_install_succeeds_within_timeout() {
        let result: Result<i32, RuntimeError> =
            run_sandboxed(Duration::from_secs(1), || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn sandboxed_install_times_out() {
        let result: Result<i32, RuntimeError> = run_sandboxed(Duration::from_millis(10), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(42)
        })
        .await;
        assert!(matches!(result, Err(RuntimeError::SandboxTimeout { .. })));
    }
}
