//! # Configuration Normalizer & Version Resolver
//!
//! Accepts either the legacy or enhanced `.ragrc.json` shape (§4.2, §6) and
//! produces exactly one canonical [`PipelineConfig`]. The normalizer never
//! touches the filesystem — the external CLI reads `.ragrc.json` and hands
//! the parsed [`serde_json::Value`] in, matching §1's "out of scope: the
//! CLI front-end... `.ragrc.json` file I/O."

use crate::error::CoreError;
use crate::model::{
    PipelineConfig, PipelineSection, PipelineStageEntry, PluginKind, PluginSpec, PluginSpecObject,
    RetryOptions,
};
use serde_json::Value;
use std::collections::HashMap;

/// Normalizes legacy and enhanced `.ragrc.json` shapes into one canonical form.
pub struct Normalizer;

impl Normalizer {
    /// Normalize a parsed config document. Idempotent:
    /// `normalize(normalize(cfg).to_value()) == normalize(cfg)`.
    pub fn normalize(input: &Value) -> Result<PipelineConfig, CoreError> {
        let obj = input.as_object().ok_or_else(|| {
            CoreError::invalid_input("configuration must be a non-null object")
        })?;

        let namespace = obj
            .get("namespace")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string();

        let is_enhanced = obj.contains_key("plugins")
            && obj
                .get("pipeline")
                .map(|p| p.is_object())
                .unwrap_or(true);

        let plugins = if is_enhanced {
            Self::normalize_enhanced_plugins(obj)
        } else {
            Self::normalize_legacy_plugins(obj)
        };

        let pipeline = Self::normalize_pipeline(obj);

        Ok(PipelineConfig {
            namespace,
            plugins,
            pipeline,
            performance: obj.get("performance").cloned().unwrap_or(Value::Null),
            observability: obj.get("observability").cloned().unwrap_or(Value::Null),
            metadata: obj.get("metadata").cloned().unwrap_or(Value::Null),
            cache: obj.get("cache").cloned().unwrap_or(Value::Null),
            limits: obj.get("limits").cloned().unwrap_or(Value::Null),
            storage: obj.get("storage").cloned().unwrap_or(Value::Null),
        })
    }

    fn normalize_enhanced_plugins(
        obj: &serde_json::Map<String, Value>,
    ) -> HashMap<String, HashMap<String, PluginSpecObject>> {
        let mut result = HashMap::new();
        let Some(plugins) = obj.get("plugins").and_then(Value::as_object) else {
            return result;
        };
        for kind in PluginKind::CANONICAL_ORDER {
            let Some(by_name) = plugins.get(kind.as_str()).and_then(Value::as_object) else {
                continue;
            };
            let mut names = HashMap::new();
            for (name, spec_value) in by_name {
                if let Ok(spec) = serde_json::from_value::<PluginSpec>(spec_value.clone()) {
                    names.insert(name.clone(), spec.normalize());
                }
            }
            result.insert(kind.as_str().to_string(), names);
        }
        result
    }

    /// Legacy shape: top-level `loader|embedder|retriever|llm|reranker`, each
    /// mapping name → bare identifier string, projected in canonical kind
    /// order (§4.2 rule 4).
    fn normalize_legacy_plugins(
        obj: &serde_json::Map<String, Value>,
    ) -> HashMap<String, HashMap<String, PluginSpecObject>> {
        let mut result = HashMap::new();
        for kind in PluginKind::CANONICAL_ORDER {
            let Some(by_name) = obj.get(kind.as_str()).and_then(Value::as_object) else {
                continue;
            };
            let mut names = HashMap::new();
            for (local_name, identifier) in by_name {
                let bare = identifier.as_str().unwrap_or(local_name).to_string();
                names.insert(local_name.clone(), PluginSpecObject::new(bare));
            }
            result.insert(kind.as_str().to_string(), names);
        }
        result
    }

    fn normalize_pipeline(obj: &serde_json::Map<String, Value>) -> PipelineSection {
        let Some(pipeline_value) = obj.get("pipeline") else {
            return PipelineSection::default();
        };

        let stages = match pipeline_value {
            // Legacy: ordered array of kind names.
            Value::Array(arr) => arr
                .iter()
                .filter_map(Value::as_str)
                .map(|kind| PipelineStageEntry {
                    stage: kind.to_string(),
                    name: kind.to_string(),
                    options: HashMap::new(),
                })
                .collect(),
            // Enhanced: `{ stages: [...], retries, timeout }`.
            Value::Object(pipeline_obj) => pipeline_obj
                .get("stages")
                .and_then(Value::as_array)
                .map(|arr| Self::normalize_stage_entries(arr))
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        let (retries, timeout_ms) = match pipeline_value {
            Value::Object(pipeline_obj) => {
                let retries = pipeline_obj
                    .get("retries")
                    .and_then(|r| serde_json::from_value::<RetryOptions>(r.clone()).ok())
                    .unwrap_or_default();
                let timeout_ms = pipeline_obj.get("timeout").and_then(Value::as_u64);
                (retries, timeout_ms)
            }
            _ => (RetryOptions::default(), None),
        };

        PipelineSection {
            stages,
            retries,
            timeout_ms,
        }
    }

    fn normalize_stage_entries(arr: &[Value]) -> Vec<PipelineStageEntry> {
        arr.iter()
            .filter_map(|entry| match entry {
                // Bare stage name string (shorthand).
                Value::String(s) => Some(PipelineStageEntry {
                    stage: s.clone(),
                    name: s.clone(),
                    options: HashMap::new(),
                }),
                Value::Object(map) => {
                    let stage = map.get("stage").and_then(Value::as_str)?;
                    let name = map.get("name").and_then(Value::as_str).unwrap_or(stage);
                    let options = map
                        .iter()
                        .filter(|(k, _)| k.as_str() != "stage" && k.as_str() != "name")
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    Some(PipelineStageEntry {
                        stage: stage.to_string(),
                        name: name.to_string(),
                        options,
                    })
                }
                _ => None,
            })
            .collect()
    }

    /// §4.2 consistency check: every stage has a configured plugin of that
    /// kind, and every fallback references an existing sibling.
    pub fn validate_consistency(config: &PipelineConfig) -> Result<(), CoreError> {
        for stage in &config.pipeline.stages {
            let kind = stage.stage.parse::<PluginKind>().map_err(|_| {
                CoreError::Configuration {
                    message: format!("unknown pipeline stage kind: {}", stage.stage),
                }
            })?;
            let by_name = config.kind_plugins(kind).filter(|m| !m.is_empty());
            if by_name.is_none() {
                return Err(CoreError::Configuration {
                    message: format!(
                        "pipeline stage '{}' has no configured plugins",
                        stage.stage
                    ),
                });
            }
        }

        for (kind, by_name) in &config.plugins {
            for (name, spec) in by_name {
                if let Some(fallback) = &spec.fallback {
                    if !by_name.contains_key(fallback) {
                        return Err(CoreError::Configuration {
                            message: format!(
                                "fallback '{fallback}' for {kind}/{name} does not exist in the same kind"
                            ),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// Selects a concrete version from a set of available versions (§4.2).
pub struct VersionResolver;

impl VersionResolver {
    /// Resolve `requested` against `available`. Exact versions match
    /// exactly; `"latest"` and SemVer ranges select the highest matching
    /// available version; non-SemVer strings fall back to a lexicographic
    /// comparison with a logged warning.
    pub fn resolve(requested: &str, available: &[String]) -> Result<String, CoreError> {
        if available.is_empty() {
            return Err(CoreError::Configuration {
                message: "no available versions to resolve against".to_string(),
            });
        }

        if requested == "latest" {
            return Self::highest(available).ok_or_else(|| CoreError::Configuration {
                message: "could not determine latest version".to_string(),
            });
        }

        if available.iter().any(|v| v == requested) {
            return Ok(requested.to_string());
        }

        if let Ok(req) = semver::VersionReq::parse(requested) {
            let mut matching: Vec<&String> = available
                .iter()
                .filter(|v| {
                    semver::Version::parse(v)
                        .map(|parsed| req.matches(&parsed))
                        .unwrap_or(false)
                })
                .collect();
            matching.sort_by(|a, b| {
                let va = semver::Version::parse(a).ok();
                let vb = semver::Version::parse(b).ok();
                va.cmp(&vb)
            });
            if let Some(best) = matching.last() {
                return Ok((*best).clone());
            }
            return Err(CoreError::Configuration {
                message: format!("no available version satisfies range '{requested}'"),
            });
        }

        tracing::warn!(
            "version '{requested}' is not exact, 'latest', or a valid SemVer range; \
             falling back to lexicographic-highest available version"
        );
        Self::highest(available).ok_or_else(|| CoreError::Configuration {
            message: "could not determine fallback version".to_string(),
        })
    }

    fn highest(available: &[String]) -> Option<String> {
        let mut parsed: Vec<(semver::Version, &String)> = available
            .iter()
            .filter_map(|v| semver::Version::parse(v).ok().map(|p| (p, v)))
            .collect();
        if !parsed.is_empty() {
            parsed.sort_by(|a, b| a.0.cmp(&b.0));
            return parsed.last().map(|(_, v)| (*v).clone());
        }
        available.iter().max().cloned()
    }
}
