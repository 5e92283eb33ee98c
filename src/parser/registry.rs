use std::collections::HashMap;

use parking_lot::RwLock;

use super::static_parser::{CompiledParser, ParserConfig};
use super::ExtractedFields;
use crate::error::PipelineError;

fn default_configs() -> Vec<ParserConfig> {
    let mut nagios_severity = HashMap::new();
    nagios_severity.insert("critical".to_string(), "critical".to_string());
    nagios_severity.insert("warning".to_string(), "medium".to_string());
    nagios_severity.insert("ok".to_string(), "info".to_string());

    vec![
        ParserConfig {
            name: "nagios".to_string(),
            subject_pattern: Some(
                r"(?i)\*\*\s*(?P<severity>\w+)\s*\*\*.*?Host:\s*(?P<host>\S+).*?Service:\s*(?P<service>[^\*]+)"
                    .to_string(),
            ),
            body_patterns: vec![r"(?i)State:\s*(?P<state>\w+)".to_string()],
            severity_map: nagios_severity,
        },
        ParserConfig {
            name: "zabbix".to_string(),
            subject_pattern: Some(
                r"(?i)Problem:\s*(?P<service>.+?)\s+on\s+(?P<host>\S+)".to_string(),
            ),
            body_patterns: vec![
                r"(?i)Severity:\s*(?P<severity>\w+)".to_string(),
                r"(?i)Status:\s*(?P<state>\w+)".to_string(),
            ],
            severity_map: HashMap::new(),
        },
        ParserConfig {
            name: "prometheus".to_string(),
            subject_pattern: Some(r"(?i)\[(?P<severity>FIRING|RESOLVED)\]".to_string()),
            body_patterns: vec![
                r"(?i)instance\s*=\s*\"?(?P<host>[^\"\s]+)".to_string(),
                r"(?i)alertname\s*=\s*\"?(?P<service>[^\"\s]+)".to_string(),
            ],
            severity_map: HashMap::new(),
        },
    ]
}

/// Data-driven registry of per-source parser configs, replacing a
/// per-source-tool function with `{source_tool -> {subject_regex, body_regexes[], severity_map}}`
/// loaded once from versioned config. Falls back to a small built-in default
/// set until a config_versioning entry is activated.
pub struct ParserRegistry {
    compiled: RwLock<Vec<CompiledParser>>,
}

impl ParserRegistry {
    pub fn from_configs(configs: Vec<ParserConfig>) -> Result<Self, PipelineError> {
        let compiled = configs
            .into_iter()
            .map(|c| c.compile())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { compiled: RwLock::new(compiled) })
    }

    pub fn with_defaults() -> Self {
        Self::from_configs(default_configs()).expect("built-in parser configs compile")
    }

    /// Consults config_versioning for an active `parser_registry` version at
    /// startup; seeds it from the built-in defaults the first time the crate
    /// runs against a given database.
    pub async fn load_active_or_seed(store: &crate::store::Store) -> Result<Self, PipelineError> {
        use crate::config_versioning::{self, CONFIG_TYPE_PARSER_REGISTRY};

        match config_versioning::active(store, CONFIG_TYPE_PARSER_REGISTRY).await? {
            Some(version) => {
                let configs: Vec<ParserConfig> = serde_json::from_value(version.content)
                    .map_err(|e| PipelineError::ValidationFailed(format!("stored parser_registry config is malformed: {}", e)))?;
                Self::from_configs(configs)
            }
            None => {
                let configs = default_configs();
                let content = serde_json::to_value(&configs)
                    .map_err(|e| PipelineError::ValidationFailed(format!("failed to serialize default parser configs: {}", e)))?;
                config_versioning::publish(store, CONFIG_TYPE_PARSER_REGISTRY, &content, Some("startup"), Some("seeded from built-in defaults")).await?;
                Self::from_configs(configs)
            }
        }
    }

    /// Replaces the active parser set, e.g. after a config_versioning rollback
    /// or activation.
    pub fn reload(&self, configs: Vec<ParserConfig>) -> Result<(), PipelineError> {
        let compiled = configs
            .into_iter()
            .map(|c| c.compile())
            .collect::<Result<Vec<_>, _>>()?;
        *self.compiled.write() = compiled;
        Ok(())
    }

    /// Tries every registered parser in turn, returning the first that yields
    /// an identifiable host or service.
    pub fn try_all(&self, subject: &str, body: &str) -> Option<(String, ExtractedFields)> {
        for parser in self.compiled.read().iter() {
            let raw = parser.apply(subject, body);
            if raw.is_empty() {
                continue;
            }
            let fields = ExtractedFields {
                host: raw.get("host").cloned(),
                service: raw.get("service").cloned(),
                severity: raw.get("severity").cloned(),
                state: raw.get("state").cloned(),
                summary: None,
            }
            .sanitized();
            if fields.has_identification() {
                return Some((parser.name.clone(), fields));
            }
        }
        None
    }
}

pub fn configs_to_json(configs: &[ParserConfig]) -> serde_json::Value {
    serde_json::json!(configs
        .iter()
        .map(|c| serde_json::json!({
            "name": c.name,
            "subject_pattern": c.subject_pattern,
            "body_patterns": c.body_patterns,
            "severity_map": c.severity_map,
        }))
        .collect::<Vec<_>>())
}

pub fn configs_from_json(value: &serde_json::Value) -> Vec<ParserConfig> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            Some(ParserConfig {
                name: item.get("name")?.as_str()?.to_string(),
                subject_pattern: item.get("subject_pattern").and_then(|v| v.as_str()).map(String::from),
                body_patterns: item
                    .get("body_patterns")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|p| p.as_str().map(String::from)).collect())
                    .unwrap_or_default(),
                severity_map: item
                    .get("severity_map")
                    .and_then(|v| v.as_object())
                    .map(|obj| {
                        obj.iter()
                            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                            .collect()
                    })
                    .unwrap_or_default(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_matches_nagios_style_subject() {
        let registry = ParserRegistry::with_defaults();
        let result = registry.try_all(
            "** CRITICAL ** Host: web-01 is down Service: disk_space **",
            "State: HARD",
        );
        assert!(result.is_some());
        let (name, fields) = result.unwrap();
        assert_eq!(name, "nagios");
        assert_eq!(fields.host.as_deref(), Some("web-01"));
    }

    #[test]
    fn registry_returns_none_for_unrecognized_format() {
        let registry = ParserRegistry::with_defaults();
        assert!(registry.try_all("random subject", "random body").is_none());
    }
}
