use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::{AlertState, Severity};
use crate::error::PipelineError;

/// A data-driven parser for one monitoring tool's alert email format, loaded
/// once (with its siblings) from a versioned config rather than hand-coded
/// per source. Serializable so the active set can round-trip through
/// config_versioning's JSON-typed content column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    pub name: String,
    pub subject_pattern: Option<String>,
    pub body_patterns: Vec<String>,
    pub severity_map: HashMap<String, String>,
}

/// A compiled parser config ready to apply.
pub struct CompiledParser {
    pub name: String,
    subject_regex: Option<Regex>,
    body_regexes: Vec<Regex>,
    severity_map: HashMap<String, String>,
}

impl ParserConfig {
    pub fn compile(&self) -> Result<CompiledParser, PipelineError> {
        let subject_regex = self
            .subject_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()?;
        let body_regexes = self
            .body_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CompiledParser {
            name: self.name.clone(),
            subject_regex,
            body_regexes,
            severity_map: self.severity_map.clone(),
        })
    }
}

impl CompiledParser {
    /// Searches subject then each body pattern in turn, unioning all named
    /// capture groups found (later matches do not overwrite earlier ones).
    pub fn apply(&self, subject: &str, body: &str) -> HashMap<String, String> {
        let mut fields = HashMap::new();

        if let Some(re) = &self.subject_regex {
            collect_named_groups(re, subject, &mut fields);
        }
        for re in &self.body_regexes {
            collect_named_groups(re, body, &mut fields);
        }

        if let Some(raw_severity) = fields.get("severity") {
            if let Some(mapped) = self.severity_map.get(&raw_severity.to_lowercase()) {
                fields.insert("severity".to_string(), mapped.clone());
            }
        }

        fields
    }
}

fn collect_named_groups(regex: &Regex, text: &str, out: &mut HashMap<String, String>) {
    let Some(captures) = regex.captures(text) else {
        return;
    };
    for name in regex.capture_names().flatten() {
        if out.contains_key(name) {
            continue;
        }
        if let Some(m) = captures.name(name) {
            out.insert(name.to_string(), m.as_str().to_string());
        }
    }
}

/// Normalizes whatever the static or learning extractor produced through the
/// same lookup tables so downstream code only ever sees canonical values.
pub fn normalize_fields(raw: &HashMap<String, String>) -> (Option<Severity>, Option<AlertState>) {
    let severity = raw.get("severity").map(|s| Severity::normalize(s));
    let state = raw.get("state").map(|s| AlertState::normalize(s));
    (severity, state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_named_groups_from_subject_and_body() {
        let config = ParserConfig {
            name: "nagios".to_string(),
            subject_pattern: Some(r"(?i)\*\*\s*(?P<severity>\w+)\s*\*\*.*Host:\s*(?P<host>\S+)".to_string()),
            body_patterns: vec![r"(?i)Service:\s*(?P<service>\S+)".to_string()],
            severity_map: HashMap::new(),
        };
        let compiled = config.compile().unwrap();
        let fields = compiled.apply("** CRITICAL ** Host: web-01 is down", "Service: cpu_load\nmore text");
        assert_eq!(fields.get("severity").map(String::as_str), Some("CRITICAL"));
        assert_eq!(fields.get("host").map(String::as_str), Some("web-01"));
        assert_eq!(fields.get("service").map(String::as_str), Some("cpu_load"));
    }

    #[test]
    fn severity_map_normalizes_tool_specific_words() {
        let mut severity_map = HashMap::new();
        severity_map.insert("red".to_string(), "critical".to_string());
        let config = ParserConfig {
            name: "custom".to_string(),
            subject_pattern: Some(r"(?P<severity>\w+)".to_string()),
            body_patterns: vec![],
            severity_map,
        };
        let compiled = config.compile().unwrap();
        let fields = compiled.apply("RED", "");
        assert_eq!(fields.get("severity").map(String::as_str), Some("critical"));
    }
}
