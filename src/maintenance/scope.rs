use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::store::types::IncidentRow;

/// Structured maintenance-window scope. An empty scope (every field empty)
/// matches everything — open-ended maintenance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub host_regex: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub service_regex: Option<String>,
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub check_names: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One dimension's match outcome, recorded whether or not it matched so the
/// stored match_reason covers every dimension that was actually checked.
#[derive(Debug, Clone, Serialize)]
pub struct DimensionCheck {
    pub field: String,
    pub pattern: String,
    pub value: Option<String>,
    pub matched: bool,
}

pub struct MatchOutcome {
    pub matches: bool,
    pub checks: Vec<DimensionCheck>,
}

/// Promotes a glob-style pattern (`*` any run, `?` single char) to an anchored,
/// case-insensitive regex if it contains wildcard characters.
fn wildcard_to_regex(pattern: &str) -> Option<Regex> {
    if !pattern.contains('*') && !pattern.contains('?') {
        return None;
    }
    let mut out = String::from("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c if regex_syntax::is_meta_character(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

fn value_matches_list(value: Option<&str>, patterns: &[String]) -> bool {
    let Some(value) = value else { return false };
    patterns.iter().any(|pattern| {
        if let Some(re) = wildcard_to_regex(pattern) {
            re.is_match(value)
        } else {
            pattern.eq_ignore_ascii_case(value)
        }
    })
}

fn value_matches_regex(value: Option<&str>, pattern: &Option<String>) -> bool {
    match (value, pattern) {
        (Some(value), Some(pattern)) => Regex::new(&format!("(?i){}", pattern))
            .map(|re| re.is_match(value))
            .unwrap_or(false),
        _ => false,
    }
}

fn check_dimension(
    field: &str,
    list: &[String],
    regex_pattern: &Option<String>,
    value: Option<&str>,
    checks: &mut Vec<DimensionCheck>,
) -> bool {
    if list.is_empty() && regex_pattern.is_none() {
        return true;
    }
    let by_list = value_matches_list(value, list);
    let by_regex = value_matches_regex(value, regex_pattern);
    let matched = by_list || by_regex;
    checks.push(DimensionCheck {
        field: field.to_string(),
        pattern: format!("{:?} / {:?}", list, regex_pattern),
        value: value.map(str::to_string),
        matched,
    });
    matched
}

fn check_set_dimension(field: &str, list: &[String], values: &[String], checks: &mut Vec<DimensionCheck>) -> bool {
    if list.is_empty() {
        return true;
    }
    let matched = values
        .iter()
        .any(|v| list.iter().any(|pattern| pattern.eq_ignore_ascii_case(v)));
    checks.push(DimensionCheck {
        field: field.to_string(),
        pattern: format!("{:?}", list),
        value: Some(values.join(",")),
        matched,
    });
    matched
}

/// Evaluates whether `incident` falls within `scope`, checking every
/// dimension (not short-circuiting on the first non-empty one) so the
/// recorded reason is a complete picture of what was evaluated.
pub fn matches(scope: &Scope, incident: &IncidentRow) -> MatchOutcome {
    let mut checks = Vec::new();

    let host_ok = check_dimension(
        "host",
        &scope.hosts,
        &scope.host_regex,
        incident.host.as_deref(),
        &mut checks,
    );
    let service_ok = check_dimension(
        "service",
        &scope.services,
        &scope.service_regex,
        incident.service.as_deref().or(incident.check_name.as_deref()),
        &mut checks,
    );
    let env_ok = {
        if scope.environments.is_empty() {
            true
        } else {
            let matched = value_matches_list(incident.environment.as_deref(), &scope.environments);
            checks.push(DimensionCheck {
                field: "environment".to_string(),
                pattern: format!("{:?}", scope.environments),
                value: incident.environment.clone(),
                matched,
            });
            matched
        }
    };
    let region_ok = {
        if scope.regions.is_empty() {
            true
        } else {
            let matched = value_matches_list(incident.region.as_deref(), &scope.regions);
            checks.push(DimensionCheck {
                field: "region".to_string(),
                pattern: format!("{:?}", scope.regions),
                value: incident.region.clone(),
                matched,
            });
            matched
        }
    };
    let check_name_ok = {
        if scope.check_names.is_empty() {
            true
        } else {
            let matched = value_matches_list(incident.check_name.as_deref(), &scope.check_names);
            checks.push(DimensionCheck {
                field: "check_name".to_string(),
                pattern: format!("{:?}", scope.check_names),
                value: incident.check_name.clone(),
                matched,
            });
            matched
        }
    };

    let matches = host_ok && service_ok && env_ok && region_ok && check_name_ok;

    MatchOutcome { matches, checks }
}

/// Adds a tags dimension check against the incident's tag list; split from
/// `matches` because `IncidentRow` carries tags separately from its core
/// identifying columns.
pub fn matches_with_tags(scope: &Scope, incident: &IncidentRow, incident_tags: &[String]) -> MatchOutcome {
    let mut outcome = matches(scope, incident);
    let tags_ok = check_set_dimension("tags", &scope.tags, incident_tags, &mut outcome.checks);
    outcome.matches = outcome.matches && tags_ok;
    outcome
}

mod regex_syntax {
    pub fn is_meta_character(c: char) -> bool {
        matches!(
            c,
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\'
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn incident(host: &str, environment: &str) -> IncidentRow {
        IncidentRow {
            id: Uuid::nil(),
            fingerprint: "fp".to_string(),
            fingerprint_v2: "fp2".to_string(),
            title: "title".to_string(),
            source_tool: None,
            environment: Some(environment.to_string()),
            region: None,
            host: Some(host.to_string()),
            check_name: None,
            service: None,
            severity_current: crate::domain::Severity::High,
            severity_max: crate::domain::Severity::High,
            last_state: crate::domain::AlertState::Firing,
            status: crate::domain::IncidentStatus::Open,
            first_seen_at: Utc::now(),
            last_seen_at: Utc::now(),
            event_count: 1,
            flap_count: 0,
            last_state_change_at: Utc::now(),
            resolved_at: None,
            resolution_reason: None,
            is_in_maintenance: false,
            maintenance_window_id: None,
            ai_enriched_at: None,
        }
    }

    #[test]
    fn empty_scope_matches_everything() {
        let scope = Scope::default();
        let outcome = matches(&scope, &incident("web-01", "prod"));
        assert!(outcome.matches);
    }

    #[test]
    fn wildcard_host_pattern_matches() {
        let scope = Scope {
            hosts: vec!["web-*".to_string()],
            ..Default::default()
        };
        assert!(matches(&scope, &incident("web-01", "prod")).matches);
        assert!(!matches(&scope, &incident("db-01", "prod")).matches);
    }

    #[test]
    fn environment_mismatch_fails_even_with_matching_host() {
        let scope = Scope {
            hosts: vec!["web-01".to_string()],
            environments: vec!["staging".to_string()],
            ..Default::default()
        };
        assert!(!matches(&scope, &incident("web-01", "prod")).matches);
    }
}
