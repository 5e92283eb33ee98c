use regex::Regex;

/// Default redaction rules applied before any text leaves the process: to the
/// advisory service, to a notifier payload, or into cached extraction rules.
const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    (r"(?i)\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b", "[EMAIL]"),
    (r"\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b", "[PHONE]"),
    (r"\b\+?1?[-.\s]?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b", "[PHONE]"),
    (r"\b\d{3}-\d{2}-\d{4}\b", "[SSN]"),
    (r"\b4[0-9]{12}(?:[0-9]{3})?\b", "[CARD]"),
    (r"\b5[1-5][0-9]{14}\b", "[CARD]"),
    (r"\b3[47][0-9]{13}\b", "[CARD]"),
    (r"\b6(?:011|5[0-9]{2})[0-9]{12}\b", "[CARD]"),
    (
        r#"(?i)(api[_-]?key|apikey)\s*[=:]\s*"?'?([a-zA-Z0-9_\-]{20,})"?'?"#,
        "$1=[REDACTED_KEY]",
    ),
    (
        r#"(?i)(secret[_-]?key|secretkey)\s*[=:]\s*"?'?([a-zA-Z0-9_\-]{20,})"?'?"#,
        "$1=[REDACTED_SECRET]",
    ),
    (
        r#"(?i)(access[_-]?token|accesstoken)\s*[=:]\s*"?'?([a-zA-Z0-9_\-.]{20,})"?'?"#,
        "$1=[REDACTED_TOKEN]",
    ),
    (
        r#"(?i)(password|passwd|pwd)\s*[=:]\s*"?'?(\S+?)"?'?"#,
        "$1=[REDACTED_PASSWORD]",
    ),
    (
        r"(?i)bearer\s+[a-zA-Z0-9\-_]+\.[a-zA-Z0-9\-_]+\.[a-zA-Z0-9\-_]+",
        "[REDACTED_JWT]",
    ),
    (
        r#"(?i)(aws[_-]?access[_-]?key[_-]?id)\s*[=:]\s*"?'?([A-Z0-9]{20})"?'?"#,
        "$1=[REDACTED_AWS_KEY]",
    ),
    (
        r#"(?i)(aws[_-]?secret[_-]?access[_-]?key)\s*[=:]\s*"?'?([a-zA-Z0-9/+=]{40})"?'?"#,
        "$1=[REDACTED_AWS_SECRET]",
    ),
    (
        r"(?i)-----BEGIN (?:RSA |EC |DSA )?PRIVATE KEY-----[\s\S]*?-----END (?:RSA |EC |DSA )?PRIVATE KEY-----",
        "[REDACTED_PRIVATE_KEY]",
    ),
    (
        r"(?i)(mysql|postgresql|postgres|mongodb|redis|amqp)://[^:]+:([^@]+)@",
        "$1://[user]:[REDACTED_PASSWORD]@",
    ),
    (
        r#"(?i)(secret|token|credential|auth)\s*[=:]\s*"?'?([a-zA-Z0-9_\-.]{16,})"?'?"#,
        "$1=[REDACTED]",
    ),
];

/// Parses the `pattern|replacement;pattern|replacement` env string format.
fn parse_extra_patterns(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|item| {
            let item = item.trim();
            if item.is_empty() {
                return None;
            }
            let (pattern, replacement) = item.split_once('|')?;
            Some((pattern.trim().to_string(), replacement.trim().to_string()))
        })
        .collect()
}

#[derive(Clone)]
struct Rule {
    regex: Regex,
    replacement: String,
}

/// Applies an ordered list of regex-replace rules to any string before egress.
#[derive(Clone)]
pub struct Redactor {
    rules: Vec<Rule>,
}

impl Redactor {
    pub fn new(extra_patterns: Option<&str>) -> Self {
        let extra = extra_patterns.map(parse_extra_patterns).unwrap_or_default();
        Self::from_pairs(&extra)
    }

    /// Builds from the hardcoded defaults plus an explicit (pattern, replacement)
    /// list, bypassing the `key|value;key|value` env string format. Used when
    /// the pairs came from config_versioning's JSON-typed content instead.
    pub fn from_pairs(extra: &[(String, String)]) -> Self {
        let mut rules = Vec::with_capacity(DEFAULT_PATTERNS.len() + extra.len());
        for (pattern, replacement) in DEFAULT_PATTERNS {
            match Regex::new(pattern) {
                Ok(regex) => rules.push(Rule {
                    regex,
                    replacement: replacement.to_string(),
                }),
                Err(err) => {
                    log::warn!("failed to compile default redaction pattern: {}", err);
                }
            }
        }

        for (pattern, replacement) in extra {
            match Regex::new(&format!("(?i){}", pattern)) {
                Ok(regex) => {
                    rules.push(Rule {
                        regex,
                        replacement: replacement.clone(),
                    });
                    log::info!("loaded custom redaction pattern: {}", &pattern[..pattern.len().min(50)]);
                }
                Err(err) => {
                    log::warn!("failed to compile custom redaction pattern {}: {}", pattern, err);
                }
            }
        }

        log::info!("redactor initialized with {} patterns", rules.len());
        Self { rules }
    }

    /// Consults config_versioning for an active `redaction_patterns` version;
    /// seeds it from `REDACTION_PATTERNS` the first time the crate runs
    /// against a given database.
    pub async fn load_active_or_seed(
        store: &crate::store::Store,
        extra_patterns: Option<&str>,
    ) -> Result<Self, crate::error::PipelineError> {
        use crate::config_versioning::{self, CONFIG_TYPE_REDACTION_PATTERNS};

        match config_versioning::active(store, CONFIG_TYPE_REDACTION_PATTERNS).await? {
            Some(version) => {
                let pairs: Vec<(String, String)> = serde_json::from_value(version.content).map_err(|e| {
                    crate::error::PipelineError::ValidationFailed(format!(
                        "stored redaction_patterns config is malformed: {}",
                        e
                    ))
                })?;
                Ok(Self::from_pairs(&pairs))
            }
            None => {
                let pairs = extra_patterns.map(parse_extra_patterns).unwrap_or_default();
                let content = serde_json::to_value(&pairs).map_err(|e| {
                    crate::error::PipelineError::ValidationFailed(format!(
                        "failed to serialize redaction patterns: {}",
                        e
                    ))
                })?;
                config_versioning::publish(
                    store,
                    CONFIG_TYPE_REDACTION_PATTERNS,
                    &content,
                    Some("startup"),
                    Some("seeded from REDACTION_PATTERNS env"),
                )
                .await?;
                Ok(Self::from_pairs(&pairs))
            }
        }
    }

    pub fn redact(&self, text: &str) -> String {
        if text.is_empty() {
            return text.to_string();
        }
        let mut result = text.to_string();
        for rule in &self.rules {
            result = rule.regex.replace_all(&result, rule.replacement.as_str()).into_owned();
        }
        result
    }

    /// Redacts a subject/body pair together, the shape every egress path
    /// (LLM prompts, advisory payloads, notifier messages) needs.
    pub fn redact_email(&self, subject: &str, body: &str) -> (String, String) {
        (self.redact(subject), self.redact(body))
    }

    /// Redact and report how many matches each rule produced, keyed by the
    /// bracket-stripped, lowercased replacement label (telemetry only).
    pub fn redact_with_stats(&self, text: &str) -> (String, std::collections::HashMap<String, usize>) {
        let mut stats = std::collections::HashMap::new();
        if text.is_empty() {
            return (text.to_string(), stats);
        }
        let mut result = text.to_string();
        for rule in &self.rules {
            let count = rule.regex.find_iter(&result).count();
            if count > 0 {
                let key = rule
                    .replacement
                    .trim_matches(|c| c == '[' || c == ']')
                    .to_lowercase();
                *stats.entry(key).or_insert(0) += count;
                result = rule.regex.replace_all(&result, rule.replacement.as_str()).into_owned();
            }
        }
        (result, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_email_addresses() {
        let redactor = Redactor::new(None);
        let out = redactor.redact("contact ops@example.com for details");
        assert!(out.contains("[EMAIL]"));
        assert!(!out.contains("ops@example.com"));
    }

    #[test]
    fn redacts_password_assignment() {
        let redactor = Redactor::new(None);
        let out = redactor.redact("password=hunter2");
        assert!(out.contains("[REDACTED_PASSWORD]"));
    }

    #[test]
    fn custom_pattern_from_env_format_is_applied() {
        let redactor = Redactor::new(Some(r"internal-\d+|[INTERNAL_ID]"));
        let out = redactor.redact("ticket internal-42 opened");
        assert_eq!(out, "ticket [INTERNAL_ID] opened");
    }

    #[test]
    fn empty_input_is_a_no_op() {
        let redactor = Redactor::new(None);
        assert_eq!(redactor.redact(""), "");
    }
}
