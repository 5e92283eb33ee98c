use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::json_repair::extract_and_repair_json;
use super::{ExtractedFields, ExtractionRuleSet};
use crate::domain::{ExtractionType, QuarantineReason};
use crate::error::PipelineError;
use crate::redactor::Redactor;
use crate::store::Store;

/// Above this confidence an LLM extraction is trusted and cached for reuse.
pub const CONFIDENCE_THRESHOLD: f64 = 0.75;
/// Below this confidence an extraction is quarantined instead of applied.
pub const QUARANTINE_THRESHOLD: f64 = 0.4;

static AT_DOMAIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@([\w.-]+)").unwrap());
static SUBJECT_BRACKET_NUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\d+\]").unwrap());
static SUBJECT_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap());
static SUBJECT_DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

const BODY_MARKERS: &[&str] = &[
    "severity", "status", "alert", "host:", "service:", "critical", "warning", "problem",
    "recovery", "impact", "duration", "opened", "closed",
];

const EXTRACTION_PROMPT: &str = r#"You are an alert email parser. Analyze this monitoring alert email and extract structured information.

Subject: {subject}

Body:
{body}

Respond with a JSON object containing:
{{
  "source_name": "name of the monitoring tool (e.g. Nagios, Zabbix, Datadog)",
  "confidence": 0.0-1.0,
  "extracted": {{
    "host": "hostname or null",
    "service": "service/check name or null",
    "severity": "critical/high/medium/low/info or null",
    "state": "firing/resolved or null",
    "summary": "brief one-line summary or null"
  }},
  "extraction_rules": {{
    "host": {{"source": "subject|body", "regex": "...", "group": 1, "normalize": {{}}}},
    "service": {{...}},
    "severity": {{...}},
    "state": {{...}}
  }}
}}

Rules:
- In JSON, escape backslashes as \\\\ (e.g., "\\\\d+" for digits, "\\\\s+" for whitespace)
- Do NOT use Python r"" raw strings - JSON doesn't support them
- If a field cannot be determined, set it to null
- The normalize map converts extracted words to standard values
- For "state", map alert words to "firing" and recovery words to "resolved"
"#;

/// Signature used to look up and cache per-format extraction rules, computed
/// from the sender domain, a normalized subject prefix, and body keyword markers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatSignature {
    pub from_domain: String,
    pub subject_prefix: String,
    pub body_markers: Vec<String>,
}

impl FormatSignature {
    pub fn compute(subject: &str, from_address: &str, body: &str) -> Self {
        let from_domain = AT_DOMAIN_RE
            .captures(from_address)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();

        let mut normalized = SUBJECT_BRACKET_NUM_RE.replace_all(subject, "[*]").into_owned();
        normalized = SUBJECT_DATE_RE.replace_all(&normalized, "*DATE*").into_owned();
        normalized = SUBJECT_DIGITS_RE.replace_all(&normalized, "*N*").into_owned();
        let subject_prefix: String = normalized.trim().chars().take(50).collect();

        let body_lower: String = body.to_lowercase().chars().take(2000).collect();
        let mut body_markers: Vec<String> = BODY_MARKERS
            .iter()
            .filter(|marker| body_lower.contains(*marker))
            .map(|m| m.to_string())
            .collect();
        body_markers.sort();

        Self {
            from_domain,
            subject_prefix,
            body_markers,
        }
    }

    pub fn hash(&self) -> String {
        let sig_str = format!(
            "{}|{}|{}",
            self.from_domain,
            self.subject_prefix,
            self.body_markers.join(",")
        );
        crate::fingerprint::hash16(&sig_str)
    }
}

/// Applies a cached rule set against subject/body text the way the static
/// parser does, but sourced from a per-format learned signature instead of a
/// hand-authored config.
pub fn apply_extraction_rules(rules: &ExtractionRuleSet, subject: &str, body: &str) -> ExtractedFields {
    let mut fields = ExtractedFields::default();
    for (field, rule) in rules {
        let Ok(re) = Regex::new(&rule.regex) else {
            continue;
        };
        let source_text = match rule.source {
            super::RuleSource::Subject => subject,
            super::RuleSource::Body => body,
        };
        let Some(captures) = re.captures(source_text) else {
            continue;
        };
        let Some(raw_value) = captures.get(rule.group).map(|m| m.as_str().to_string()) else {
            continue;
        };

        let value = if let Some(normalize_map) = &rule.normalize {
            let upper = raw_value.to_uppercase();
            normalize_map
                .iter()
                .find(|(key, _)| key.to_uppercase() == upper)
                .map(|(_, normalized)| normalized.clone())
                .unwrap_or(raw_value)
        } else {
            raw_value
        };

        match field.as_str() {
            "host" => fields.host = Some(value),
            "service" => fields.service = Some(value),
            "severity" => fields.severity = Some(value),
            "state" => fields.state = Some(value),
            "summary" => fields.summary = Some(value),
            _ => {}
        }
    }
    fields
}

/// Normalizes a raw source name into the short, lowercase `source_tool` slug
/// stored against events and pattern-cache rows.
fn canonical_source_tool(source_name: &str) -> String {
    let slug = source_name.to_lowercase().replace(' ', "_");
    const TOOL_MAP: &[(&str, &str)] = &[
        ("xymon", "xymon"),
        ("business_service", "business_service"),
        ("splunk", "splunk"),
        ("nagios", "nagios"),
        ("prometheus", "prometheus"),
        ("zabbix", "zabbix"),
        ("pagerduty", "pagerduty"),
        ("datadog", "datadog"),
    ];
    for (needle, canonical) in TOOL_MAP {
        if slug.contains(needle) {
            return canonical.to_string();
        }
    }
    slug
}

#[derive(Debug, Deserialize)]
struct LlmResponseEnvelope {
    response: String,
}

#[derive(Debug, Deserialize)]
struct LlmExtractionPayload {
    #[serde(default = "default_source_name")]
    source_name: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    extracted: ExtractedFields,
    #[serde(default)]
    extraction_rules: ExtractionRuleSet,
}

fn default_source_name() -> String {
    "Unknown Alert".to_string()
}

fn default_confidence() -> f64 {
    0.5
}

/// Outcome of running an email through the learning extractor.
pub struct LearnedExtraction {
    pub fields: ExtractedFields,
    pub source_tool: String,
    pub source_name: String,
    pub extraction_type: ExtractionType,
    pub confidence: f64,
    pub quarantined: bool,
}

impl LearnedExtraction {
    fn empty(extraction_type: ExtractionType) -> Self {
        Self {
            fields: ExtractedFields::default(),
            source_tool: "unknown".to_string(),
            source_name: "Unknown".to_string(),
            extraction_type,
            confidence: 0.0,
            quarantined: matches!(
                extraction_type,
                ExtractionType::Quarantined | ExtractionType::LlmFailed
            ),
        }
    }
}

/// Calls out to an external LLM service to derive extraction rules for alert
/// formats the static parser registry doesn't cover, caching what it learns
/// so subsequent emails of the same shape are handled by regex alone.
pub struct LearningExtractor {
    http_client: reqwest::Client,
    llm_endpoint: String,
    redactor: Redactor,
}

impl LearningExtractor {
    pub fn new(llm_endpoint: String, redactor: Redactor) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .expect("reqwest client builds with a simple timeout");
        Self {
            http_client,
            llm_endpoint,
            redactor,
        }
    }

    pub async fn parse_email(
        &self,
        store: &Store,
        raw_email_id: Uuid,
        subject: &str,
        from_address: &str,
        body: &str,
    ) -> Result<LearnedExtraction, PipelineError> {
        let start = Instant::now();
        let signature = FormatSignature::compute(subject, from_address, body);
        let signature_hash = signature.hash();

        if let Some(cached) = store.find_cached_pattern(&signature_hash).await? {
            let rules: ExtractionRuleSet = serde_json::from_value(cached.extraction_rules).unwrap_or_default();
            let fields = apply_extraction_rules(&rules, subject, body).sanitized();
            let duration_ms = start.elapsed().as_millis() as i64;

            store
                .log_extraction(
                    raw_email_id,
                    Some(cached.id),
                    ExtractionType::CachedMatch,
                    fields.host.as_deref(),
                    fields.service.as_deref(),
                    fields.severity.as_deref(),
                    fields.state.as_deref(),
                    0.9,
                    None,
                    duration_ms,
                )
                .await?;

            return Ok(LearnedExtraction {
                fields,
                source_tool: cached.source_tool.unwrap_or_else(|| "unknown".to_string()),
                source_name: cached.source_name.unwrap_or_else(|| "Unknown".to_string()),
                extraction_type: ExtractionType::CachedMatch,
                confidence: 0.9,
                quarantined: false,
            });
        }

        let (raw_response_text, duration_ms) = match self.fetch_llm_response(subject, body).await {
            Ok(v) => v,
            Err(_) => return Ok(LearnedExtraction::empty(ExtractionType::LlmFailed)),
        };

        let (payload, raw_response) = match Self::parse_llm_payload(&raw_response_text) {
            Ok(v) => v,
            Err(_) => {
                store
                    .quarantine_event(
                        raw_email_id,
                        &serde_json::json!({ "raw_response": raw_response_text }),
                        0.0,
                        QuarantineReason::ValidationFailed,
                    )
                    .await?;
                return Ok(LearnedExtraction::empty(ExtractionType::Quarantined));
            }
        };

        let fields = payload.extracted.clone().sanitized();
        let confidence = payload.confidence;

        if confidence < QUARANTINE_THRESHOLD {
            store
                .quarantine_event(raw_email_id, &raw_response, confidence, QuarantineReason::LowConfidence)
                .await?;
            return Ok(LearnedExtraction::empty(ExtractionType::Quarantined));
        }

        let pattern_id = if confidence >= CONFIDENCE_THRESHOLD {
            Some(
                store
                    .upsert_pattern_cache(
                        &signature_hash,
                        &signature.from_domain,
                        &signature.subject_prefix,
                        &signature.body_markers,
                        &payload.source_name,
                        &canonical_source_tool(&payload.source_name),
                        &payload.extraction_rules,
                        Some(raw_email_id),
                        duration_ms,
                    )
                    .await?,
            )
        } else {
            None
        };

        let extraction_type = if confidence >= CONFIDENCE_THRESHOLD {
            ExtractionType::LearnedNew
        } else {
            ExtractionType::LowConfidence
        };

        store
            .log_extraction(
                raw_email_id,
                pattern_id,
                extraction_type,
                fields.host.as_deref(),
                fields.service.as_deref(),
                fields.severity.as_deref(),
                fields.state.as_deref(),
                confidence,
                Some(&raw_response),
                duration_ms,
            )
            .await?;

        Ok(LearnedExtraction {
            fields,
            source_tool: canonical_source_tool(&payload.source_name),
            source_name: payload.source_name,
            extraction_type,
            confidence,
            quarantined: false,
        })
    }

    /// Calls the LLM endpoint and returns its raw response text. Failures here
    /// (network error, non-success status, malformed envelope) mean the LLM
    /// produced no result at all, not that its output was invalid.
    async fn fetch_llm_response(&self, subject: &str, body: &str) -> Result<(String, i64), PipelineError> {
        let (redacted_subject, redacted_body) = self.redactor.redact_email(subject, body);
        let subject_snippet: String = redacted_subject.chars().take(500).collect();
        let body_snippet: String = if redacted_body.is_empty() {
            "(no body)".to_string()
        } else {
            redacted_body.chars().take(4000).collect()
        };
        let prompt = EXTRACTION_PROMPT
            .replace("{subject}", &subject_snippet)
            .replace("{body}", &body_snippet);

        let start = Instant::now();
        let response = self
            .http_client
            .post(format!("{}/generate", self.llm_endpoint))
            .json(&serde_json::json!({
                "prompt": prompt,
                "system_prompt": "You are an expert alert email parser. Extract structured data and respond only with valid JSON.",
            }))
            .send()
            .await?;
        let duration_ms = start.elapsed().as_millis() as i64;

        if !response.status().is_success() {
            return Err(PipelineError::ValidationFailed(format!(
                "llm endpoint returned {}",
                response.status()
            )));
        }

        let envelope: LlmResponseEnvelope = response.json().await?;
        Ok((envelope.response, duration_ms))
    }

    /// Repairs and schema-parses the LLM's raw response text. Failures here
    /// mean the LLM answered but its output didn't conform to the expected
    /// shape, which is a validation failure rather than an absent result.
    fn parse_llm_payload(raw_response: &str) -> Result<(LlmExtractionPayload, serde_json::Value), PipelineError> {
        let raw_value = extract_and_repair_json(raw_response)?;
        let payload: LlmExtractionPayload = serde_json::from_value(raw_value.clone())
            .map_err(|e| PipelineError::InvalidLlmJson(e.to_string()))?;
        Ok((payload, raw_value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_across_varying_ids() {
        let a = FormatSignature::compute(
            "[12345] Host down 2024-01-01",
            "alerts@monitoring.example.com",
            "Severity: critical\nHost: web-01",
        );
        let b = FormatSignature::compute(
            "[99999] Host down 2024-06-15",
            "alerts@monitoring.example.com",
            "Severity: critical\nHost: web-02",
        );
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn signature_differs_across_domains() {
        let a = FormatSignature::compute("alert", "a@example.com", "severity: high");
        let b = FormatSignature::compute("alert", "a@other.com", "severity: high");
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn canonical_source_tool_maps_known_tools() {
        assert_eq!(canonical_source_tool("Nagios Alert"), "nagios");
        assert_eq!(canonical_source_tool("Something Else"), "something_else");
    }
}
