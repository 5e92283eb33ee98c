use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

pub struct EventFingerprintInput<'a> {
    pub environment: Option<&'a str>,
    pub host: Option<&'a str>,
    pub check_name: Option<&'a str>,
    pub service: Option<&'a str>,
    pub normalized_signature: &'a str,
}

fn normalize_component(value: Option<&str>) -> String {
    value.map(|v| v.to_lowercase().trim().to_string()).unwrap_or_default()
}

/// Fingerprint v2 excludes severity so a severity flap never spawns a new incident.
pub fn compute_fingerprint_v2(event: &EventFingerprintInput) -> String {
    let components = [
        normalize_component(event.environment),
        normalize_component(event.host),
        normalize_component(event.check_name.or(event.service)),
        event.normalized_signature.to_lowercase().chars().take(200).collect(),
    ];
    hash16(&components.join("|"))
}

/// Legacy v1 fingerprint, kept for backfill/migration fallback lookups only.
pub fn compute_fingerprint_v1(event: &EventFingerprintInput) -> String {
    let components = [
        event.environment.unwrap_or("").to_string(),
        event.host.unwrap_or("").to_string(),
        event.check_name.or(event.service).unwrap_or("").to_string(),
        event.normalized_signature.chars().take(200).collect(),
    ];
    hash16(&components.join("|").to_lowercase())
}

pub fn hash16(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

static GUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").unwrap()
});
static REQUEST_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(request[_-]?id|req[_-]?id|trace[_-]?id)[=:]\s*\S+").unwrap());
static ISO_TS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?Z?").unwrap());
static COMMON_TS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\s+\d{1,2}:\d{2}(:\d{2})?").unwrap());
static VOLATILE_NUM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(pid|port|count|duration|latency|uptime)[=:]\s*\d+").unwrap());
static IPV4_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Strips volatile elements (timestamps, GUIDs, request ids, ports...) from
/// `subject + first 500 chars of body` to produce a stable correlation signature.
pub fn compute_normalized_signature(subject: &str, body: &str) -> String {
    let body_prefix: String = body.chars().take(500).collect();
    let mut content = format!("{} {}", subject, body_prefix).to_lowercase();

    content = GUID_RE.replace_all(&content, "<guid>").into_owned();
    content = REQUEST_ID_RE.replace_all(&content, "<id>").into_owned();
    content = ISO_TS_RE.replace_all(&content, "<ts>").into_owned();
    content = COMMON_TS_RE.replace_all(&content, "<ts>").into_owned();
    content = VOLATILE_NUM_RE.replace_all(&content, "$1=<n>").into_owned();
    content = IPV4_RE.replace_all(&content, "<ip>").into_owned();
    content = WHITESPACE_RE.replace_all(&content, " ").trim().to_string();

    content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_idempotent() {
        let once = compute_normalized_signature("[CRIT] disk full", "host=web-01 port=8080 at 2026-01-02T03:04:05Z");
        let twice = compute_normalized_signature(&once, "");
        assert_eq!(once, twice);
    }

    #[test]
    fn fingerprint_v2_is_stable_across_severity_change() {
        let sig = compute_normalized_signature("[CRITICAL] cpu", "host web-01 cpu_load high");
        let critical = EventFingerprintInput {
            environment: Some("prod"),
            host: Some("web-01"),
            check_name: Some("cpu_load"),
            service: None,
            normalized_signature: &sig,
        };
        let warning = EventFingerprintInput {
            environment: Some("PROD"),
            host: Some("Web-01"),
            check_name: Some("cpu_load"),
            service: None,
            normalized_signature: &sig,
        };
        assert_eq!(compute_fingerprint_v2(&critical), compute_fingerprint_v2(&warning));
    }

    #[test]
    fn normalized_signature_masks_volatile_fields() {
        let sig = compute_normalized_signature(
            "alert",
            "request_id=abc-123 pid=4821 at 10.0.0.5 10/02/2026 10:00 550e8400-e29b-41d4-a716-446655440000",
        );
        assert!(sig.contains("<id>"));
        assert!(sig.contains("pid=<n>"));
        assert!(sig.contains("<ip>"));
        assert!(sig.contains("<ts>"));
        assert!(sig.contains("<guid>"));
    }
}
