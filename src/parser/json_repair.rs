use once_cell::sync::Lazy;
use regex::Regex;

static RAW_STRING_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\br(["'])"#).unwrap());
static JSON_OBJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());
static UNICODE_ESCAPE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\u([0-9a-fA-F]{4})").unwrap());
static PLACEHOLDER_UNICODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<<U([0-9a-fA-F]{4})>>").unwrap());
static ANY_ESCAPE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\(.)").unwrap());

/// Repairs the JSON pathologies LLMs are known to produce before serde_json sees it:
/// Python raw-string prefixes (`r"..."` -> `"..."`) and invalid backslash escapes
/// (anything other than `\\`, `\"`, `\n`, `\r`, `\t`, `\/`, `\b`, `\f`, `\uXXXX`).
/// Valid escapes are protected behind placeholders before the generic escape strip,
/// then restored.
pub fn fix_escapes(input: &str) -> String {
    let mut s = input.to_string();
    s = s.replace("\\\\", "<<DBLBACK>>");
    s = s.replace("\\\"", "<<QUOTE>>");
    s = s.replace("\\n", "<<NL>>");
    s = s.replace("\\r", "<<CR>>");
    s = s.replace("\\t", "<<TAB>>");
    s = s.replace("\\/", "<<SLASH>>");
    s = s.replace("\\b", "<<BS>>");
    s = s.replace("\\f", "<<FF>>");
    s = UNICODE_ESCAPE_RE.replace_all(&s, "<<U$1>>").into_owned();

    s = ANY_ESCAPE_RE.replace_all(&s, "$1").into_owned();

    s = s.replace("<<DBLBACK>>", "\\\\");
    s = s.replace("<<QUOTE>>", "\\\"");
    s = s.replace("<<NL>>", "\\n");
    s = s.replace("<<CR>>", "\\r");
    s = s.replace("<<TAB>>", "\\t");
    s = s.replace("<<SLASH>>", "\\/");
    s = s.replace("<<BS>>", "\\b");
    s = s.replace("<<FF>>", "\\f");
    s = PLACEHOLDER_UNICODE_RE.replace_all(&s, "\\u$1").into_owned();
    s
}

/// Strips a leading Python raw-string marker (`r"` or `r'`) that LLMs sometimes emit.
fn strip_raw_string_prefix(input: &str) -> String {
    RAW_STRING_PREFIX_RE.replace_all(input, "$1").into_owned()
}

/// Extracts the first `{...}` object from a noisy LLM response and repairs it into
/// valid JSON, returning the parsed value.
pub fn extract_and_repair_json(raw_response: &str) -> Result<serde_json::Value, crate::error::PipelineError> {
    let cleaned = strip_raw_string_prefix(raw_response);

    let Some(m) = JSON_OBJECT_RE.find(&cleaned) else {
        return Err(crate::error::PipelineError::InvalidLlmJson(
            "no JSON object found in response".to_string(),
        ));
    };

    let repaired = fix_escapes(m.as_str());
    serde_json::from_str(&repaired)
        .map_err(|e| crate::error::PipelineError::InvalidLlmJson(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_raw_string_prefix() {
        assert_eq!(strip_raw_string_prefix(r#"field: r"value""#), r#"field: "value""#);
    }

    #[test]
    fn fixes_invalid_escape_sequences() {
        let input = r#"{"regex": "\d+\s+\w"}"#;
        let fixed = fix_escapes(input);
        let parsed: serde_json::Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(parsed["regex"], "d+s+w");
    }

    #[test]
    fn preserves_valid_escapes() {
        let input = r#"{"text": "line one\nline two", "path": "C:\\dir"}"#;
        let fixed = fix_escapes(input);
        let parsed: serde_json::Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(parsed["text"], "line one\nline two");
        assert_eq!(parsed["path"], "C:\\dir");
    }

    #[test]
    fn extracts_json_object_from_noisy_response() {
        let response = "Sure, here you go:\n```json\n{\"confidence\": 0.9}\n```\nhope that helps";
        let parsed = extract_and_repair_json(response).unwrap();
        assert_eq!(parsed["confidence"], 0.9);
    }
}
