use sha2::{Digest, Sha256};

use crate::error::PipelineError;
use crate::store::config_versions::ConfigVersionRow;
use crate::store::Store;

/// The two config_types this crate exercises: the parser registry and the
/// redaction pattern list.
pub const CONFIG_TYPE_PARSER_REGISTRY: &str = "parser_registry";
pub const CONFIG_TYPE_REDACTION_PATTERNS: &str = "redaction_patterns";

/// SHA-256 over a stable (key-sorted) YAML serialization of the payload, so
/// the same logical config always hashes to the same content_hash regardless
/// of field insertion order.
pub fn content_hash(content: &serde_json::Value) -> Result<String, PipelineError> {
    let canonical = canonicalize(content);
    let yaml = serde_yaml::to_string(&canonical)
        .map_err(|e| PipelineError::ValidationFailed(format!("config serialization failed: {}", e)))?;
    let digest = Sha256::digest(yaml.as_bytes());
    Ok(hex::encode(digest))
}

/// Recursively sorts object keys so structurally-identical configs hash
/// identically no matter what order they were built or deserialized in.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, serde_json::Value> =
                std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), canonicalize(v));
            }
            serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Saves `content` as a new version for `config_type`, activating it
/// immediately. Returns the version id, whether new or deduplicated.
pub async fn publish(
    store: &Store,
    config_type: &str,
    content: &serde_json::Value,
    created_by: Option<&str>,
    notes: Option<&str>,
) -> Result<uuid::Uuid, PipelineError> {
    let hash = content_hash(content)?;
    let version_id = store.save_config_version(config_type, &hash, content, created_by, notes).await?;
    store.activate_config_version(config_type, version_id).await?;
    Ok(version_id)
}

pub async fn active(store: &Store, config_type: &str) -> Result<Option<ConfigVersionRow>, PipelineError> {
    Ok(store.get_active_config(config_type).await?)
}

pub async fn rollback(store: &Store, config_type: &str) -> Result<Option<uuid::Uuid>, PipelineError> {
    Ok(store.rollback_config(config_type).await?)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConfigDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

/// A key-level diff between two config versions of the same type. Nested
/// objects are compared by top-level key only, matching the coarse
/// operator-facing "what changed" view this needs to support.
pub fn diff(before: &ConfigVersionRow, after: &ConfigVersionRow) -> ConfigDiff {
    let before_map = before.content.as_object().cloned().unwrap_or_default();
    let after_map = after.content.as_object().cloned().unwrap_or_default();

    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut modified = Vec::new();

    for key in after_map.keys() {
        if !before_map.contains_key(key) {
            added.push(key.clone());
        } else if before_map.get(key) != after_map.get(key) {
            modified.push(key.clone());
        }
    }
    for key in before_map.keys() {
        if !after_map.contains_key(key) {
            removed.push(key.clone());
        }
    }

    added.sort();
    removed.sort();
    modified.sort();
    ConfigDiff { added, removed, modified }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_hash_is_stable_regardless_of_key_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn content_hash_differs_for_different_values() {
        let a = json!({"a": 1});
        let b = json!({"a": 2});
        assert_ne!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn diff_detects_added_removed_and_modified_keys() {
        let before = ConfigVersionRow {
            id: uuid::Uuid::nil(),
            config_type: "parser_registry".to_string(),
            content_hash: "x".to_string(),
            content: json!({"kept": 1, "removed_key": true}),
            created_by: None,
            notes: None,
            is_active: false,
            activated_at: None,
            created_at: chrono::Utc::now(),
        };
        let after = ConfigVersionRow {
            content_hash: "y".to_string(),
            content: json!({"kept": 2, "added_key": true}),
            ..before.clone()
        };
        let result = diff(&before, &after);
        assert_eq!(result.added, vec!["added_key".to_string()]);
        assert_eq!(result.removed, vec!["removed_key".to_string()]);
        assert_eq!(result.modified, vec!["kept".to_string()]);
    }
}
