use chrono::Duration;
use sha2::{Digest, Sha256};

use crate::domain::IdempotencyStatus;
use crate::error::PipelineError;
use crate::store::Store;

const DEFAULT_TTL_HOURS: i64 = 24;

/// Derives the idempotency key for one inbound message: the first 32 hex
/// chars of SHA-256 over `email_id:message_id`.
pub fn derive_key(email_id: &str, message_id: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", email_id, message_id).as_bytes());
    hex::encode(digest)[..32].to_string()
}

pub enum IdempotentOutcome<T> {
    /// The operation ran and produced a fresh result.
    Ran(T),
    /// Another worker already completed this key; here is its cached result.
    AlreadyCompleted(serde_json::Value),
    /// Another worker currently holds this key in `processing`.
    InProgress,
}

/// Runs `op` under an idempotency key: claims the key, runs `op` if nobody
/// else holds or has finished it, and records success/failure back onto the
/// key row. `op`'s result must serialize to the blob stored for replay.
pub async fn with_idempotency<F, Fut, T>(
    store: &Store,
    key: &str,
    op: F,
) -> Result<IdempotentOutcome<T>, PipelineError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, PipelineError>>,
    T: serde::Serialize,
{
    let claimed = store.claim_idempotency_key(key, Duration::hours(DEFAULT_TTL_HOURS)).await?;

    if !claimed {
        let Some(existing) = store.get_idempotency_key(key).await? else {
            // Expired between the failed claim and this read; treat as fresh.
            return run_and_record(store, key, op).await;
        };
        return Ok(match existing.status {
            IdempotencyStatus::Completed => {
                IdempotentOutcome::AlreadyCompleted(existing.result.unwrap_or(serde_json::Value::Null))
            }
            IdempotencyStatus::Processing => IdempotentOutcome::InProgress,
            IdempotencyStatus::Failed => {
                // A prior attempt failed terminally; let the caller retry fresh.
                return run_and_record(store, key, op).await;
            }
        });
    }

    run_and_record(store, key, op).await
}

async fn run_and_record<F, Fut, T>(store: &Store, key: &str, op: F) -> Result<IdempotentOutcome<T>, PipelineError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, PipelineError>>,
    T: serde::Serialize,
{
    match op().await {
        Ok(result) => {
            let blob = serde_json::to_value(&result).unwrap_or(serde_json::Value::Null);
            store.complete_idempotency_key(key, &blob).await?;
            Ok(IdempotentOutcome::Ran(result))
        }
        Err(err) => {
            store.fail_idempotency_key(key).await?;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_is_32_hex_chars() {
        let key = derive_key("email-1", "<msg@host>");
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn derive_key_is_stable() {
        assert_eq!(derive_key("a", "b"), derive_key("a", "b"));
        assert_ne!(derive_key("a", "b"), derive_key("a", "c"));
    }
}
