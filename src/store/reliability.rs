use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::Store;
use crate::domain::{DlqStatus, IdempotencyStatus};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdempotencyKeyRow {
    pub key: String,
    pub status: IdempotencyStatus,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DlqRow {
    pub id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub retry_count: i32,
    pub max_retries: i32,
}

impl Store {
    /// Inserts a new idempotency key in `processing` state. Returns `false`
    /// without inserting if the key already exists — the caller should then
    /// fetch the existing row to decide how to proceed.
    pub async fn claim_idempotency_key(&self, key: &str, ttl: Duration) -> Result<bool, sqlx::Error> {
        let expires_at = Utc::now() + ttl;
        let result = sqlx::query(
            "INSERT INTO idempotency_keys (key, status, expires_at) VALUES ($1, 'processing', $2) ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_idempotency_key(&self, key: &str) -> Result<Option<IdempotencyKeyRow>, sqlx::Error> {
        sqlx::query_as::<_, IdempotencyKeyRow>(
            "SELECT key, status, result FROM idempotency_keys WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn complete_idempotency_key(
        &self,
        key: &str,
        result: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE idempotency_keys SET status = 'completed', result = $2 WHERE key = $1")
            .bind(key)
            .bind(result)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn fail_idempotency_key(&self, key: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE idempotency_keys SET status = 'failed' WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes idempotency keys whose TTL has elapsed, regardless of status.
    pub async fn expire_idempotency_keys(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn enqueue_dead_letter(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
        error_message: &str,
        traceback: Option<&str>,
        max_retries: i32,
    ) -> Result<Uuid, sqlx::Error> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO dead_letter_queue (event_type, payload, error_message, traceback, max_retries, next_retry_at)
            VALUES ($1, $2, $3, $4, $5, now())
            RETURNING id
            "#,
        )
        .bind(event_type)
        .bind(payload)
        .bind(error_message)
        .bind(traceback)
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Claims up to `limit` due DLQ entries for retry, locking rows so
    /// concurrent scheduler ticks never double-process the same entry.
    pub async fn claim_dead_letters_for_retry(&self, limit: i64) -> Result<Vec<DlqRow>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, DlqRow>(
            r#"
            SELECT id, event_type, payload, retry_count, max_retries
            FROM dead_letter_queue
            WHERE status IN ('pending', 'retrying') AND (next_retry_at IS NULL OR next_retry_at <= now())
            ORDER BY created_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        if !ids.is_empty() {
            sqlx::query("UPDATE dead_letter_queue SET status = 'retrying', updated_at = now() WHERE id = ANY($1)")
                .bind(&ids)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(rows)
    }

    /// Backs off a failed retry with an exponentially growing delay, or marks
    /// the entry permanently failed once `max_retries` is exceeded.
    pub async fn backoff_dead_letter(&self, id: Uuid, backoff: Duration) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE dead_letter_queue SET
                retry_count = retry_count + 1,
                status = CASE WHEN retry_count + 1 >= max_retries THEN 'failed' ELSE 'pending' END,
                next_retry_at = now() + $2,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(backoff)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn resolve_dead_letter(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE dead_letter_queue SET status = 'resolved', updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_dlq_by_status(&self) -> Result<Vec<(DlqStatus, i64)>, sqlx::Error> {
        sqlx::query_as("SELECT status, count(*) FROM dead_letter_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn prune_dead_letters_before(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM dead_letter_queue WHERE status IN ('resolved', 'failed') AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
