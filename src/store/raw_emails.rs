use chrono::Utc;
use uuid::Uuid;

use super::types::NewRawEmail;
use super::Store;
use crate::domain::ParseStatus;

impl Store {
    /// Inserts a raw email keyed by (folder, uid) and advances the folder
    /// cursor atomically in the same transaction. Returns `None` if the
    /// (folder, uid) pair already exists — the duplicate silently drops.
    pub async fn intake_raw_email(&self, email: NewRawEmail) -> Result<Option<Uuid>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let attachments_json = serde_json::to_value(&email.attachments).unwrap_or_default();

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO raw_emails (
                folder, uid, message_id, subject, from_address, to_addresses, cc_addresses,
                received_at, headers, body_text, body_html, ics_content, attachments, raw_mime
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (folder, uid) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&email.folder)
        .bind(email.uid)
        .bind(&email.message_id)
        .bind(&email.subject)
        .bind(&email.from_address)
        .bind(&email.to_addresses)
        .bind(&email.cc_addresses)
        .bind(email.received_at)
        .bind(&email.headers)
        .bind(&email.body_text)
        .bind(&email.body_html)
        .bind(&email.ics_content)
        .bind(&attachments_json)
        .bind(&email.raw_mime)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_some() {
            sqlx::query(
                r#"
                INSERT INTO folder_cursors (folder, last_uid, last_poll_at, last_success_at, emails_processed, error_count)
                VALUES ($1, $2, now(), now(), 1, 0)
                ON CONFLICT (folder) DO UPDATE SET
                    last_uid = GREATEST(folder_cursors.last_uid, EXCLUDED.last_uid),
                    last_poll_at = now(),
                    last_success_at = now(),
                    emails_processed = folder_cursors.emails_processed + 1,
                    error_count = 0
                "#,
            )
            .bind(&email.folder)
            .bind(email.uid)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(inserted.map(|(id,)| id))
    }

    /// Records a fetch/parse failure against the folder's cursor without
    /// advancing `last_uid`.
    pub async fn record_folder_error(&self, folder: &str, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO folder_cursors (folder, last_poll_at, last_error, error_count)
            VALUES ($1, now(), $2, 1)
            ON CONFLICT (folder) DO UPDATE SET
                last_poll_at = now(),
                last_error = EXCLUDED.last_error,
                error_count = folder_cursors.error_count + 1
            "#,
        )
        .bind(folder)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_parse_status(
        &self,
        raw_email_id: Uuid,
        status: ParseStatus,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE raw_emails SET parse_status = $2, parse_error = $3 WHERE id = $1")
            .bind(raw_email_id)
            .bind(status)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes raw emails older than `retention_days`, part of scheduler housekeeping.
    pub async fn prune_raw_emails_older_than(&self, retention_days: i64) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let result = sqlx::query("DELETE FROM raw_emails WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
