use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Store;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConfigVersionRow {
    pub id: Uuid,
    pub config_type: String,
    pub content_hash: String,
    pub content: serde_json::Value,
    pub created_by: Option<String>,
    pub notes: Option<String>,
    pub is_active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Inserts a new version row. Does not activate it — callers call
    /// `activate_version` explicitly, mirroring the save/activate split
    /// used for maintenance-window and notification config.
    pub async fn save_config_version(
        &self,
        config_type: &str,
        content_hash: &str,
        content: &serde_json::Value,
        created_by: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Uuid, sqlx::Error> {
        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM config_versions WHERE config_type = $1 AND content_hash = $2",
        )
        .bind(config_type)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        if let Some((id,)) = existing {
            return Ok(id);
        }

        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO config_versions (config_type, content_hash, content, created_by, notes)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(config_type)
        .bind(content_hash)
        .bind(content)
        .bind(created_by)
        .bind(notes)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Activates `version_id`, deactivating whatever was previously active
    /// for that config type. Runs in one transaction so the partial unique
    /// index (at most one active row per type) is never violated mid-swap.
    pub async fn activate_config_version(&self, config_type: &str, version_id: Uuid) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE config_versions SET is_active = false, deactivated_at = now() WHERE config_type = $1 AND is_active",
        )
        .bind(config_type)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE config_versions SET is_active = true, activated_at = now(), deactivated_at = NULL WHERE id = $1",
        )
        .bind(version_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Activates the version immediately prior to whatever is currently
    /// active for `config_type`, by creation order — the rollback path.
    pub async fn rollback_config(&self, config_type: &str) -> Result<Option<Uuid>, sqlx::Error> {
        let previous: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM config_versions
            WHERE config_type = $1 AND created_at < (
                SELECT created_at FROM config_versions WHERE config_type = $1 AND is_active
            )
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(config_type)
        .fetch_optional(&self.pool)
        .await?;
        if let Some((id,)) = previous {
            self.activate_config_version(config_type, id).await?;
            Ok(Some(id))
        } else {
            Ok(None)
        }
    }

    pub async fn get_active_config(&self, config_type: &str) -> Result<Option<ConfigVersionRow>, sqlx::Error> {
        sqlx::query_as::<_, ConfigVersionRow>(
            "SELECT * FROM config_versions WHERE config_type = $1 AND is_active",
        )
        .bind(config_type)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_config_version_history(
        &self,
        config_type: &str,
        limit: i64,
    ) -> Result<Vec<ConfigVersionRow>, sqlx::Error> {
        sqlx::query_as::<_, ConfigVersionRow>(
            "SELECT * FROM config_versions WHERE config_type = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(config_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_config_version(&self, version_id: Uuid) -> Result<Option<ConfigVersionRow>, sqlx::Error> {
        sqlx::query_as::<_, ConfigVersionRow>("SELECT * FROM config_versions WHERE id = $1")
            .bind(version_id)
            .fetch_optional(&self.pool)
            .await
    }
}
