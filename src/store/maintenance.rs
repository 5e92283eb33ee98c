use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Store;
use crate::domain::{MaintenanceSource, SuppressMode};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MaintenanceWindowRow {
    pub id: Uuid,
    pub source: MaintenanceSource,
    pub external_event_id: Option<String>,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub timezone: String,
    pub is_recurring: bool,
    pub recurrence_rule: Option<String>,
    pub scope: serde_json::Value,
    pub suppress_mode: SuppressMode,
    pub is_active: bool,
}

pub struct NewMaintenanceWindow {
    pub source: MaintenanceSource,
    pub external_event_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub organizer: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub timezone: String,
    pub is_recurring: bool,
    pub recurrence_rule: Option<String>,
    pub scope: serde_json::Value,
    pub suppress_mode: SuppressMode,
    pub raw_email_id: Option<Uuid>,
}

impl Store {
    pub async fn upsert_maintenance_window(&self, window: NewMaintenanceWindow) -> Result<Uuid, sqlx::Error> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO maintenance_windows (
                source, external_event_id, title, description, organizer,
                starts_at, ends_at, timezone, is_recurring, recurrence_rule,
                scope, suppress_mode, raw_email_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (source, external_event_id) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                starts_at = EXCLUDED.starts_at,
                ends_at = EXCLUDED.ends_at,
                timezone = EXCLUDED.timezone,
                is_recurring = EXCLUDED.is_recurring,
                recurrence_rule = EXCLUDED.recurrence_rule,
                scope = EXCLUDED.scope,
                suppress_mode = EXCLUDED.suppress_mode,
                updated_at = now()
            RETURNING id
            "#,
        )
        .bind(window.source)
        .bind(&window.external_event_id)
        .bind(&window.title)
        .bind(&window.description)
        .bind(&window.organizer)
        .bind(window.starts_at)
        .bind(window.ends_at)
        .bind(&window.timezone)
        .bind(window.is_recurring)
        .bind(&window.recurrence_rule)
        .bind(&window.scope)
        .bind(window.suppress_mode)
        .bind(window.raw_email_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Marks a window cancelled (STATUS:CANCELLED in the ICS) without deleting
    /// it, preserving lineage.
    pub async fn cancel_maintenance_window(
        &self,
        source: MaintenanceSource,
        external_event_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE maintenance_windows SET is_active = false, updated_at = now() WHERE source = $1 AND external_event_id = $2",
        )
        .bind(source)
        .bind(external_event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All non-cancelled windows, recurring or not. Callers resolve whether
    /// a given window actually covers *now* — for recurring windows that
    /// requires RRULE expansion, which this query cannot express.
    pub async fn list_active_maintenance_windows(&self) -> Result<Vec<MaintenanceWindowRow>, sqlx::Error> {
        sqlx::query_as::<_, MaintenanceWindowRow>("SELECT * FROM maintenance_windows WHERE is_active = true")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn get_maintenance_window(&self, id: Uuid) -> Result<Option<MaintenanceWindowRow>, sqlx::Error> {
        sqlx::query_as::<_, MaintenanceWindowRow>("SELECT * FROM maintenance_windows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn insert_maintenance_match(
        &self,
        window_id: Uuid,
        incident_id: Uuid,
        match_reason: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO maintenance_matches (maintenance_window_id, incident_id, match_reason)
            VALUES ($1, $2, $3)
            ON CONFLICT (maintenance_window_id, incident_id) DO NOTHING
            "#,
        )
        .bind(window_id)
        .bind(incident_id)
        .bind(match_reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
