use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::types::IncidentRow;
use super::Store;
use crate::domain::{ResolutionReason, Severity};

impl Store {
    pub async fn get_incident(&self, id: Uuid) -> Result<Option<IncidentRow>, sqlx::Error> {
        sqlx::query_as::<_, IncidentRow>("SELECT * FROM incidents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Incidents eligible for a maintenance-match pass: open/acknowledged and
    /// not already flagged as in-maintenance.
    pub async fn list_incidents_needing_maintenance_match(&self) -> Result<Vec<IncidentRow>, sqlx::Error> {
        sqlx::query_as::<_, IncidentRow>(
            "SELECT * FROM incidents WHERE status IN ('open', 'acknowledged') AND is_in_maintenance = false",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Incidents currently flagged in-maintenance, for the matching-clear pass.
    pub async fn list_incidents_in_maintenance(&self) -> Result<Vec<IncidentRow>, sqlx::Error> {
        sqlx::query_as::<_, IncidentRow>("SELECT * FROM incidents WHERE is_in_maintenance = true")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn set_incident_in_maintenance(
        &self,
        incident_id: Uuid,
        window_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE incidents SET is_in_maintenance = true, maintenance_window_id = $2, updated_at = now() WHERE id = $1",
        )
        .bind(incident_id)
        .bind(window_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_incident_maintenance(&self, incident_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE incidents SET is_in_maintenance = false, maintenance_window_id = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(incident_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Auto-resolves any non-resolved incident whose `last_seen_at` is older
    /// than `stale_after`, returning the number of rows affected.
    pub async fn auto_resolve_stale(&self, stale_after: chrono::Duration) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - stale_after;
        let result = sqlx::query(
            r#"
            UPDATE incidents
            SET status = 'resolved', resolved_at = now(), resolution_reason = $1, updated_at = now()
            WHERE status IN ('open', 'acknowledged', 'resolving') AND last_seen_at < $2
            "#,
        )
        .bind(ResolutionReason::Stale)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Incidents due for (re-)enrichment, ordered by severity rank then recency,
    /// capped at `limit`. Mirrors the scheduler's three-way eligibility rule.
    pub async fn list_incidents_needing_enrichment(&self, limit: i64) -> Result<Vec<IncidentRow>, sqlx::Error> {
        sqlx::query_as::<_, IncidentRow>(
            r#"
            SELECT * FROM incidents
            WHERE ai_enriched_at IS NULL
               OR (severity_current IN ('critical', 'high') AND ai_enriched_at < now() - interval '1 hour')
               OR ai_enriched_at < now() - interval '24 hours'
            ORDER BY
                CASE severity_current
                    WHEN 'critical' THEN 4 WHEN 'high' THEN 3 WHEN 'medium' THEN 2 WHEN 'low' THEN 1 ELSE 0
                END DESC,
                last_seen_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn store_enrichment(
        &self,
        incident_id: Uuid,
        summary: &str,
        category: Option<&str>,
        owner_team: Option<&str>,
        recommended_checks: &serde_json::Value,
        suggested_runbooks: &serde_json::Value,
        safe_actions: &serde_json::Value,
        confidence: f64,
        evidence: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE incidents SET
                ai_summary = $2, ai_category = $3, ai_owner_team = $4,
                ai_recommended_checks = $5, ai_suggested_runbooks = $6, ai_safe_actions = $7,
                ai_confidence = $8, ai_evidence = $9, ai_enriched_at = now(), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(incident_id)
        .bind(summary)
        .bind(category)
        .bind(owner_team)
        .bind(recommended_checks)
        .bind(suggested_runbooks)
        .bind(safe_actions)
        .bind(confidence)
        .bind(evidence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The `limit` most recent events linked to an incident, for building an
    /// enrichment payload.
    pub async fn recent_events_for_incident(
        &self,
        incident_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RecentEventRow>, sqlx::Error> {
        sqlx::query_as::<_, RecentEventRow>(
            r#"
            SELECT e.source_tool, e.host, e.check_name, e.service, e.severity, e.state, e.occurred_at,
                   r.subject, r.body_text
            FROM incident_events ie
            JOIN alert_events e ON e.id = ie.alert_event_id
            LEFT JOIN raw_emails r ON r.id = e.raw_email_id
            WHERE ie.incident_id = $1
            ORDER BY e.occurred_at DESC
            LIMIT $2
            "#,
        )
        .bind(incident_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Every distinct tag carried by events linked to an incident, used for
    /// the maintenance-scope tags dimension (incidents don't carry tags
    /// directly; their linked alert_events do).
    pub async fn distinct_tags_for_incident(&self, incident_id: Uuid) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT DISTINCT tag
            FROM incident_events ie
            JOIN alert_events e ON e.id = ie.alert_event_id
            CROSS JOIN LATERAL unnest(e.tags) AS tag
            WHERE ie.incident_id = $1
            "#,
        )
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count_open_incidents(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT count(*) FROM incidents WHERE status IN ('open', 'acknowledged', 'resolving')",
        )
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecentEventRow {
    pub source_tool: Option<String>,
    pub host: Option<String>,
    pub check_name: Option<String>,
    pub service: Option<String>,
    pub severity: Severity,
    pub state: crate::domain::AlertState,
    pub occurred_at: DateTime<Utc>,
    pub subject: Option<String>,
    pub body_text: Option<String>,
}
