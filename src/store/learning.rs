use uuid::Uuid;

use super::Store;
use crate::domain::{ExtractionType, QuarantineReason};
use crate::parser::ExtractionRuleSet;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CachedPatternRow {
    pub id: Uuid,
    pub source_name: Option<String>,
    pub source_tool: Option<String>,
    pub extraction_rules: serde_json::Value,
}

impl Store {
    pub async fn find_cached_pattern(&self, signature_hash: &str) -> Result<Option<CachedPatternRow>, sqlx::Error> {
        sqlx::query_as::<_, CachedPatternRow>(
            "SELECT id, source_name, source_tool, extraction_rules FROM pattern_cache WHERE signature_hash = $1",
        )
        .bind(signature_hash)
        .fetch_optional(&self.pool)
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_pattern_cache(
        &self,
        signature_hash: &str,
        from_domain: &str,
        subject_prefix: &str,
        body_markers: &[String],
        source_name: &str,
        source_tool: &str,
        extraction_rules: &ExtractionRuleSet,
        created_from_email: Option<Uuid>,
        duration_ms: i64,
    ) -> Result<Uuid, sqlx::Error> {
        let rules_json = serde_json::to_value(extraction_rules).unwrap_or_default();
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO pattern_cache (
                signature_hash, from_domain, subject_prefix, body_markers,
                source_name, source_tool, extraction_rules, created_from_email_id, analysis_duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (signature_hash) DO UPDATE SET
                match_count = pattern_cache.match_count + 1,
                last_matched_at = now()
            RETURNING id
            "#,
        )
        .bind(signature_hash)
        .bind(from_domain)
        .bind(subject_prefix)
        .bind(body_markers)
        .bind(source_name)
        .bind(source_tool)
        .bind(&rules_json)
        .bind(created_from_email)
        .bind(duration_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn log_extraction(
        &self,
        raw_email_id: Uuid,
        pattern_cache_id: Option<Uuid>,
        extraction_type: ExtractionType,
        extracted_host: Option<&str>,
        extracted_service: Option<&str>,
        extracted_severity: Option<&str>,
        extracted_state: Option<&str>,
        confidence: f64,
        llm_response: Option<&serde_json::Value>,
        duration_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO pattern_extraction_log (
                raw_email_id, pattern_cache_id, extraction_type,
                extracted_host, extracted_service, extracted_severity, extracted_state,
                extraction_confidence, llm_response, duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(raw_email_id)
        .bind(pattern_cache_id)
        .bind(extraction_type)
        .bind(extracted_host)
        .bind(extracted_service)
        .bind(extracted_severity)
        .bind(extracted_state)
        .bind(confidence)
        .bind(llm_response)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn quarantine_event(
        &self,
        raw_email_id: Uuid,
        extraction_data: &serde_json::Value,
        confidence: f64,
        reason: QuarantineReason,
    ) -> Result<Uuid, sqlx::Error> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO quarantine_events (raw_email_id, extraction_data, confidence, quarantine_reason)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(raw_email_id)
        .bind(extraction_data)
        .bind(confidence)
        .bind(reason)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn count_quarantine_by_reason(&self) -> Result<Vec<(QuarantineReason, i64)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT quarantine_reason, count(*) FROM quarantine_events WHERE reviewed_at IS NULL GROUP BY quarantine_reason",
        )
        .fetch_all(&self.pool)
        .await
    }
}
