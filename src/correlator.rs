use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::{AlertState, IncidentStatus, ResolutionReason, Severity};
use crate::error::PipelineError;
use crate::store::types::NewAlertEvent;
use crate::store::Store;

/// Tunables the correlator needs from configuration, kept narrow so callers
/// don't have to hand it the whole `Settings`.
#[derive(Debug, Clone, Copy)]
pub struct CorrelatorConfig {
    pub dedupe_window: Duration,
    pub flap_quiet_time: Duration,
}

struct OpenIncident {
    id: Uuid,
    status: IncidentStatus,
    severity_max: Severity,
    last_state: AlertState,
    flap_count: i32,
    last_state_change_at: DateTime<Utc>,
    resolution_reason: Option<ResolutionReason>,
}

/// Runs one event through the fingerprint -> incident state machine in a
/// single transaction, returning the id of the incident it was linked to.
pub async fn correlate_event(
    store: &Store,
    event: NewAlertEvent,
    config: CorrelatorConfig,
) -> Result<Uuid, PipelineError> {
    let mut tx = store.pool().begin().await?;

    let (event_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO alert_events (
            raw_email_id, source_tool, environment, region, host, check_name, service,
            severity, state, occurred_at, normalized_signature, fingerprint, fingerprint_v2,
            payload, tags
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING id
        "#,
    )
    .bind(event.raw_email_id)
    .bind(&event.source_tool)
    .bind(&event.environment)
    .bind(&event.region)
    .bind(&event.host)
    .bind(&event.check_name)
    .bind(&event.service)
    .bind(event.severity)
    .bind(event.state)
    .bind(event.occurred_at)
    .bind(&event.normalized_signature)
    .bind(&event.fingerprint)
    .bind(&event.fingerprint_v2)
    .bind(&event.payload)
    .bind(&event.tags)
    .fetch_one(&mut *tx)
    .await?;

    // Serializes first-seen-fingerprint races: two concurrent events for a
    // brand-new fingerprint must not create two incidents.
    let lock_key: i64 = sqlx::query("SELECT hashtextextended($1, 0) AS k")
        .bind(&event.fingerprint_v2)
        .fetch_one(&mut *tx)
        .await?
        .try_get("k")?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(lock_key)
        .execute(&mut *tx)
        .await?;

    let open_incident: Option<OpenIncident> = sqlx::query_as::<_, (Uuid, IncidentStatus, Severity, AlertState, i32, DateTime<Utc>, Option<ResolutionReason>)>(
        r#"
        SELECT id, status, severity_max, last_state, flap_count, last_state_change_at, resolution_reason
        FROM incidents
        WHERE fingerprint_v2 = $1 AND status IN ('open', 'acknowledged', 'resolving')
        ORDER BY last_seen_at DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(&event.fingerprint_v2)
    .fetch_optional(&mut *tx)
    .await?
    .map(|(id, status, severity_max, last_state, flap_count, last_state_change_at, resolution_reason)| OpenIncident {
        id,
        status,
        severity_max,
        last_state,
        flap_count,
        last_state_change_at,
        resolution_reason,
    });

    let open_incident = match open_incident {
        Some(incident) => Some(incident),
        None => find_by_v1_fallback(&mut tx, &event.fingerprint).await?,
    };

    let incident_id = if let Some(incident) = open_incident {
        update_existing_incident(&mut tx, &incident, &event, config, event_id).await?
    } else if event.state == AlertState::Resolved {
        if let Some(recent_id) = find_recently_resolved(&mut tx, &event.fingerprint_v2).await? {
            link_event(&mut tx, recent_id, event_id, false).await?;
            recent_id
        } else {
            create_incident(&mut tx, &event, event_id).await?
        }
    } else {
        create_incident(&mut tx, &event, event_id).await?
    };

    tx.commit().await?;
    Ok(incident_id)
}

async fn find_by_v1_fallback(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    fingerprint_v1: &str,
) -> Result<Option<OpenIncident>, PipelineError> {
    let row = sqlx::query_as::<_, (Uuid, IncidentStatus, Severity, AlertState, i32, DateTime<Utc>, Option<ResolutionReason>)>(
        r#"
        SELECT id, status, severity_max, last_state, flap_count, last_state_change_at, resolution_reason
        FROM incidents
        WHERE fingerprint = $1 AND status IN ('open', 'acknowledged', 'resolving')
        ORDER BY last_seen_at DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(fingerprint_v1)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(|(id, status, severity_max, last_state, flap_count, last_state_change_at, resolution_reason)| OpenIncident {
        id,
        status,
        severity_max,
        last_state,
        flap_count,
        last_state_change_at,
        resolution_reason,
    }))
}

async fn find_recently_resolved(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    fingerprint_v2: &str,
) -> Result<Option<Uuid>, PipelineError> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM incidents
        WHERE fingerprint_v2 = $1 AND status = 'resolved' AND resolved_at >= now() - interval '1 hour'
        ORDER BY resolved_at DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(fingerprint_v2)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(|(id,)| id))
}

async fn update_existing_incident(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    incident: &OpenIncident,
    event: &NewAlertEvent,
    config: CorrelatorConfig,
    event_id: Uuid,
) -> Result<Uuid, PipelineError> {
    let is_deduplicated = has_recent_same_state_link(tx, incident.id, event.state, config.dedupe_window).await?;

    let severity_max = if event.severity.rank() > incident.severity_max.rank() {
        log::info!(
            "incident {} severity escalated: {} -> {}",
            incident.id, incident.severity_max, event.severity
        );
        event.severity
    } else {
        incident.severity_max
    };

    let transition = next_status(incident, event.state, config.flap_quiet_time);

    let status_changed = transition.status != incident.status;
    let flap_count = incident.flap_count + if transition.flapped { 1 } else { 0 };

    sqlx::query(
        r#"
        UPDATE incidents SET
            severity_current = $2,
            severity_max = $3,
            last_state = $4,
            status = $5,
            last_seen_at = $6,
            event_count = event_count + 1,
            flap_count = $7,
            last_state_change_at = CASE WHEN $8 THEN $6 ELSE last_state_change_at END,
            resolution_reason = $9,
            resolved_at = CASE WHEN $5 = 'resolved' THEN $6 ELSE NULL END,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(incident.id)
    .bind(event.severity)
    .bind(severity_max)
    .bind(event.state)
    .bind(transition.status)
    .bind(event.occurred_at)
    .bind(flap_count)
    .bind(status_changed)
    .bind(transition.resolution_reason)
    .execute(&mut **tx)
    .await?;

    link_event(tx, incident.id, event_id, is_deduplicated).await?;
    Ok(incident.id)
}

async fn has_recent_same_state_link(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    incident_id: Uuid,
    state: AlertState,
    window: Duration,
) -> Result<bool, PipelineError> {
    let cutoff = Utc::now() - window;
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT 1 FROM incident_events ie
        JOIN alert_events e ON e.id = ie.alert_event_id
        WHERE ie.incident_id = $1 AND e.state = $2 AND e.occurred_at >= $3
        LIMIT 1
        "#,
    )
    .bind(incident_id)
    .bind(state)
    .bind(cutoff)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.is_some())
}

async fn link_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    incident_id: Uuid,
    event_id: Uuid,
    is_deduplicated: bool,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO incident_events (incident_id, alert_event_id, is_deduplicated)
        VALUES ($1, $2, $3)
        ON CONFLICT (incident_id, alert_event_id) DO NOTHING
        "#,
    )
    .bind(incident_id)
    .bind(event_id)
    .bind(is_deduplicated)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn create_incident(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &NewAlertEvent,
    event_id: Uuid,
) -> Result<Uuid, PipelineError> {
    let title = build_title(event);
    let (incident_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO incidents (
            fingerprint, fingerprint_v2, title, source_tool, environment, region, host,
            check_name, service, severity_current, severity_max, last_state, status,
            first_seen_at, last_seen_at, event_count
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10, $11, 'open', $12, $12, 1)
        RETURNING id
        "#,
    )
    .bind(&event.fingerprint)
    .bind(&event.fingerprint_v2)
    .bind(&title)
    .bind(&event.source_tool)
    .bind(&event.environment)
    .bind(&event.region)
    .bind(&event.host)
    .bind(&event.check_name)
    .bind(&event.service)
    .bind(event.severity)
    .bind(event.state)
    .bind(event.occurred_at)
    .fetch_one(&mut **tx)
    .await?;

    link_event(tx, incident_id, event_id, false).await?;
    Ok(incident_id)
}

fn build_title(event: &NewAlertEvent) -> String {
    let check_or_service = event
        .check_name
        .as_deref()
        .or(event.service.as_deref())
        .unwrap_or("unknown check");
    let host = event.host.as_deref().unwrap_or("unknown host");
    let source = event.source_tool.as_deref().unwrap_or("unknown source");
    let title = format!(
        "[{}] {} {} ({})",
        event.severity.to_string().to_uppercase(),
        host,
        check_or_service,
        source
    );
    title.chars().take(500).collect()
}

struct Transition {
    status: IncidentStatus,
    resolution_reason: Option<ResolutionReason>,
    flapped: bool,
}

/// Pure state-machine step: given the incident's current status/history and
/// the incoming event's state, decides the next status.
fn next_status(incident: &OpenIncident, state: AlertState, flap_quiet_time: Duration) -> Transition {
    match (incident.status, state) {
        (IncidentStatus::Open, AlertState::Firing) => Transition {
            status: IncidentStatus::Open,
            resolution_reason: incident.resolution_reason,
            flapped: false,
        },
        (IncidentStatus::Open, AlertState::Resolved) => Transition {
            status: IncidentStatus::Resolving,
            resolution_reason: None,
            flapped: false,
        },
        (IncidentStatus::Resolving, AlertState::Resolved) => {
            let quiet_long_enough = Utc::now() - incident.last_state_change_at >= flap_quiet_time;
            if quiet_long_enough {
                Transition {
                    status: IncidentStatus::Resolved,
                    resolution_reason: Some(ResolutionReason::ExplicitClear),
                    flapped: false,
                }
            } else {
                Transition {
                    status: IncidentStatus::Resolving,
                    resolution_reason: None,
                    flapped: false,
                }
            }
        }
        (IncidentStatus::Resolving, AlertState::Firing) => Transition {
            status: IncidentStatus::Open,
            resolution_reason: None,
            flapped: true,
        },
        (IncidentStatus::Acknowledged, AlertState::Firing) => Transition {
            status: IncidentStatus::Acknowledged,
            resolution_reason: incident.resolution_reason,
            flapped: false,
        },
        (IncidentStatus::Acknowledged, AlertState::Resolved) => Transition {
            status: IncidentStatus::Resolving,
            resolution_reason: None,
            flapped: false,
        },
        (_, AlertState::Unknown) => Transition {
            status: incident.status,
            resolution_reason: incident.resolution_reason,
            flapped: false,
        },
        (other, state) => Transition {
            status: other,
            resolution_reason: incident.resolution_reason,
            flapped: incident.last_state == AlertState::Resolved && state == AlertState::Firing,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident(status: IncidentStatus, last_state: AlertState, changed_at: DateTime<Utc>) -> OpenIncident {
        OpenIncident {
            id: Uuid::nil(),
            status,
            severity_max: Severity::Medium,
            last_state,
            flap_count: 0,
            last_state_change_at: changed_at,
            resolution_reason: None,
        }
    }

    #[test]
    fn open_stays_open_on_firing() {
        let inc = incident(IncidentStatus::Open, AlertState::Firing, Utc::now());
        let t = next_status(&inc, AlertState::Firing, Duration::minutes(15));
        assert_eq!(t.status, IncidentStatus::Open);
        assert!(!t.flapped);
    }

    #[test]
    fn open_moves_to_resolving_on_resolved_event() {
        let inc = incident(IncidentStatus::Open, AlertState::Firing, Utc::now());
        let t = next_status(&inc, AlertState::Resolved, Duration::minutes(15));
        assert_eq!(t.status, IncidentStatus::Resolving);
    }

    #[test]
    fn resolving_clears_after_quiet_period() {
        let inc = incident(
            IncidentStatus::Resolving,
            AlertState::Resolved,
            Utc::now() - Duration::minutes(20),
        );
        let t = next_status(&inc, AlertState::Resolved, Duration::minutes(15));
        assert_eq!(t.status, IncidentStatus::Resolved);
        assert_eq!(t.resolution_reason, Some(ResolutionReason::ExplicitClear));
    }

    #[test]
    fn resolving_stays_resolving_inside_quiet_period() {
        let inc = incident(
            IncidentStatus::Resolving,
            AlertState::Resolved,
            Utc::now() - Duration::minutes(5),
        );
        let t = next_status(&inc, AlertState::Resolved, Duration::minutes(15));
        assert_eq!(t.status, IncidentStatus::Resolving);
    }

    #[test]
    fn resolving_reopens_and_flaps_on_firing() {
        let inc = incident(IncidentStatus::Resolving, AlertState::Resolved, Utc::now());
        let t = next_status(&inc, AlertState::Firing, Duration::minutes(15));
        assert_eq!(t.status, IncidentStatus::Open);
        assert!(t.flapped);
    }
}
