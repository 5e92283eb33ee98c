pub mod ics;
pub mod rrule_expand;
pub mod scope;

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::domain::{MaintenanceSource, SuppressMode};
use crate::error::PipelineError;
use crate::store::maintenance::NewMaintenanceWindow;
use crate::store::Store;
use ics::IcsOutcome;
use scope::Scope;

static SUBJECT_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(\[MW\]|\[Maintenance\]|Maintenance:)").unwrap());
static BODY_KEYWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(maintenance window|scheduled maintenance|planned outage)").unwrap());

/// One parsed inbound email, the shape the maintenance engine needs — intake
/// hands this over after MIME-walking a raw message.
pub struct MaintenanceCandidate<'a> {
    pub subject: &'a str,
    pub body: &'a str,
    pub ics_parts: &'a [String],
    pub received_at: chrono::DateTime<Utc>,
    pub raw_email_id: uuid::Uuid,
}

/// True if an inbound email should be routed to the maintenance pipeline
/// rather than treated as an alert.
pub fn looks_like_maintenance(candidate: &MaintenanceCandidate) -> bool {
    SUBJECT_PREFIX_RE.is_match(candidate.subject)
        || !candidate.ics_parts.is_empty()
        || BODY_KEYWORD_RE.is_match(candidate.body)
}

/// Persists every window/cancellation found in a maintenance email. ICS parts
/// take priority; when absent, falls back to body-pattern extraction with
/// documented defaults (start = email date, end = start + 2h, timezone UTC).
pub async fn ingest_maintenance_email(
    store: &Store,
    candidate: &MaintenanceCandidate<'_>,
    rrule_horizon_days: i64,
) -> Result<(), PipelineError> {
    if !candidate.ics_parts.is_empty() {
        for ics_content in candidate.ics_parts {
            for outcome in ics::parse_ics(ics_content)? {
                if let IcsOutcome::Announce(window) = &outcome {
                    if let Some(rule) = &window.recurrence_rule {
                        let duration = window.ends_at - window.starts_at;
                        let horizon = Duration::days(rrule_horizon_days);
                        if rrule_expand::expand_occurrences(rule, window.starts_at, duration, horizon)
                            .map(|occ| occ.is_empty())
                            .unwrap_or(true)
                        {
                            log::warn!(
                                "recurring maintenance window {} produced no occurrences within {} days",
                                window.external_event_id, rrule_horizon_days
                            );
                        }
                    }
                }
                apply_ics_outcome(store, outcome, candidate.raw_email_id).await?;
            }
        }
        return Ok(());
    }

    let window = extract_from_body(candidate);
    store
        .upsert_maintenance_window(NewMaintenanceWindow {
            source: MaintenanceSource::Email,
            external_event_id: None,
            title: window.title,
            description: None,
            organizer: None,
            starts_at: window.starts_at,
            ends_at: window.ends_at,
            timezone: window.timezone,
            is_recurring: false,
            recurrence_rule: None,
            scope: serde_json::to_value(&window.scope).unwrap_or(json!({})),
            suppress_mode: window.suppress_mode,
            raw_email_id: Some(candidate.raw_email_id),
        })
        .await?;
    Ok(())
}

async fn apply_ics_outcome(store: &Store, outcome: IcsOutcome, raw_email_id: uuid::Uuid) -> Result<(), PipelineError> {
    match outcome {
        IcsOutcome::Cancel { external_event_id } => {
            store
                .cancel_maintenance_window(MaintenanceSource::Email, &external_event_id)
                .await?;
        }
        IcsOutcome::Announce(window) => {
            store
                .upsert_maintenance_window(NewMaintenanceWindow {
                    source: MaintenanceSource::Email,
                    external_event_id: Some(window.external_event_id),
                    title: window.title,
                    description: window.description,
                    organizer: window.organizer,
                    starts_at: window.starts_at,
                    ends_at: window.ends_at,
                    timezone: window.timezone,
                    is_recurring: window.recurrence_rule.is_some(),
                    recurrence_rule: window.recurrence_rule,
                    scope: json!({}),
                    suppress_mode: SuppressMode::Mute,
                    raw_email_id: Some(raw_email_id),
                })
                .await?;
        }
    }
    Ok(())
}

struct BodyExtracted {
    title: String,
    starts_at: chrono::DateTime<Utc>,
    ends_at: chrono::DateTime<Utc>,
    timezone: String,
    scope: Scope,
    suppress_mode: SuppressMode,
}

static MODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)mode:\s*(mute|downgrade|digest)").unwrap());
static TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?im)^\s*title:\s*(.+)$").unwrap());
static SCOPE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?im)^\s*scope:\s*(.+)$").unwrap());
static START_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?im)^\s*start:\s*(.+)$").unwrap());
static END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?im)^\s*end:\s*(.+)$").unwrap());
static TIMEZONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?im)^\s*timezone:\s*(.+)$").unwrap());

/// Parses a date/time string the way `dateparser` already does elsewhere in
/// this crate, then reinterprets the resulting wall-clock components as local
/// time in `tz` rather than UTC (mirrors `ics::resolve_datetime`'s floating
/// -> zoned promotion for body-announced windows, which carry no offset of
/// their own).
fn parse_window_datetime(raw: &str, tz: &Tz) -> Option<DateTime<Utc>> {
    let parsed = dateparser::parse(raw).ok()?;
    if *tz == Tz::UTC {
        return Some(parsed);
    }
    tz.from_local_datetime(&parsed.naive_utc())
        .single()
        .map(|d| d.with_timezone(&Utc))
}

/// Parses a `Scope:` line of `;`-separated `key=value[,value...]` pairs
/// (e.g. `host=web-*,web-02;env=prod;tags=db,critical`) into a structured
/// `Scope`.
fn parse_scope_line(raw: &str) -> Scope {
    let mut scope = Scope::default();
    for part in raw.split(';') {
        let part = part.trim();
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let values: Vec<String> = value
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        match key.trim().to_lowercase().as_str() {
            "host" | "hosts" => scope.hosts = values,
            "host_regex" => scope.host_regex = values.into_iter().next(),
            "service" | "services" => scope.services = values,
            "service_regex" => scope.service_regex = values.into_iter().next(),
            "env" | "environment" | "environments" => scope.environments = values,
            "region" | "regions" => scope.regions = values,
            "check" | "check_name" | "check_names" => scope.check_names = values,
            "tag" | "tags" => scope.tags = values,
            _ => {}
        }
    }
    scope
}

fn extract_from_body(candidate: &MaintenanceCandidate) -> BodyExtracted {
    let suppress_mode = MODE_RE
        .captures(candidate.body)
        .and_then(|c| c.get(1))
        .map(|m| match m.as_str().to_lowercase().as_str() {
            "downgrade" => SuppressMode::Downgrade,
            "digest" => SuppressMode::Digest,
            _ => SuppressMode::Mute,
        })
        .unwrap_or(SuppressMode::Mute);

    let timezone: Tz = TIMEZONE_RE
        .captures(candidate.body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().trim().parse::<Tz>().ok())
        .unwrap_or(Tz::UTC);

    let starts_at = START_RE
        .captures(candidate.body)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_window_datetime(m.as_str().trim(), &timezone))
        .unwrap_or(candidate.received_at);

    let ends_at = END_RE
        .captures(candidate.body)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_window_datetime(m.as_str().trim(), &timezone))
        .unwrap_or(starts_at + Duration::hours(2));

    let title = TITLE_RE
        .captures(candidate.body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().chars().take(200).collect())
        .unwrap_or_else(|| candidate.subject.chars().take(200).collect());

    let scope = SCOPE_RE
        .captures(candidate.body)
        .and_then(|c| c.get(1))
        .map(|m| parse_scope_line(m.as_str().trim()))
        .unwrap_or_default();

    BodyExtracted {
        title,
        starts_at,
        ends_at,
        timezone: timezone.name().to_string(),
        scope,
        suppress_mode,
    }
}

/// Whether `window` covers the current instant. Non-recurring windows are
/// checked directly; recurring ones are expanded via their RRULE so the
/// stored `starts_at`/`ends_at` (the *original* occurrence) don't have to be
/// kept in sync with the wall clock.
fn covers_now(window: &crate::store::maintenance::MaintenanceWindowRow, horizon_days: i64) -> bool {
    if !window.is_recurring {
        let now = Utc::now();
        return window.starts_at <= now && now <= window.ends_at;
    }
    let Some(rule) = &window.recurrence_rule else {
        return false;
    };
    let duration = window.ends_at - window.starts_at;
    let Ok(occurrences) =
        rrule_expand::expand_occurrences(rule, window.starts_at, duration, Duration::days(horizon_days))
    else {
        return false;
    };
    let now = Utc::now();
    occurrences.iter().any(|(start, end)| *start <= now && now <= *end)
}

/// Pass 1: for each window currently in effect, attempt to match every
/// eligible incident, recording a MaintenanceMatch and flagging the incident
/// on success.
pub async fn run_match_pass(store: &Store, rrule_horizon_days: i64) -> Result<usize, PipelineError> {
    let windows = store.list_active_maintenance_windows().await?;
    let windows: Vec<_> = windows
        .into_iter()
        .filter(|w| covers_now(w, rrule_horizon_days))
        .collect();
    let incidents = store.list_incidents_needing_maintenance_match().await?;
    let mut matched = 0;

    let mut incident_tags = std::collections::HashMap::with_capacity(incidents.len());
    for incident in &incidents {
        incident_tags.insert(incident.id, store.distinct_tags_for_incident(incident.id).await?);
    }

    for window in &windows {
        let scope: Scope = serde_json::from_value(window.scope.clone()).unwrap_or_default();
        for incident in &incidents {
            let tags = incident_tags.get(&incident.id).map(Vec::as_slice).unwrap_or(&[]);
            let outcome = scope::matches_with_tags(&scope, incident, tags);
            if !outcome.matches {
                continue;
            }
            let reason = serde_json::to_value(&outcome.checks).unwrap_or(json!([]));
            let inserted = store.insert_maintenance_match(window.id, incident.id, &reason).await?;
            if inserted {
                store.set_incident_in_maintenance(incident.id, window.id).await?;
                matched += 1;
            }
        }
    }
    Ok(matched)
}

/// Pass 2: clear the in-maintenance flag from any incident no longer covered
/// by a window currently in effect.
pub async fn run_clear_pass(store: &Store, rrule_horizon_days: i64) -> Result<usize, PipelineError> {
    let active_windows: std::collections::HashSet<uuid::Uuid> = store
        .list_active_maintenance_windows()
        .await?
        .into_iter()
        .filter(|w| covers_now(w, rrule_horizon_days))
        .map(|w| w.id)
        .collect();

    let in_maintenance = store.list_incidents_in_maintenance().await?;
    let mut cleared = 0;
    for incident in in_maintenance {
        let still_covered = incident
            .maintenance_window_id
            .map(|id| active_windows.contains(&id))
            .unwrap_or(false);
        if !still_covered {
            store.clear_incident_maintenance(incident.id).await?;
            cleared += 1;
        }
    }
    Ok(cleared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_prefix_is_detected() {
        let candidate = MaintenanceCandidate {
            subject: "[MW] DB failover drill",
            body: "",
            ics_parts: &[],
            received_at: Utc::now(),
            raw_email_id: uuid::Uuid::nil(),
        };
        assert!(looks_like_maintenance(&candidate));
    }

    #[test]
    fn body_keywords_are_detected() {
        let candidate = MaintenanceCandidate {
            subject: "Heads up",
            body: "we have a scheduled maintenance window tonight",
            ics_parts: &[],
            received_at: Utc::now(),
            raw_email_id: uuid::Uuid::nil(),
        };
        assert!(looks_like_maintenance(&candidate));
    }

    #[test]
    fn unrelated_email_is_not_maintenance() {
        let candidate = MaintenanceCandidate {
            subject: "disk full on web-01",
            body: "CRITICAL: disk usage at 95%",
            ics_parts: &[],
            received_at: Utc::now(),
            raw_email_id: uuid::Uuid::nil(),
        };
        assert!(!looks_like_maintenance(&candidate));
    }

    #[test]
    fn body_extraction_parses_all_announced_fields() {
        let candidate = MaintenanceCandidate {
            subject: "[MW] fallback subject",
            body: "Title: DB failover drill\n\
                   Scope: host=web-*,web-02;env=prod;tags=db,critical\n\
                   Mode: downgrade\n\
                   Start: 2026-08-01 01:00:00\n\
                   End: 2026-08-01 03:00:00\n\
                   Timezone: UTC\n",
            ics_parts: &[],
            received_at: Utc::now(),
            raw_email_id: uuid::Uuid::nil(),
        };

        let window = extract_from_body(&candidate);
        assert_eq!(window.title, "DB failover drill");
        assert_eq!(window.suppress_mode, SuppressMode::Downgrade);
        assert_eq!(window.timezone, "UTC");
        assert_eq!(window.scope.hosts, vec!["web-*".to_string(), "web-02".to_string()]);
        assert_eq!(window.scope.environments, vec!["prod".to_string()]);
        assert_eq!(window.scope.tags, vec!["db".to_string(), "critical".to_string()]);
        assert!(window.ends_at > window.starts_at);
    }

    #[test]
    fn body_extraction_falls_back_to_subject_and_defaults_without_announced_fields() {
        let received_at = Utc::now();
        let candidate = MaintenanceCandidate {
            subject: "Heads up: maintenance window tonight",
            body: "we have a scheduled maintenance window tonight",
            ics_parts: &[],
            received_at,
            raw_email_id: uuid::Uuid::nil(),
        };

        let window = extract_from_body(&candidate);
        assert_eq!(window.title, candidate.subject.to_string());
        assert_eq!(window.suppress_mode, SuppressMode::Mute);
        assert_eq!(window.starts_at, received_at);
        assert_eq!(window.ends_at, received_at + Duration::hours(2));
        assert!(window.scope.hosts.is_empty());
    }
}
