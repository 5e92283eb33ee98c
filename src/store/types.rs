use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AlertState, IncidentStatus, ParseStatus, ResolutionReason, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RawEmailRow {
    pub id: Uuid,
    pub folder: String,
    pub uid: i64,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub ics_content: Option<String>,
    pub parse_status: ParseStatus,
    pub parse_error: Option<String>,
}

/// Everything intake needs to persist a single fetched message.
pub struct NewRawEmail {
    pub folder: String,
    pub uid: i64,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub to_addresses: Option<String>,
    pub cc_addresses: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub headers: serde_json::Value,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub ics_content: Option<String>,
    pub attachments: Vec<AttachmentDescriptor>,
    pub raw_mime: Vec<u8>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IncidentRow {
    pub id: Uuid,
    pub fingerprint: String,
    pub fingerprint_v2: String,
    pub title: String,
    pub source_tool: Option<String>,
    pub environment: Option<String>,
    pub region: Option<String>,
    pub host: Option<String>,
    pub check_name: Option<String>,
    pub service: Option<String>,
    pub severity_current: Severity,
    pub severity_max: Severity,
    pub last_state: AlertState,
    pub status: IncidentStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub event_count: i32,
    pub flap_count: i32,
    pub last_state_change_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_reason: Option<ResolutionReason>,
    pub is_in_maintenance: bool,
    pub maintenance_window_id: Option<Uuid>,
    pub ai_enriched_at: Option<DateTime<Utc>>,
}

pub struct NewAlertEvent {
    pub raw_email_id: Option<Uuid>,
    pub source_tool: Option<String>,
    pub environment: Option<String>,
    pub region: Option<String>,
    pub host: Option<String>,
    pub check_name: Option<String>,
    pub service: Option<String>,
    pub severity: Severity,
    pub state: AlertState,
    pub occurred_at: DateTime<Utc>,
    pub normalized_signature: String,
    pub fingerprint: String,
    pub fingerprint_v2: String,
    pub payload: serde_json::Value,
    pub tags: Vec<String>,
}
