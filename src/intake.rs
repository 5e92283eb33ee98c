use base64::Engine;
use mailparse::{parse_mail, MailHeaderMap};
use uuid::Uuid;

use crate::adapters::FetchedMessage;
use crate::config::Settings;
use crate::correlator::{self, CorrelatorConfig};
use crate::domain::{AlertState, NotificationType, ParseStatus, Severity};
use crate::error::PipelineError;
use crate::fingerprint::{self, EventFingerprintInput};
use crate::idempotency::{self, IdempotentOutcome};
use crate::maintenance::{self, MaintenanceCandidate};
use crate::notifier::Notifier;
use crate::parser::learning::LearningExtractor;
use crate::parser::registry::ParserRegistry;
use crate::parser::ExtractedFields;
use crate::redactor::Redactor;
use crate::store::types::{AttachmentDescriptor, NewAlertEvent, NewRawEmail};
use crate::store::Store;

/// Bundles the parsing/correlation collaborators intake needs so adapters and
/// the scheduler's DLQ retry phase can share one handle instead of threading
/// four separate arguments everywhere.
pub struct IntakeContext {
    pub parser_registry: ParserRegistry,
    pub learning_extractor: Option<LearningExtractor>,
    pub redactor: Redactor,
    pub notifier: Notifier,
}

/// Everything MIME-walking needs out of a raw message, independent of which
/// adapter produced it.
struct ParsedMessage {
    subject: String,
    from_address: String,
    to_addresses: Option<String>,
    cc_addresses: Option<String>,
    message_id: Option<String>,
    received_at: Option<chrono::DateTime<chrono::Utc>>,
    headers: serde_json::Value,
    body_text: String,
    body_html: Option<String>,
    ics_parts: Vec<String>,
    attachments: Vec<AttachmentDescriptor>,
}

fn walk_mime(mime_bytes: &[u8]) -> Result<ParsedMessage, PipelineError> {
    let parsed = parse_mail(mime_bytes)?;

    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    let from_address = parsed
        .headers
        .get_first_value("From")
        .and_then(|raw| mailparse::addrparse(&raw).ok())
        .and_then(|addrs| addrs.iter().next().map(|a| a.to_string()))
        .unwrap_or_default();
    let to_addresses = parsed.headers.get_first_value("To");
    let cc_addresses = parsed.headers.get_first_value("Cc");
    let message_id = parsed
        .headers
        .get_first_value("Message-ID")
        .map(|id| id.trim().trim_matches(&['<', '>'][..]).to_string());
    let received_at = parsed
        .headers
        .get_first_value("Date")
        .and_then(|raw| dateparser::parse(&raw).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc));

    let headers: serde_json::Value = serde_json::json!(parsed
        .headers
        .iter()
        .map(|h| (h.get_key(), h.get_value()))
        .collect::<std::collections::HashMap<_, _>>());

    let mut body_text = String::new();
    let mut body_html = None;
    let mut ics_parts = Vec::new();
    let mut attachments = Vec::new();
    collect_parts(&parsed, &mut body_text, &mut body_html, &mut ics_parts, &mut attachments);

    if body_text.is_empty() {
        body_text = parsed.get_body().unwrap_or_default();
    }

    Ok(ParsedMessage {
        subject,
        from_address,
        to_addresses,
        cc_addresses,
        message_id,
        received_at,
        headers,
        body_text,
        body_html,
        ics_parts,
        attachments,
    })
}

fn collect_parts(
    part: &mailparse::ParsedMail,
    body_text: &mut String,
    body_html: &mut Option<String>,
    ics_parts: &mut Vec<String>,
    attachments: &mut Vec<AttachmentDescriptor>,
) {
    if part.subparts.is_empty() {
        let mimetype = part.ctype.mimetype.as_str();
        let disposition = part.get_content_disposition().disposition;
        let is_attachment = matches!(disposition, mailparse::DispositionType::Attachment);

        if is_attachment {
            let filename = part
                .get_content_disposition()
                .params
                .get("filename")
                .cloned()
                .unwrap_or_else(|| "attachment".to_string());
            let body = part.get_body_raw().unwrap_or_default();
            attachments.push(AttachmentDescriptor {
                filename,
                content_type: mimetype.to_string(),
                size: body.len(),
            });
            return;
        }

        match mimetype {
            "text/plain" if body_text.is_empty() => {
                *body_text = part.get_body().unwrap_or_default();
            }
            "text/html" if body_html.is_none() => {
                *body_html = part.get_body().ok();
            }
            "text/calendar" => {
                if let Ok(content) = part.get_body() {
                    ics_parts.push(content);
                }
            }
            _ => {}
        }
        return;
    }

    for sub in &part.subparts {
        collect_parts(sub, body_text, body_html, ics_parts, attachments);
    }
}

/// Processes one message fetched by an adapter: persists the raw email,
/// routes it to the maintenance pipeline or the alert pipeline, and runs it
/// through correlation and notification. Any unrecoverable failure lands the
/// message in the dead letter queue instead of propagating.
pub async fn process_message(
    store: &Store,
    settings: &Settings,
    ctx: &IntakeContext,
    message: FetchedMessage,
) {
    let email_id = format!("{}:{}", message.folder, message.external_uid);
    match try_process_message(store, settings, ctx, &message, &email_id).await {
        Ok(()) => {}
        Err(err) => {
            log::error!("intake failed for {}: {}", email_id, err);
            let payload = serde_json::json!({
                "folder": message.folder,
                "external_uid": message.external_uid,
                "mime_bytes_b64": base64::engine::general_purpose::STANDARD.encode(&message.mime_bytes),
            });
            if let Err(dlq_err) = store
                .enqueue_dead_letter("inbound_email", &payload, &err.to_string(), None, settings.dlq_max_retries)
                .await
            {
                log::error!("failed to enqueue dead letter for {}: {}", email_id, dlq_err);
            }
        }
    }
}

async fn try_process_message(
    store: &Store,
    settings: &Settings,
    ctx: &IntakeContext,
    message: &FetchedMessage,
    email_id: &str,
) -> Result<(), PipelineError> {
    let parsed = walk_mime(&message.mime_bytes)?;
    let message_id = parsed.message_id.clone().unwrap_or_else(|| email_id.to_string());
    let idempotency_key = idempotency::derive_key(email_id, &message_id);

    let outcome = idempotency::with_idempotency(store, &idempotency_key, || {
        ingest_and_correlate(store, settings, ctx, message, &parsed)
    })
    .await?;

    match outcome {
        IdempotentOutcome::Ran(_) => Ok(()),
        IdempotentOutcome::AlreadyCompleted(_) => {
            log::debug!("message {} already processed, skipping", email_id);
            Ok(())
        }
        IdempotentOutcome::InProgress => {
            log::debug!("message {} is already being processed elsewhere", email_id);
            Ok(())
        }
    }
}

async fn ingest_and_correlate(
    store: &Store,
    settings: &Settings,
    ctx: &IntakeContext,
    message: &FetchedMessage,
    parsed: &ParsedMessage,
) -> Result<serde_json::Value, PipelineError> {
    let raw_email = NewRawEmail {
        folder: message.folder.clone(),
        uid: message.external_uid,
        message_id: parsed.message_id.clone(),
        subject: Some(parsed.subject.clone()),
        from_address: Some(parsed.from_address.clone()),
        to_addresses: parsed.to_addresses.clone(),
        cc_addresses: parsed.cc_addresses.clone(),
        received_at: parsed.received_at,
        headers: parsed.headers.clone(),
        body_text: Some(parsed.body_text.clone()),
        body_html: parsed.body_html.clone(),
        ics_content: parsed.ics_parts.first().cloned(),
        attachments: parsed.attachments.clone(),
        raw_mime: message.mime_bytes.clone(),
    };

    let Some(raw_email_id) = store.intake_raw_email(raw_email).await? else {
        // (folder, uid) already seen; nothing further to do.
        return Ok(serde_json::json!({"status": "duplicate"}));
    };

    let candidate = MaintenanceCandidate {
        subject: &parsed.subject,
        body: &parsed.body_text,
        ics_parts: &parsed.ics_parts,
        received_at: parsed.received_at.unwrap_or_else(chrono::Utc::now),
        raw_email_id,
    };

    if maintenance::looks_like_maintenance(&candidate) {
        maintenance::ingest_maintenance_email(store, &candidate, settings.rrule_expansion_horizon_days).await?;
        store.mark_parse_status(raw_email_id, ParseStatus::Success, None).await?;
        return Ok(serde_json::json!({"status": "maintenance"}));
    }

    let (source_tool, extracted) = match extract_fields(
        store,
        &ctx.parser_registry,
        ctx.learning_extractor.as_ref(),
        raw_email_id,
        &parsed.subject,
        &parsed.from_address,
        &parsed.body_text,
    )
    .await?
    {
        Some(result) => result,
        None => {
            store
                .mark_parse_status(raw_email_id, ParseStatus::Quarantine, Some("no parser matched and extraction was low-confidence"))
                .await?;
            return Ok(serde_json::json!({"status": "quarantined"}));
        }
    };

    let normalized_signature = fingerprint::compute_normalized_signature(&parsed.subject, &parsed.body_text);
    let severity = extracted.severity.as_deref().map(Severity::normalize).unwrap_or(Severity::Medium);
    let state = extracted.state.as_deref().map(AlertState::normalize).unwrap_or(AlertState::Firing);

    let fingerprint_input = EventFingerprintInput {
        environment: None,
        host: extracted.host.as_deref(),
        check_name: extracted.service.as_deref(),
        service: extracted.service.as_deref(),
        normalized_signature: &normalized_signature,
    };
    let fingerprint_v1 = fingerprint::compute_fingerprint_v1(&fingerprint_input);
    let fingerprint_v2 = fingerprint::compute_fingerprint_v2(&fingerprint_input);

    let (redacted_subject, _) = ctx.redactor.redact_email(&parsed.subject, "");

    let event = NewAlertEvent {
        raw_email_id: Some(raw_email_id),
        source_tool: Some(source_tool),
        environment: None,
        region: None,
        host: extracted.host.clone(),
        check_name: extracted.service.clone(),
        service: extracted.service.clone(),
        severity,
        state,
        occurred_at: parsed.received_at.unwrap_or_else(chrono::Utc::now),
        normalized_signature,
        fingerprint: fingerprint_v1,
        fingerprint_v2,
        payload: serde_json::json!({ "subject": redacted_subject, "summary": extracted.summary }),
        tags: Vec::new(),
    };

    let config = CorrelatorConfig {
        dedupe_window: settings.dedupe_window(),
        flap_quiet_time: settings.flap_quiet_time(),
    };
    let incident_id = correlator::correlate_event(store, event, config).await?;
    store.mark_parse_status(raw_email_id, ParseStatus::Success, None).await?;

    if let Some(incident) = store.get_incident(incident_id).await? {
        let suppress_mode = match incident.maintenance_window_id {
            Some(window_id) => store
                .get_maintenance_window(window_id)
                .await?
                .map(|window| window.suppress_mode),
            None => None,
        };
        ctx.notifier
            .notify_incident(store, &incident, NotificationType::Immediate, suppress_mode)
            .await?;
    }

    Ok(serde_json::json!({"status": "ingested", "incident_id": incident_id}))
}

async fn extract_fields(
    store: &Store,
    parser_registry: &ParserRegistry,
    learning_extractor: Option<&LearningExtractor>,
    raw_email_id: Uuid,
    subject: &str,
    from_address: &str,
    body: &str,
) -> Result<Option<(String, ExtractedFields)>, PipelineError> {
    if let Some((source_tool, fields)) = parser_registry.try_all(subject, body) {
        return Ok(Some((source_tool, fields)));
    }

    let Some(extractor) = learning_extractor else {
        return Ok(None);
    };

    let learned = extractor.parse_email(store, raw_email_id, subject, from_address, body).await?;
    if learned.quarantined || !learned.fields.has_identification() {
        return Ok(None);
    }
    Ok(Some((learned.source_tool, learned.fields)))
}

/// Re-runs a dead-lettered inbound message from its persisted payload. Used
/// by the scheduler's DLQ retry phase; only `inbound_email` entries are
/// understood here today.
pub async fn retry_dead_letter(
    store: &Store,
    settings: &Settings,
    ctx: &IntakeContext,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<(), PipelineError> {
    if event_type != "inbound_email" {
        return Err(PipelineError::ValidationFailed(format!(
            "dead letter queue entry has unknown event_type {}",
            event_type
        )));
    }

    let folder = payload
        .get("folder")
        .and_then(|v| v.as_str())
        .ok_or(PipelineError::MissingField("folder"))?
        .to_string();
    let external_uid = payload
        .get("external_uid")
        .and_then(|v| v.as_i64())
        .ok_or(PipelineError::MissingField("external_uid"))?;
    let mime_bytes = payload
        .get("mime_bytes_b64")
        .and_then(|v| v.as_str())
        .and_then(|s| base64::engine::general_purpose::STANDARD.decode(s).ok())
        .ok_or(PipelineError::MissingField("mime_bytes_b64"))?;

    let message = FetchedMessage { folder, external_uid, mime_bytes };
    let email_id = format!("{}:{}", message.folder, message.external_uid);
    try_process_message(store, settings, ctx, &message, &email_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_walk_extracts_subject_and_body() {
        let raw = concat!(
            "Subject: CRITICAL host down\r\n",
            "From: alerts@example.com\r\n",
            "Date: Mon, 2 Jan 2026 03:04:05 +0000\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Host: web-01 is down\r\n"
        );
        let parsed = walk_mime(raw.as_bytes()).unwrap();
        assert_eq!(parsed.subject, "CRITICAL host down");
        assert!(parsed.body_text.contains("web-01"));
    }
}
