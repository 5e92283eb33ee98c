use chrono::{Duration, Utc};
use serde_json::json;

use crate::domain::{
    NotificationChannelType, NotificationStatus, NotificationType, Severity, SuppressMode,
};
use crate::error::PipelineError;
use crate::store::notifications::{NotificationChannelRow, NotificationQueueRow};
use crate::store::types::IncidentRow;
use crate::store::Store;

/// Dispatches incident notifications to configured channels, either
/// synchronously (`immediate`) or via the digest queue the scheduler flushes.
#[derive(Clone)]
pub struct Notifier {
    http_client: reqwest::Client,
    digest_interval: Duration,
}

impl Notifier {
    pub fn new(digest_interval_minutes: i64) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            digest_interval: Duration::minutes(digest_interval_minutes),
        }
    }

    /// Critical severity always forces `immediate`, overriding the caller's
    /// requested notification type — unless `suppress_mode` says otherwise:
    /// `mute` drops the notification entirely, `downgrade` routes on one
    /// severity rank lower (so a downgraded critical no longer trips the
    /// critical-always-immediate rule), and `digest` forces every severity,
    /// including critical, into the digest queue.
    pub async fn notify_incident(
        &self,
        store: &Store,
        incident: &IncidentRow,
        requested: NotificationType,
        suppress_mode: Option<SuppressMode>,
    ) -> Result<(), PipelineError> {
        if suppress_mode == Some(SuppressMode::Mute) {
            return Ok(());
        }

        let routing_severity = if suppress_mode == Some(SuppressMode::Downgrade) {
            incident.severity_current.downgraded()
        } else {
            incident.severity_current
        };

        let notification_type = if suppress_mode == Some(SuppressMode::Digest) {
            NotificationType::Digest
        } else if routing_severity == Severity::Critical {
            NotificationType::Immediate
        } else {
            requested
        };

        let channels = store.list_enabled_channels().await?;
        for channel in channels {
            if !channel_accepts_severity(&channel, routing_severity) {
                continue;
            }

            match notification_type {
                NotificationType::Immediate => self.send_immediate(store, &channel, incident).await?,
                NotificationType::Digest => {
                    let payload = incident_digest_payload(incident);
                    store
                        .enqueue_notification(
                            channel.id,
                            Some(incident.id),
                            NotificationType::Digest,
                            &payload,
                            Utc::now() + self.digest_interval,
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn send_immediate(
        &self,
        store: &Store,
        channel: &NotificationChannelRow,
        incident: &IncidentRow,
    ) -> Result<(), PipelineError> {
        let payload = match channel.channel_type {
            NotificationChannelType::Slack => slack_message(incident),
            NotificationChannelType::Webhook => webhook_message(incident),
        };

        let result = self.deliver(channel, &payload).await;
        let status = if result.is_ok() {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };
        let error_message = result.as_ref().err().map(|e| e.to_string());

        store
            .log_notification(
                Some(channel.id),
                Some(incident.id),
                NotificationType::Immediate,
                &payload,
                status,
                error_message.as_deref(),
            )
            .await?;
        Ok(())
    }

    /// Groups all due digest rows by channel, sends one digest payload per
    /// channel, deletes the flushed rows, and logs one attempt per channel.
    pub async fn flush_digests(&self, store: &Store) -> Result<usize, PipelineError> {
        let due = store.list_due_notifications().await?;
        let mut by_channel: std::collections::HashMap<uuid::Uuid, Vec<NotificationQueueRow>> =
            std::collections::HashMap::new();
        for row in due {
            by_channel.entry(row.channel_id).or_default().push(row);
        }

        let channels = store.list_enabled_channels().await?;
        let mut flushed = 0;
        for (channel_id, rows) in by_channel {
            let Some(channel) = channels.iter().find(|c| c.id == channel_id) else {
                continue;
            };
            let payload = digest_payload(channel.channel_type, &rows);
            let result = self.deliver(channel, &payload).await;
            let status = if result.is_ok() {
                NotificationStatus::Sent
            } else {
                NotificationStatus::Failed
            };
            store
                .log_notification(
                    Some(channel.id),
                    None,
                    NotificationType::Digest,
                    &payload,
                    status,
                    result.as_ref().err().map(|e| e.to_string()).as_deref(),
                )
                .await?;

            for row in &rows {
                store.delete_flushed_notification(row.id).await?;
            }
            flushed += rows.len();
        }
        Ok(flushed)
    }

    async fn deliver(
        &self,
        channel: &NotificationChannelRow,
        payload: &serde_json::Value,
    ) -> Result<(), PipelineError> {
        let Some(url) = channel.config.get("url").and_then(|v| v.as_str()) else {
            return Err(PipelineError::ValidationFailed(format!(
                "channel {} has no configured url",
                channel.id
            )));
        };
        let response = self.http_client.post(url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(PipelineError::ValidationFailed(format!(
                "channel {} responded with {}",
                channel.id,
                response.status()
            )));
        }
        Ok(())
    }
}

fn channel_accepts_severity(channel: &NotificationChannelRow, severity: Severity) -> bool {
    match &channel.severity_filter {
        None => true,
        Some(filter) => filter.contains(&severity),
    }
}

fn incident_digest_payload(incident: &IncidentRow) -> serde_json::Value {
    json!({
        "incident_id": incident.id,
        "title": incident.title,
        "severity": incident.severity_current.to_string(),
        "host": incident.host,
        "service": incident.service,
    })
}

fn slack_message(incident: &IncidentRow) -> serde_json::Value {
    json!({
        "blocks": [
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!(
                        "*[{}]* {}\nhost: `{}` · service: `{}`",
                        incident.severity_current.to_string().to_uppercase(),
                        incident.title,
                        incident.host.as_deref().unwrap_or("-"),
                        incident.service.as_deref().unwrap_or("-"),
                    ),
                }
            }
        ]
    })
}

fn webhook_message(incident: &IncidentRow) -> serde_json::Value {
    json!({
        "type": "incident",
        "incident_id": incident.id,
        "title": incident.title,
        "severity": incident.severity_current.to_string(),
    })
}

fn digest_payload(channel_type: NotificationChannelType, rows: &[NotificationQueueRow]) -> serde_json::Value {
    match channel_type {
        NotificationChannelType::Slack => slack_digest(rows),
        NotificationChannelType::Webhook => json!({
            "type": "digest",
            "count": rows.len(),
            "incidents": rows.iter().map(|r| r.payload.clone()).collect::<Vec<_>>(),
        }),
    }
}

fn slack_digest(rows: &[NotificationQueueRow]) -> serde_json::Value {
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for row in rows {
        let severity = row
            .payload
            .get("severity")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        *counts.entry(severity).or_insert(0) += 1;
    }
    let mut lines: Vec<String> = rows
        .iter()
        .take(10)
        .map(|r| {
            format!(
                "• {}",
                r.payload.get("title").and_then(|v| v.as_str()).unwrap_or("(untitled)")
            )
        })
        .collect();
    if rows.len() > 10 {
        lines.push(format!("…and {} more", rows.len() - 10));
    }

    let counts_line = counts
        .iter()
        .map(|(severity, count)| format!("{}: {}", severity, count))
        .collect::<Vec<_>>()
        .join(", ");

    json!({
        "blocks": [
            { "type": "header", "text": { "type": "plain_text", "text": format!("{} incidents", rows.len()) } },
            { "type": "section", "text": { "type": "mrkdwn", "text": counts_line } },
            { "type": "section", "text": { "type": "mrkdwn", "text": lines.join("\n") } },
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_with_no_filter_accepts_all_severities() {
        let channel = NotificationChannelRow {
            id: uuid::Uuid::nil(),
            name: "default".to_string(),
            channel_type: NotificationChannelType::Webhook,
            config: json!({}),
            severity_filter: None,
        };
        assert!(channel_accepts_severity(&channel, Severity::Info));
        assert!(channel_accepts_severity(&channel, Severity::Critical));
    }

    #[test]
    fn channel_with_filter_rejects_unlisted_severity() {
        let channel = NotificationChannelRow {
            id: uuid::Uuid::nil(),
            name: "critical-only".to_string(),
            channel_type: NotificationChannelType::Slack,
            config: json!({}),
            severity_filter: Some(vec![Severity::Critical]),
        };
        assert!(channel_accepts_severity(&channel, Severity::Critical));
        assert!(!channel_accepts_severity(&channel, Severity::Low));
    }
}
