use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Store;
use crate::domain::{NotificationChannelType, NotificationStatus, NotificationType, Severity};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationChannelRow {
    pub id: Uuid,
    pub name: String,
    pub channel_type: NotificationChannelType,
    pub config: serde_json::Value,
    pub severity_filter: Option<Vec<Severity>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationQueueRow {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub incident_id: Option<Uuid>,
    pub notification_type: NotificationType,
    pub payload: serde_json::Value,
}

impl Store {
    pub async fn list_enabled_channels(&self) -> Result<Vec<NotificationChannelRow>, sqlx::Error> {
        sqlx::query_as::<_, NotificationChannelRow>(
            "SELECT id, name, channel_type, config, severity_filter FROM notification_channels WHERE enabled = true",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn enqueue_notification(
        &self,
        channel_id: Uuid,
        incident_id: Option<Uuid>,
        notification_type: NotificationType,
        payload: &serde_json::Value,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Uuid, sqlx::Error> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO notification_queue (channel_id, incident_id, notification_type, payload, scheduled_for)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(channel_id)
        .bind(incident_id)
        .bind(notification_type)
        .bind(payload)
        .bind(scheduled_for)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn list_due_notifications(&self) -> Result<Vec<NotificationQueueRow>, sqlx::Error> {
        sqlx::query_as::<_, NotificationQueueRow>(
            r#"
            SELECT id, channel_id, incident_id, notification_type, payload
            FROM notification_queue
            WHERE scheduled_for <= now()
            ORDER BY scheduled_for
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn delete_flushed_notification(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM notification_queue WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn log_notification(
        &self,
        channel_id: Option<Uuid>,
        incident_id: Option<Uuid>,
        notification_type: NotificationType,
        payload: &serde_json::Value,
        status: NotificationStatus,
        error_message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO notification_log (channel_id, incident_id, notification_type, payload, status, error_message, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, CASE WHEN $5 = 'sent' THEN now() ELSE NULL END)
            "#,
        )
        .bind(channel_id)
        .bind(incident_id)
        .bind(notification_type)
        .bind(payload)
        .bind(status)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
