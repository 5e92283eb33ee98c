use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use sha2::Digest;

use super::{EmailAdapter, FetchedMessage};
use crate::config::Settings;
use crate::error::PipelineError;
use crate::store::Store;

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
const PAGE_SIZE: u32 = 50;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: std::time::Instant,
}

/// Polls a mailbox through Microsoft Graph using an application (client
/// credentials) grant. Graph doesn't expose raw RFC822 directly for app-only
/// access to a single folder the way IMAP does, so `mime_bytes` is
/// synthesized from the JSON message body on fetch.
pub struct GraphAdapter {
    http: reqwest::Client,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    mailbox: String,
    folder_id: String,
    folder_label: String,
    poll_interval: Duration,
    token: Mutex<Option<CachedToken>>,
}

impl GraphAdapter {
    pub fn from_settings(settings: &Settings) -> Result<Self, PipelineError> {
        let tenant_id = settings
            .graph_tenant_id
            .clone()
            .ok_or_else(|| PipelineError::ValidationFailed("GRAPH_TENANT_ID is required for the graph adapter".to_string()))?;
        let client_id = settings
            .graph_client_id
            .clone()
            .ok_or_else(|| PipelineError::ValidationFailed("GRAPH_CLIENT_ID is required for the graph adapter".to_string()))?;
        let client_secret = settings
            .graph_client_secret
            .clone()
            .ok_or_else(|| PipelineError::ValidationFailed("GRAPH_CLIENT_SECRET is required for the graph adapter".to_string()))?;
        let mailbox = settings
            .graph_mailbox
            .clone()
            .ok_or_else(|| PipelineError::ValidationFailed("GRAPH_MAILBOX is required for the graph adapter".to_string()))?;
        let folder_id = settings
            .graph_folder_id
            .clone()
            .unwrap_or_else(|| "inbox".to_string());

        Ok(Self {
            http: reqwest::Client::new(),
            tenant_id,
            client_id,
            client_secret,
            mailbox,
            folder_label: folder_id.clone(),
            folder_id,
            poll_interval: Duration::from_secs(settings.graph_poll_interval_seconds),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, PipelineError> {
        if let Some(cached) = self.token.lock().as_ref() {
            if cached.expires_at > std::time::Instant::now() {
                return Ok(cached.value.clone());
            }
        }

        let url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant_id
        );
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", "https://graph.microsoft.com/.default"),
            ("grant_type", "client_credentials"),
        ];

        let response = self.http.post(&url).form(&params).send().await?;
        let token: TokenResponse = response.error_for_status()?.json().await?;

        let expires_at = std::time::Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(60));
        *self.token.lock() = Some(CachedToken { value: token.access_token.clone(), expires_at });
        Ok(token.access_token)
    }

    async fn fetch_page(&self, url: &str, token: &str) -> Result<serde_json::Value, PipelineError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[rocket::async_trait]
impl EmailAdapter for GraphAdapter {
    async fn poll(&self, store: &Store) -> Result<Vec<FetchedMessage>, PipelineError> {
        let cursor = store.get_folder_cursor(&self.folder_label).await?;
        let since = cursor
            .and_then(|c| c.last_poll_at)
            .unwrap_or_else(|| chrono::Utc::now() - chrono::Duration::days(7));

        let token = self.access_token().await?;
        let filter = format!("receivedDateTime ge {}", since.to_rfc3339());
        let mut url = format!(
            "{}/users/{}/mailFolders/{}/messages?$filter={}&$top={}",
            GRAPH_BASE,
            self.mailbox,
            self.folder_id,
            urlencoding_lite(&filter),
            PAGE_SIZE
        );

        let mut messages = Vec::new();
        loop {
            let page = self.fetch_page(&url, &token).await?;
            let Some(items) = page.get("value").and_then(|v| v.as_array()) else {
                break;
            };
            for (index, item) in items.iter().enumerate() {
                let external_uid = graph_item_uid(item, messages.len() as i64 + index as i64);
                let mime_bytes = synthesize_mime(item);
                messages.push(FetchedMessage {
                    folder: self.folder_label.clone(),
                    external_uid,
                    mime_bytes,
                });
            }

            match page.get("@odata.nextLink").and_then(|v| v.as_str()) {
                Some(next) => url = next.to_string(),
                None => break,
            }
        }

        Ok(messages)
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

fn graph_item_uid(item: &serde_json::Value, fallback: i64) -> i64 {
    item.get("id")
        .and_then(|v| v.as_str())
        .map(|id| {
            let digest = sha2::Sha256::digest(id.as_bytes());
            i64::from_be_bytes(digest[0..8].try_into().unwrap_or_default()).unsigned_abs() as i64
        })
        .unwrap_or(fallback)
}

/// Graph's JSON message shape doesn't carry raw RFC822; build a minimal MIME
/// document from the fields the intake parser actually needs.
fn synthesize_mime(item: &serde_json::Value) -> Vec<u8> {
    let subject = item.get("subject").and_then(|v| v.as_str()).unwrap_or("");
    let from = item
        .get("from")
        .and_then(|v| v.get("emailAddress"))
        .and_then(|v| v.get("address"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let received = item.get("receivedDateTime").and_then(|v| v.as_str()).unwrap_or("");
    let body = item
        .get("body")
        .and_then(|v| v.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    format!(
        "From: {}\r\nSubject: {}\r\nDate: {}\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{}",
        from, subject, received, body
    )
    .into_bytes()
}

fn urlencoding_lite(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ' ' => "%20".to_string(),
            c => c.to_string(),
        })
        .collect()
}
