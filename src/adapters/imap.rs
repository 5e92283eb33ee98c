use std::time::Duration;

use chrono::Utc;

use super::{EmailAdapter, FetchedMessage};
use crate::config::Settings;
use crate::error::PipelineError;
use crate::store::Store;

#[derive(Clone)]
struct ImapConfig {
    host: String,
    port: u16,
    ssl: bool,
    user: String,
    password: String,
    folders: Vec<String>,
    initial_backfill_days: i64,
    poll_interval: Duration,
}

/// Polls an IMAP/IMAPS mailbox. Initial backfill per folder uses a `SINCE`
/// search going back `initial_backfill_days`; subsequent polls fetch
/// `UID <cursor+1>:*` so already-seen messages are never refetched.
pub struct ImapAdapter {
    config: ImapConfig,
}

impl ImapAdapter {
    pub fn from_settings(settings: &Settings) -> Result<Self, PipelineError> {
        let host = settings
            .imap_host
            .clone()
            .ok_or_else(|| PipelineError::ValidationFailed("IMAP_HOST is required for the imap adapter".to_string()))?;
        let user = settings
            .imap_user
            .clone()
            .ok_or_else(|| PipelineError::ValidationFailed("IMAP_USER is required for the imap adapter".to_string()))?;
        let password = settings
            .imap_password
            .clone()
            .ok_or_else(|| PipelineError::ValidationFailed("IMAP_PASSWORD is required for the imap adapter".to_string()))?;

        Ok(Self {
            config: ImapConfig {
                host,
                port: settings.imap_port,
                ssl: settings.imap_ssl,
                user,
                password,
                folders: settings.imap_folders.clone(),
                initial_backfill_days: settings.imap_initial_backfill_days,
                poll_interval: Duration::from_secs(settings.imap_poll_interval_seconds),
            },
        })
    }
}

#[rocket::async_trait]
impl EmailAdapter for ImapAdapter {
    async fn poll(&self, store: &Store) -> Result<Vec<FetchedMessage>, PipelineError> {
        let mut all_messages = Vec::new();

        for folder in &self.config.folders {
            let cursor = store.get_folder_cursor(folder).await?;
            let since_uid = cursor.as_ref().map(|c| c.last_uid);
            let backfill_since = Utc::now() - chrono::Duration::days(self.config.initial_backfill_days);

            let config = self.config.clone();
            let folder_name = folder.clone();
            let result = tokio::task::spawn_blocking(move || {
                fetch_folder_blocking(&config, &folder_name, since_uid, backfill_since)
            })
            .await
            .map_err(|e| PipelineError::ValidationFailed(format!("imap fetch task panicked: {}", e)))?;

            match result {
                Ok(messages) => all_messages.extend(messages),
                Err(err) => {
                    store.record_folder_error(folder, &err.to_string()).await?;
                    log::warn!("imap poll failed for folder {}: {}", folder, err);
                }
            }
        }

        Ok(all_messages)
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }
}

/// Blocking IMAP session: connect, login, select the folder, search, and
/// fetch RFC822 for every matching UID. Runs on a blocking-pool thread since
/// the `imap` crate's API is synchronous.
fn fetch_folder_blocking(
    config: &ImapConfig,
    folder: &str,
    since_uid: Option<i64>,
    backfill_since: chrono::DateTime<Utc>,
) -> Result<Vec<FetchedMessage>, PipelineError> {
    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| PipelineError::ValidationFailed(format!("tls connector: {}", e)))?;

    let client = if config.ssl {
        imap::connect((config.host.as_str(), config.port), &config.host, &tls)
            .map_err(|e| PipelineError::ValidationFailed(format!("imap connect: {}", e)))?
    } else {
        return Err(PipelineError::ValidationFailed(
            "plaintext IMAP is not supported; set IMAP_SSL=true".to_string(),
        ));
    };

    let mut session = client
        .login(&config.user, &config.password)
        .map_err(|(e, _)| PipelineError::ValidationFailed(format!("imap login: {}", e)))?;

    session
        .select(folder)
        .map_err(|e| PipelineError::ValidationFailed(format!("imap select {}: {}", folder, e)))?;

    let uid_set = match since_uid {
        Some(last_uid) => format!("{}:*", last_uid + 1),
        None => {
            let since = backfill_since.format("%d-%b-%Y").to_string();
            let uids = session
                .uid_search(format!("SINCE {}", since))
                .map_err(|e| PipelineError::ValidationFailed(format!("imap search: {}", e)))?;
            if uids.is_empty() {
                return Ok(Vec::new());
            }
            uids.into_iter().map(|u| u.to_string()).collect::<Vec<_>>().join(",")
        }
    };

    let fetched = session
        .uid_fetch(&uid_set, "RFC822")
        .map_err(|e| PipelineError::ValidationFailed(format!("imap fetch: {}", e)))?;

    let mut messages = Vec::new();
    for msg in fetched.iter() {
        let Some(uid) = msg.uid else { continue };
        let Some(body) = msg.body() else { continue };
        messages.push(FetchedMessage {
            folder: folder.to_string(),
            external_uid: uid as i64,
            mime_bytes: body.to_vec(),
        });
    }

    let _ = session.logout();
    Ok(messages)
}
