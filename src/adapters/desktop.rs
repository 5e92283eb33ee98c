use std::time::Duration;

use super::{EmailAdapter, FetchedMessage};
use crate::config::Settings;
use crate::error::PipelineError;
use crate::store::Store;

/// Placeholder for a desktop mail-client integration (e.g. a local Outlook
/// profile read through its native automation surface). That SDK is an
/// external collaborator outside this crate's dependency surface; this
/// adapter exists so `email_provider` dispatch stays exhaustive and a future
/// integration has a slot to land in.
pub struct DesktopAdapter {
    folders: Vec<String>,
}

impl DesktopAdapter {
    pub fn from_settings(settings: &Settings) -> Self {
        Self { folders: settings.outlook_folders.clone() }
    }
}

#[rocket::async_trait]
impl EmailAdapter for DesktopAdapter {
    async fn poll(&self, _store: &Store) -> Result<Vec<FetchedMessage>, PipelineError> {
        log::warn!(
            "desktop-client adapter has no backing implementation; configured folders {:?} will not be polled",
            self.folders
        );
        Ok(Vec::new())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(300)
    }
}
