use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;

use super::{EmailAdapter, FetchedMessage};
use crate::config::Settings;
use crate::error::PipelineError;
use crate::store::Store;

const FOLDER_LABEL: &str = "file_watch";

/// Watches a directory for dropped `.eml`/`.msg` files. Successfully read
/// files move to a `processed/` sibling, unreadable ones to `failed/`; the
/// filename stands in for the UID since there's no IMAP-style sequence here.
pub struct FileAdapter {
    watch_path: PathBuf,
    poll_interval: Duration,
    _watcher: Mutex<notify::RecommendedWatcher>,
    events: Mutex<Receiver<notify::Result<Event>>>,
}

impl FileAdapter {
    pub fn from_settings(settings: &Settings) -> Result<Self, PipelineError> {
        let watch_path = settings
            .file_watch_path
            .clone()
            .ok_or_else(|| PipelineError::ValidationFailed("FILE_WATCH_PATH is required for the file adapter".to_string()))?;
        let watch_path = PathBuf::from(watch_path);

        std::fs::create_dir_all(watch_path.join("processed"))
            .map_err(|e| PipelineError::ValidationFailed(format!("creating processed dir: {}", e)))?;
        std::fs::create_dir_all(watch_path.join("failed"))
            .map_err(|e| PipelineError::ValidationFailed(format!("creating failed dir: {}", e)))?;

        let (tx, rx): (Sender<notify::Result<Event>>, Receiver<notify::Result<Event>>) =
            std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })
        .map_err(|e| PipelineError::ValidationFailed(format!("creating file watcher: {}", e)))?;
        watcher
            .watch(&watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| PipelineError::ValidationFailed(format!("watching {}: {}", watch_path.display(), e)))?;

        Ok(Self {
            watch_path,
            poll_interval: Duration::from_secs(settings.file_poll_interval_seconds),
            _watcher: Mutex::new(watcher),
            events: Mutex::new(rx),
        })
    }

    fn drain_new_files(&self) -> Vec<PathBuf> {
        let rx = self.events.lock();
        let mut paths = Vec::new();
        while let Ok(Ok(event)) = rx.try_recv() {
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                continue;
            }
            for path in event.paths {
                if is_mail_file(&path) && path.exists() {
                    paths.push(path);
                }
            }
        }
        paths
    }
}

#[rocket::async_trait]
impl EmailAdapter for FileAdapter {
    async fn poll(&self, _store: &Store) -> Result<Vec<FetchedMessage>, PipelineError> {
        let paths = self.drain_new_files();
        let mut messages = Vec::new();

        for path in paths {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };

            match std::fs::read(&path) {
                Ok(bytes) => {
                    move_to(&path, &self.watch_path.join("processed"));
                    messages.push(FetchedMessage {
                        folder: FOLDER_LABEL.to_string(),
                        external_uid: hash_name(&file_name),
                        mime_bytes: bytes,
                    });
                }
                Err(err) => {
                    log::warn!("failed to read dropped mail file {}: {}", path.display(), err);
                    move_to(&path, &self.watch_path.join("failed"));
                }
            }
        }

        Ok(messages)
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

fn is_mail_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
        Some("eml") | Some("msg")
    )
}

fn move_to(path: &Path, dest_dir: &Path) {
    let Some(name) = path.file_name() else { return };
    if let Err(err) = std::fs::rename(path, dest_dir.join(name)) {
        log::warn!("failed to move {} into {}: {}", path.display(), dest_dir.display(), err);
    }
}

fn hash_name(name: &str) -> i64 {
    use sha2::Digest;
    let digest = sha2::Sha256::digest(name.as_bytes());
    i64::from_be_bytes(digest[0..8].try_into().unwrap_or_default()).unsigned_abs() as i64
}
