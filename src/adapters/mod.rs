pub mod desktop;
pub mod file;
pub mod graph;
pub mod imap;

use crate::config::{EmailProvider, Settings};
use crate::error::PipelineError;
use crate::store::Store;

/// One message handed back by an adapter, in the shape the common intake
/// pipeline needs regardless of which mailbox backend produced it.
pub struct FetchedMessage {
    pub folder: String,
    pub external_uid: i64,
    pub mime_bytes: Vec<u8>,
}

/// The one interface every inbound adapter implements: produce newly
/// available messages and own the folder cursor for the folders it watches.
#[rocket::async_trait]
pub trait EmailAdapter: Send + Sync {
    async fn poll(&self, store: &Store) -> Result<Vec<FetchedMessage>, PipelineError>;

    /// How long to sleep between polls; adapters that push (filesystem watch)
    /// can return a short value since `poll` itself blocks on new events.
    fn poll_interval(&self) -> std::time::Duration;
}

pub fn build_adapter(settings: &Settings) -> Result<Box<dyn EmailAdapter>, PipelineError> {
    match settings.email_provider {
        EmailProvider::Imap => Ok(Box::new(imap::ImapAdapter::from_settings(settings)?)),
        EmailProvider::Graph => Ok(Box::new(graph::GraphAdapter::from_settings(settings)?)),
        EmailProvider::File => Ok(Box::new(file::FileAdapter::from_settings(settings)?)),
        EmailProvider::Outlook => Ok(Box::new(desktop::DesktopAdapter::from_settings(settings))),
    }
}

/// Runs `adapter` in a loop until `cancel` fires: poll, hand results to
/// `on_message`, sleep, repeat. Adapter-level errors are logged and recorded
/// against the folder cursor rather than stopping the loop.
pub async fn run_adapter_loop<F, Fut>(
    adapter: Box<dyn EmailAdapter>,
    store: Store,
    cancel: tokio_util::sync::CancellationToken,
    on_message: F,
) where
    F: Fn(Store, FetchedMessage) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match adapter.poll(&store).await {
            Ok(messages) => {
                for message in messages {
                    on_message(store.clone(), message).await;
                }
            }
            Err(err) => {
                log::error!("adapter poll failed: {}", err);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(adapter.poll_interval()) => {}
        }
    }
}
