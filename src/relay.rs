//! Relay — the channel between extractor listeners and the persister.
//!
//! Listeners subscribe to the network bus, run their extractor over each
//! captured body, and forward anything they recognize as a typed
//! [`ChannelMessage`]. The persister owns the repository end: it resolves the
//! scope's collection and appends the rows.

use crate::cheque::{Cheque, SOURCE_COSTVISER, SOURCE_PLATFORMA_OFD};
use crate::events::NetBus;
use crate::extract::{feed, table};
use crate::store::{ChequeRepo, RepoResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Default display-name base for the scope's collection.
pub const DEFAULT_NAME_BASE: &str = "Receipts";

/// Messages flowing from listeners to the persister. The wire form is tagged,
/// so other producers (scripts, replays) can inject messages too.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChannelMessage {
    SaveCheques { rows: Vec<Cheque>, meta: SaveMeta },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveMeta {
    pub source: String,
}

/// Repository-facing end of the relay.
pub struct Persister {
    repo: Arc<ChequeRepo>,
    name_base: String,
}

impl Persister {
    pub fn new(repo: Arc<ChequeRepo>) -> Self {
        Self {
            repo,
            name_base: DEFAULT_NAME_BASE.to_string(),
        }
    }

    pub fn with_name_base(mut self, base: impl Into<String>) -> Self {
        self.name_base = base.into();
        self
    }

    /// Persist one message into the scope's collection.
    pub fn handle(&self, message: &ChannelMessage) -> RepoResult<usize> {
        match message {
            ChannelMessage::SaveCheques { rows, meta } => {
                let collection = self.repo.ensure_scoped(&self.name_base)?;
                let written = self.repo.add_rows(&collection.id, rows, &meta.source)?;
                tracing::info!(
                    collection = %collection.name,
                    source = %meta.source,
                    written,
                    "cheques persisted"
                );
                Ok(written)
            }
        }
    }

    /// Drain a message channel until all senders hang up.
    pub async fn run(self, mut rx: mpsc::Receiver<ChannelMessage>) {
        while let Some(message) = rx.recv().await {
            if let Err(err) = self.handle(&message) {
                tracing::error!("failed to persist cheques: {err}");
            }
        }
    }
}

/// Listener for the HTML search table: parses every captured body and
/// forwards any cheque rows it finds.
pub fn spawn_table_listener(bus: &NetBus, tx: mpsc::Sender<ChannelMessage>) -> JoinHandle<()> {
    spawn_listener(bus.subscribe(), tx, |body| {
        let rows = table::parse_cheques(body);
        if rows.is_empty() {
            None
        } else {
            Some((rows, SOURCE_PLATFORMA_OFD))
        }
    })
}

/// Listener for the JSON checks feed: validates the body against the feed
/// schema and maps recognized payloads with the default mapper.
pub fn spawn_feed_listener(bus: &NetBus, tx: mpsc::Sender<ChannelMessage>) -> JoinHandle<()> {
    spawn_listener(bus.subscribe(), tx, |body| {
        let feed = feed::parse_feed_str(body).recognized()?;
        let rows = feed::map_feed(&feed);
        if rows.is_empty() {
            None
        } else {
            Some((rows, SOURCE_COSTVISER))
        }
    })
}

fn spawn_listener<F>(
    mut rx: broadcast::Receiver<crate::intercept::NetworkEvent>,
    tx: mpsc::Sender<ChannelMessage>,
    extract: F,
) -> JoinHandle<()>
where
    F: Fn(&str) -> Option<(Vec<Cheque>, &'static str)> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "listener lagged behind the network bus");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let Some(body) = event.body.as_deref() else {
                continue;
            };
            let Some((rows, source)) = extract(body) else {
                continue;
            };

            let message = ChannelMessage::SaveCheques {
                rows,
                meta: SaveMeta {
                    source: source.to_string(),
                },
            };
            if tx.send(message).await.is_err() {
                break;
            }
        }
    })
}
