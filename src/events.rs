// Copyright 2026 Chequeflow Contributors
// SPDX-License-Identifier: Apache-2.0

//! Network event bus — observed responses fanned out to every listener.
//!
//! The bus is a `tokio::sync::broadcast` channel carrying [`NetworkEvent`]
//! values. Each extractor listener subscribes independently. When no
//! subscribers exist, events are silently dropped (zero overhead).

use crate::intercept::NetworkEvent;
use tokio::sync::broadcast;
use url::Url;

/// Fan-out channel for observed network responses.
pub struct NetBus {
    sender: broadcast::Sender<NetworkEvent>,
}

impl NetBus {
    /// Create a new bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: NetworkEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.sender.subscribe()
    }
}

/// Whether an event's URL belongs to the given host.
///
/// Events without a URL, or with one that does not parse as an absolute URL,
/// never match.
pub fn event_matches_host(event: &NetworkEvent, host: &str) -> bool {
    let Some(url) = &event.url else {
        return false;
    };
    match Url::parse(url) {
        Ok(parsed) => parsed.host_str() == Some(host),
        Err(_) => false,
    }
}
