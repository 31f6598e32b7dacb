//! CLI handler for the watch loop: poll a URL, observe the responses, and
//! persist whatever the extractors recognize.

use crate::cli::output;
use crate::events::NetBus;
use crate::intercept::http::HttpTransport;
use crate::intercept::{self, ContentTypeToken, InterceptConfig, SurfaceRegistry, TransportKind, TransportRequest};
use crate::relay::{spawn_feed_listener, spawn_table_listener, Persister};
use crate::store::ChequeRepo;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub async fn run(
    repo: Arc<ChequeRepo>,
    url: &str,
    interval_secs: u64,
    content_types: Vec<ContentTypeToken>,
    max_body_chars: usize,
) -> Result<()> {
    let registry = Arc::new(SurfaceRegistry::new());
    registry.install(Arc::new(HttpTransport::new()?));

    let bus = Arc::new(NetBus::new(64));
    let bus_for_observer = Arc::clone(&bus);
    let config = InterceptConfig {
        content_types,
        max_body_chars,
        ..Default::default()
    };
    let handle = intercept::start(
        Arc::clone(&registry),
        config,
        Arc::new(move |event| bus_for_observer.emit(event)),
    )?;

    let (tx, rx) = mpsc::channel(64);
    let table_listener = spawn_table_listener(&bus, tx.clone());
    let feed_listener = spawn_feed_listener(&bus, tx);
    let persister = tokio::spawn(Persister::new(Arc::clone(&repo)).run(rx));

    if !output::is_quiet() && !output::is_json() {
        println!("  Watching {url} every {interval_secs}s (scope: {})", repo.scope());
        println!("  Press Ctrl+C to stop.");
    }

    let transport = registry
        .get(TransportKind::Fetch)
        .context("no HTTP surface installed")?;
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match transport.send(TransportRequest::get(url)).await {
                    Ok(response) => {
                        tracing::debug!(status = ?response.status, "poll completed");
                    }
                    Err(err) => {
                        tracing::warn!("poll failed: {err:#}");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    handle.teardown();
    table_listener.abort();
    feed_listener.abort();
    persister.abort();

    if !output::is_quiet() && !output::is_json() {
        println!("  Stopped.");
    }
    Ok(())
}
