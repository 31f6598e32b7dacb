//! Observer installation and teardown.
//!
//! `start` wraps every included transport in the registry with an observing
//! layer and returns a handle whose teardown restores the originals. Only one
//! observer may be active per process; the guard is released on teardown (or
//! drop), never by a second start.

use super::filter::ContentTypeFilter;
use super::{
    CaptureBody, NetworkEvent, SurfaceRegistry, Transport, TransportKind, TransportRequest,
    TransportResponse,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Default body cap, in characters.
pub const DEFAULT_MAX_BODY_CHARS: usize = 100_000;

static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Callback receiving each observed response.
pub type EventCallback = Arc<dyn Fn(NetworkEvent) + Send + Sync>;

/// Observer configuration.
pub struct InterceptConfig {
    /// Content types worth capturing. Defaults to everything.
    pub content_types: Vec<super::ContentTypeToken>,
    /// Extra regex patterns extending `content_types`. Ignored when the
    /// `Any` token is present.
    pub extra_content_types: Vec<String>,
    /// Maximum captured body length in characters; bodies are cut on the
    /// right, never splitting a character.
    pub max_body_chars: usize,
    /// Which surfaces to observe. `None` observes every installed surface.
    pub include: Option<Vec<TransportKind>>,
    /// Skip bodies of opaque cross-origin responses. Their body is
    /// unreadable anyway; the event itself is still emitted.
    pub skip_opaque: bool,
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            content_types: vec![super::ContentTypeToken::Any],
            extra_content_types: Vec::new(),
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
            include: None,
            skip_opaque: true,
        }
    }
}

/// Live observer. Teardown restores every patched surface; dropping the
/// handle without calling [`teardown`](Self::teardown) does the same.
pub struct InterceptorHandle {
    registry: Arc<SurfaceRegistry>,
    patched: Mutex<Vec<TransportKind>>,
    released: AtomicBool,
}

impl InterceptorHandle {
    /// Restore all patched surfaces and release the process guard.
    /// Idempotent — the second and later calls do nothing.
    pub fn teardown(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let patched = std::mem::take(&mut *self.patched.lock().unwrap());
        for kind in patched {
            self.registry.restore(kind);
            tracing::debug!(%kind, "observer removed");
        }
        ACTIVE.store(false, Ordering::SeqCst);
    }
}

impl Drop for InterceptorHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Install the observer on every included surface.
///
/// Fails when another observer is already active or when nothing ends up
/// patched (no matching surfaces installed).
pub fn start(
    registry: Arc<SurfaceRegistry>,
    config: InterceptConfig,
    on_event: EventCallback,
) -> Result<InterceptorHandle> {
    if ACTIVE.swap(true, Ordering::SeqCst) {
        bail!("network observer is already active in this process");
    }

    let filter = Arc::new(ContentTypeFilter::new(
        &config.content_types,
        &config.extra_content_types,
    ));

    let kinds = match &config.include {
        Some(kinds) => kinds.clone(),
        None => registry.kinds(),
    };

    let mut patched = Vec::new();
    for kind in kinds {
        let filter = Arc::clone(&filter);
        let on_event = Arc::clone(&on_event);
        let applied = registry.patch(kind, |inner| {
            Arc::new(ObservedTransport {
                inner,
                kind,
                filter,
                max_body_chars: config.max_body_chars,
                skip_opaque: config.skip_opaque,
                on_event,
            })
        });
        if applied {
            tracing::debug!(%kind, "observer installed");
            patched.push(kind);
        }
    }

    if patched.is_empty() {
        ACTIVE.store(false, Ordering::SeqCst);
        bail!("no surfaces available to observe");
    }

    Ok(InterceptorHandle {
        registry,
        patched: Mutex::new(patched),
        released: AtomicBool::new(false),
    })
}

// ── Observing wrapper ───────────────────────────────────────────────────────

struct ObservedTransport {
    inner: Arc<dyn Transport>,
    kind: TransportKind,
    filter: Arc<ContentTypeFilter>,
    max_body_chars: usize,
    skip_opaque: bool,
    on_event: EventCallback,
}

#[async_trait]
impl Transport for ObservedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let method = request.method.clone();
        let requested_url = request.url.clone();
        let started = Instant::now();

        let mut response = self.inner.send(request).await?;

        let time_ms = (started.elapsed().as_secs_f64() * 10_000.0).round() / 10.0;
        let capture = response.capture.take();

        let body = if self.skip_opaque && response.opaque {
            None
        } else if self.filter.matches(response.content_type.as_deref()) {
            read_capture(capture, self.max_body_chars).await
        } else {
            None
        };

        let event = NetworkEvent {
            kind: self.kind,
            method,
            url: response.url.clone().or(Some(requested_url)),
            status: response.status,
            time_ms: Some(time_ms),
            body,
            content_type: response.content_type.clone(),
        };

        if catch_unwind(AssertUnwindSafe(|| (self.on_event)(event))).is_err() {
            tracing::warn!("network event callback panicked");
        }

        Ok(response)
    }
}

/// Read a capture up to the character cap.
///
/// Stream reading stops as soon as the byte count reaches the cap (a
/// character is at least one byte), then the decoded text is cut to the cap
/// without splitting a character. Read errors yield `None`, never an error to
/// the caller.
async fn read_capture(capture: Option<CaptureBody>, max_chars: usize) -> Option<String> {
    match capture {
        None => None,
        Some(CaptureBody::Text(text)) => Some(truncate_chars(text, max_chars)),
        Some(CaptureBody::Stream(mut stream)) => {
            let mut buf: Vec<u8> = Vec::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => buf.extend_from_slice(&bytes),
                    Err(err) => {
                        tracing::debug!("body capture aborted: {err}");
                        return None;
                    }
                }
                if buf.len() >= max_chars {
                    break;
                }
            }
            drop(stream);
            Some(truncate_chars(
                String::from_utf8_lossy(&buf).into_owned(),
                max_chars,
            ))
        }
    }
}

fn truncate_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::super::ContentTypeToken;
    use super::*;
    use futures::stream;
    use std::sync::OnceLock;

    // the process guard is global, so observer tests must not overlap
    fn serial() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    struct CannedTransport {
        kind: TransportKind,
        content_type: Option<&'static str>,
        body: &'static str,
        opaque: bool,
        streamed: bool,
    }

    #[async_trait]
    impl Transport for CannedTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
            let capture = if self.streamed {
                let chunks: Vec<std::io::Result<Vec<u8>>> = self
                    .body
                    .as_bytes()
                    .chunks(4)
                    .map(|c| Ok(c.to_vec()))
                    .collect();
                Some(CaptureBody::Stream(Box::pin(stream::iter(chunks))))
            } else {
                Some(CaptureBody::Text(self.body.to_string()))
            };
            Ok(TransportResponse {
                url: Some(request.url),
                status: Some(200),
                content_type: self.content_type.map(str::to_string),
                opaque: self.opaque,
                capture,
            })
        }
    }

    fn collecting_callback() -> (EventCallback, Arc<Mutex<Vec<NetworkEvent>>>) {
        let seen: Arc<Mutex<Vec<NetworkEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: EventCallback = Arc::new(move |e| sink.lock().unwrap().push(e));
        (cb, seen)
    }

    #[tokio::test]
    async fn test_observed_send_emits_event_with_body() {
        let _s = serial();
        let registry = Arc::new(SurfaceRegistry::new());
        registry.install(Arc::new(CannedTransport {
            kind: TransportKind::Fetch,
            content_type: Some("application/json; charset=utf-8"),
            body: r#"{"items":[]}"#,
            opaque: false,
            streamed: true,
        }));

        let (cb, seen) = collecting_callback();
        let config = InterceptConfig {
            content_types: vec![ContentTypeToken::Json],
            ..Default::default()
        };
        let handle = start(Arc::clone(&registry), config, cb).unwrap();

        let transport = registry.get(TransportKind::Fetch).unwrap();
        let response = transport
            .send(TransportRequest::get("https://example.test/checks"))
            .await
            .unwrap();
        // the capture belongs to the observer, not the caller
        assert!(response.capture.is_none());
        assert_eq!(response.status, Some(200));

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TransportKind::Fetch);
        assert_eq!(events[0].method, "GET");
        assert_eq!(events[0].body.as_deref(), Some(r#"{"items":[]}"#));
        assert!(events[0].time_ms.is_some());
        drop(events);

        handle.teardown();
    }

    #[tokio::test]
    async fn test_filtered_content_type_yields_event_without_body() {
        let _s = serial();
        let registry = Arc::new(SurfaceRegistry::new());
        registry.install(Arc::new(CannedTransport {
            kind: TransportKind::Fetch,
            content_type: Some("application/octet-stream"),
            body: "binary-ish",
            opaque: false,
            streamed: false,
        }));

        let (cb, seen) = collecting_callback();
        let config = InterceptConfig {
            content_types: vec![ContentTypeToken::Json],
            ..Default::default()
        };
        let handle = start(Arc::clone(&registry), config, cb).unwrap();

        registry
            .get(TransportKind::Fetch)
            .unwrap()
            .send(TransportRequest::get("https://example.test/blob"))
            .await
            .unwrap();

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].body.is_none());
        assert_eq!(
            events[0].content_type.as_deref(),
            Some("application/octet-stream")
        );
        drop(events);

        handle.teardown();
    }

    #[tokio::test]
    async fn test_opaque_response_body_skipped() {
        let _s = serial();
        let registry = Arc::new(SurfaceRegistry::new());
        registry.install(Arc::new(CannedTransport {
            kind: TransportKind::Fetch,
            content_type: Some("application/json"),
            body: "{}",
            opaque: true,
            streamed: false,
        }));

        let (cb, seen) = collecting_callback();
        let handle = start(Arc::clone(&registry), InterceptConfig::default(), cb).unwrap();

        registry
            .get(TransportKind::Fetch)
            .unwrap()
            .send(TransportRequest::get("https://other-origin.test/x"))
            .await
            .unwrap();

        assert!(seen.lock().unwrap()[0].body.is_none());
        handle.teardown();
    }

    #[tokio::test]
    async fn test_body_truncated_at_cap() {
        let _s = serial();
        let registry = Arc::new(SurfaceRegistry::new());
        registry.install(Arc::new(CannedTransport {
            kind: TransportKind::Xhr,
            content_type: Some("text/plain"),
            body: "abcdefghijklmnopqrstuvwxyz",
            opaque: false,
            streamed: true,
        }));

        let (cb, seen) = collecting_callback();
        let config = InterceptConfig {
            max_body_chars: 10,
            ..Default::default()
        };
        let handle = start(Arc::clone(&registry), config, cb).unwrap();

        registry
            .get(TransportKind::Xhr)
            .unwrap()
            .send(TransportRequest::get("https://example.test/long"))
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap()[0].body.as_deref(), Some("abcdefghij"));
        handle.teardown();
    }

    #[tokio::test]
    async fn test_second_start_refused_until_teardown() {
        let _s = serial();
        let registry = Arc::new(SurfaceRegistry::new());
        registry.install(Arc::new(CannedTransport {
            kind: TransportKind::Fetch,
            content_type: None,
            body: "",
            opaque: false,
            streamed: false,
        }));

        let (cb, _) = collecting_callback();
        let handle =
            start(Arc::clone(&registry), InterceptConfig::default(), Arc::clone(&cb)).unwrap();
        assert!(start(Arc::clone(&registry), InterceptConfig::default(), Arc::clone(&cb)).is_err());

        handle.teardown();
        handle.teardown(); // idempotent

        let again = start(Arc::clone(&registry), InterceptConfig::default(), cb).unwrap();
        again.teardown();
    }

    #[tokio::test]
    async fn test_drop_releases_guard_and_restores_surface() {
        let _s = serial();
        let registry = Arc::new(SurfaceRegistry::new());
        let base: Arc<dyn Transport> = Arc::new(CannedTransport {
            kind: TransportKind::Fetch,
            content_type: None,
            body: "",
            opaque: false,
            streamed: false,
        });
        registry.install(Arc::clone(&base));

        let (cb, _) = collecting_callback();
        {
            let _handle =
                start(Arc::clone(&registry), InterceptConfig::default(), cb).unwrap();
            assert!(!Arc::ptr_eq(
                &registry.get(TransportKind::Fetch).unwrap(),
                &base
            ));
        }
        assert!(Arc::ptr_eq(
            &registry.get(TransportKind::Fetch).unwrap(),
            &base
        ));
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_break_the_caller() {
        let _s = serial();
        let registry = Arc::new(SurfaceRegistry::new());
        registry.install(Arc::new(CannedTransport {
            kind: TransportKind::Fetch,
            content_type: Some("text/plain"),
            body: "ok",
            opaque: false,
            streamed: false,
        }));

        let cb: EventCallback = Arc::new(|_| panic!("listener bug"));
        let handle = start(Arc::clone(&registry), InterceptConfig::default(), cb).unwrap();

        let response = registry
            .get(TransportKind::Fetch)
            .unwrap()
            .send(TransportRequest::get("https://example.test/ok"))
            .await;
        assert!(response.is_ok());

        handle.teardown();
    }
}
