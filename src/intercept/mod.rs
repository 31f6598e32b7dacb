//! Response interception — observe traffic flowing through pluggable
//! transport surfaces without altering what callers receive.
//!
//! A [`Transport`] is a named request surface (XHR-style, fetch-style, or a
//! wrapper library). The [`SurfaceRegistry`] holds the currently installed
//! transport per kind and supports reversible patching: the observer wraps
//! whatever is installed, and teardown restores the original. Captured
//! responses are filtered by content type, body-capped, and emitted as
//! [`NetworkEvent`]s.

pub mod filter;
pub mod http;
mod interceptor;

pub use filter::{ContentTypeFilter, ContentTypeToken};
pub use interceptor::{start, InterceptConfig, InterceptorHandle};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

// ── Transport surface ───────────────────────────────────────────────────────

/// Which request surface produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Xhr,
    Fetch,
    Jquery,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportKind::Xhr => "xhr",
            TransportKind::Fetch => "fetch",
            TransportKind::Jquery => "jquery",
        };
        f.write_str(s)
    }
}

/// An outbound request handed to a transport.
#[derive(Debug, Clone, Default)]
pub struct TransportRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            ..Default::default()
        }
    }
}

/// The observer's independent view of a response body.
///
/// The capture is a side channel: consuming or dropping it never affects what
/// the original caller sees. Dropping a `Stream` variant mid-read aborts the
/// observer's copy only.
pub enum CaptureBody {
    /// Body already fully buffered by the transport.
    Text(String),
    /// Body delivered incrementally as raw byte chunks.
    Stream(BoxStream<'static, std::io::Result<Vec<u8>>>),
}

impl fmt::Debug for CaptureBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureBody::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            CaptureBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A completed response as seen by a transport.
#[derive(Debug)]
pub struct TransportResponse {
    /// Final URL after redirects, when the transport knows it.
    pub url: Option<String>,
    /// HTTP status; absent for responses the transport cannot inspect.
    pub status: Option<u16>,
    /// Raw `Content-Type` header value.
    pub content_type: Option<String>,
    /// Cross-origin response whose body is not readable by the observer.
    pub opaque: bool,
    /// Observer-side body capture, if the transport can provide one.
    pub capture: Option<CaptureBody>,
}

/// A named request surface that can be observed.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

// ── Network event ───────────────────────────────────────────────────────────

/// One observed response, after filtering and body capping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEvent {
    pub kind: TransportKind,
    pub method: String,
    pub url: Option<String>,
    pub status: Option<u16>,
    /// Elapsed send-to-completion time in milliseconds, tenth-of-ms
    /// resolution. Absent when the surface cannot measure it.
    pub time_ms: Option<f64>,
    /// Captured body, possibly truncated. `None` when the content type did
    /// not pass the filter, the body was unreadable, or reading failed.
    pub body: Option<String>,
    pub content_type: Option<String>,
}

// ── Surface registry ────────────────────────────────────────────────────────

struct Surface {
    current: Arc<dyn Transport>,
    /// Present while a patch is applied; holds the pre-patch transport.
    original: Option<Arc<dyn Transport>>,
}

/// Registry of installed transports, one slot per kind.
///
/// Patching is guarded: a second patch on an already-patched kind is refused,
/// so repeated observer starts cannot stack wrappers. Restore puts back the
/// exact transport that was installed before the patch.
#[derive(Default)]
pub struct SurfaceRegistry {
    surfaces: Mutex<HashMap<TransportKind, Surface>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the base transport for its kind.
    pub fn install(&self, transport: Arc<dyn Transport>) {
        let kind = transport.kind();
        let mut surfaces = self.surfaces.lock().unwrap();
        surfaces.insert(
            kind,
            Surface {
                current: transport,
                original: None,
            },
        );
    }

    /// Currently effective transport for a kind.
    pub fn get(&self, kind: TransportKind) -> Option<Arc<dyn Transport>> {
        let surfaces = self.surfaces.lock().unwrap();
        surfaces.get(&kind).map(|s| Arc::clone(&s.current))
    }

    /// Kinds that currently have a transport installed.
    pub fn kinds(&self) -> Vec<TransportKind> {
        let surfaces = self.surfaces.lock().unwrap();
        surfaces.keys().copied().collect()
    }

    /// Replace the transport for `kind` with a wrapper built from the current
    /// one, remembering the original for [`restore`](Self::restore).
    ///
    /// Returns `false` without patching when the kind has no installed
    /// transport or is already patched.
    pub fn patch<F>(&self, kind: TransportKind, wrap: F) -> bool
    where
        F: FnOnce(Arc<dyn Transport>) -> Arc<dyn Transport>,
    {
        let mut surfaces = self.surfaces.lock().unwrap();
        let Some(surface) = surfaces.get_mut(&kind) else {
            return false;
        };
        if surface.original.is_some() {
            return false;
        }
        let original = Arc::clone(&surface.current);
        surface.current = wrap(Arc::clone(&original));
        surface.original = Some(original);
        true
    }

    /// Undo a patch, restoring the pre-patch transport. No-op when the kind
    /// is absent or unpatched.
    pub fn restore(&self, kind: TransportKind) {
        let mut surfaces = self.surfaces.lock().unwrap();
        if let Some(surface) = surfaces.get_mut(&kind) {
            if let Some(original) = surface.original.take() {
                surface.current = original;
            }
        }
    }
}
