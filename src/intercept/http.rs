//! HTTP-backed transport.
//!
//! The real network surface for polling and one-shot fetches: a `reqwest`
//! client presented through the [`Transport`] trait so the observer can wrap
//! it like any other surface. Bodies are handed over as a chunk stream, which
//! lets the observer stop reading at its cap without buffering the rest.

use super::{CaptureBody, Transport, TransportKind, TransportRequest, TransportResponse};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use std::io;
use std::time::Duration;

const USER_AGENT: &str = concat!("chequeflow/", env!("CARGO_PKG_VERSION"));

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(Policy::limited(5))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Wrap an already-configured client (custom headers, cookies, proxies).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Fetch
    }

    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let method = Method::from_bytes(request.method.as_bytes())
            .with_context(|| format!("invalid HTTP method: {}", request.method))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("request to {} failed", request.url))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let stream = async_stream::stream! {
            let mut response = response;
            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => yield Ok(bytes.to_vec()),
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(io::Error::other(err));
                        break;
                    }
                }
            }
        };

        Ok(TransportResponse {
            url: Some(final_url),
            status: Some(status),
            content_type,
            opaque: false,
            capture: Some(CaptureBody::Stream(Box::pin(stream))),
        })
    }
}
