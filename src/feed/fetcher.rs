use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::parser::{parse_document, FetchedDocument};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors from the transport layer of a fetch attempt.
///
/// Only failures that produced no document at all surface here; a malformed
/// body or an HTTP error status comes back as a [`FetchedDocument`] with the
/// bozo flag or status code set, because the poll gate wants to inspect
/// those, not catch them.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured fetch timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Feed link is not a fetchable URL at all
    #[error("Invalid feed link: {0}")]
    InvalidLink(String),
}

impl FetchError {
    /// Whether this failure can never succeed on retry.
    ///
    /// Name-resolution failures and structurally invalid links are permanent;
    /// everything else (timeouts, connection resets, oversized bodies) is
    /// transient and retried on the next poll cycle.
    pub fn is_permanent(&self) -> bool {
        match self {
            FetchError::Network(e) => is_name_resolution_failure(e),
            FetchError::InvalidLink(_) => true,
            FetchError::Timeout | FetchError::ResponseTooLarge => false,
        }
    }
}

/// Walk the error source chain looking for a DNS resolution failure.
/// reqwest does not expose this as a typed variant, so we match on the
/// underlying resolver messages.
fn is_name_resolution_failure(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        let msg = e.to_string().to_lowercase();
        if msg.contains("dns error")
            || msg.contains("failed to lookup address")
            || msg.contains("name or service not known")
        {
            return true;
        }
        source = e.source();
    }
    false
}

/// The external document-fetch capability.
///
/// The scheduler is generic over this so tests can substitute a stub and,
/// for the structurally-excluded link patterns, assert that no fetch call
/// was ever made.
#[allow(async_fn_in_trait)]
pub trait FeedFetcher {
    async fn fetch(&self, link: &str) -> Result<FetchedDocument, FetchError>;
}

/// HTTP-backed fetcher with a per-request timeout and bounded body size.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Use a preconfigured client (custom user agent, proxy, etc.)
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, link: &str) -> Result<FetchedDocument, FetchError> {
        if Url::parse(link).is_err() {
            return Err(FetchError::InvalidLink(link.to_string()));
        }

        let response = tokio::time::timeout(self.timeout, self.client.get(link).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            // No document to parse; the gate reads the status code.
            return Ok(FetchedDocument {
                status: Some(status),
                ..Default::default()
            });
        }

        let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;

        let mut doc = parse_document(&bytes);
        doc.status = Some(status);
        Ok(doc)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
