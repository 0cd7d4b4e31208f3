//! HTTP transport.
//!
//! The HTTP client itself is abstracted behind [`HttpClient`], so any
//! library (or an in-process stub) can carry the requests.
//!
//! Each chunk is posted as JSON to `{base_url}/sync/{category}/{operation}`
//! and the server answers `{"ok": true}` or `{"ok": false, "error": "..."}`.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{ChunkAck, ChunkRequest, Transport};
use parking_lot::RwLock;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, String>;

    /// Checks if the client is healthy.
    fn is_healthy(&self) -> bool;
}

#[derive(Debug, Deserialize)]
struct SyncReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP-based chunk transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    timeout: Duration,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport with a 30 second timeout.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout: Duration::from_secs(30),
            last_error: RwLock::new(None),
        }
    }

    /// Creates a transport using the timeout of `config`.
    pub fn from_config(base_url: impl Into<String>, client: C, config: &SyncConfig) -> Self {
        Self::new(base_url, client).with_timeout(config.timeout)
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// The endpoint a request is posted to.
    pub fn endpoint(&self, request: &ChunkRequest<'_>) -> String {
        format!(
            "{}/sync/{}/{}",
            self.base_url, request.category, request.operation
        )
    }

    fn fail(&self, err: SyncError) -> SyncError {
        *self.last_error.write() = Some(err.to_string());
        err
    }
}

impl<C: HttpClient> Transport for HttpTransport<C> {
    fn send(&self, request: &ChunkRequest<'_>) -> SyncResult<ChunkAck> {
        if !self.client.is_healthy() {
            return Err(self.fail(SyncError::transport_retryable("http client unhealthy")));
        }

        let body = serde_json::to_vec(request)
            .map_err(|e| self.fail(SyncError::Protocol(format!("failed to encode request: {e}"))))?;
        let bytes = body.len() as u64;
        let url = self.endpoint(request);

        let started = Instant::now();
        let response = self
            .client
            .post(&url, body, self.timeout)
            .map_err(|e| self.fail(SyncError::transport_retryable(e)))?;
        let elapsed = started.elapsed();

        let reply: SyncReply = serde_json::from_slice(&response)
            .map_err(|e| self.fail(SyncError::Protocol(format!("failed to decode response: {e}"))))?;
        if !reply.ok {
            let message = reply.error.unwrap_or_else(|| "rejected".to_string());
            return Err(self.fail(SyncError::ServerError(message)));
        }

        *self.last_error.write() = None;
        debug!(url = %url, bytes, elapsed_ms = elapsed.as_millis() as u64, "chunk posted");
        Ok(ChunkAck {
            bytes,
            elapsed: Some(elapsed),
        })
    }
}
