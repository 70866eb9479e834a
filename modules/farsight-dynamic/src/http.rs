//! Shared HTTP client for every dynamic adapter: auth header injection,
//! user agent, and capped exponential retry on transient failures. Logical
//! failures (4xx) surface immediately and are never retried.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::USER_AGENT;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const FARSIGHT_USER_AGENT: &str = concat!("farsight/", env!("CARGO_PKG_VERSION"));

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 200;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Supplies the `Authorization` header value for outbound calls. Credential
/// acquisition itself lives outside the core; this is the seam it plugs into.
pub trait TokenSource: Send + Sync {
    fn authorization(&self) -> Option<String>;
}

/// Static bearer token, mostly for tests and local stacks.
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn authorization(&self) -> Option<String> {
        Some(format!("Bearer {}", self.0))
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response body: {0}")]
    Decode(String),
}

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    auth: Option<Arc<dyn TokenSource>>,
    max_retries: u32,
    base_delay: Duration,
}

impl HttpClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            auth: None,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }

    pub fn with_auth(mut self, auth: Arc<dyn TokenSource>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    /// GET a URL and decode the JSON body. Retries 429/5xx/transport errors
    /// with capped exponential backoff; 4xx returns immediately as
    /// [`HttpError::Status`] with the body preserved for diagnosis.
    pub async fn get_json(&self, ctx: &CancellationToken, url: &str) -> Result<Value, HttpError> {
        let mut delay = self.base_delay;

        for attempt in 0..=self.max_retries {
            if ctx.is_cancelled() {
                return Err(HttpError::Cancelled);
            }

            match self.get_once(ctx, url).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries && is_retryable(&err) => {
                    warn!(url, attempt, error = %err, "Retrying transient HTTP failure");
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(HttpError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = delay.saturating_mul(2).min(MAX_RETRY_DELAY);
                }
                Err(err) => return Err(err),
            }
        }

        unreachable!("retry loop always returns")
    }

    async fn get_once(&self, ctx: &CancellationToken, url: &str) -> Result<Value, HttpError> {
        let mut request = self.client.get(url).header(USER_AGENT, FARSIGHT_USER_AGENT);
        if let Some(auth) = &self.auth {
            if let Some(value) = auth.authorization() {
                request = request.header(reqwest::header::AUTHORIZATION, value);
            }
        }

        let response = tokio::select! {
            _ = ctx.cancelled() => return Err(HttpError::Cancelled),
            result = request.send() => result.map_err(classify_transport)?,
        };

        let status = response.status();
        // Body is consumed on every path so the connection returns to the pool.
        let body = tokio::select! {
            _ = ctx.cancelled() => return Err(HttpError::Cancelled),
            result = response.text() => result.map_err(classify_transport)?,
        };

        if !status.is_success() {
            debug!(url, status = status.as_u16(), "Remote API returned non-success");
            return Err(HttpError::Status {
                status: status.as_u16(),
                body: preview(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| HttpError::Decode(e.to_string()))
    }
}

fn classify_transport(err: reqwest::Error) -> HttpError {
    if err.is_timeout() {
        HttpError::Timeout(err.to_string())
    } else {
        HttpError::Transport(err.to_string())
    }
}

fn is_retryable(err: &HttpError) -> bool {
    match err {
        HttpError::Status { status, .. } => *status == 429 || *status >= 500,
        HttpError::Transport(_) | HttpError::Timeout(_) => true,
        HttpError::Cancelled | HttpError::Decode(_) => false,
    }
}

/// First 256 bytes of an error body, enough to diagnose without logging
/// whole documents.
fn preview(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= 256 {
        trimmed.to_string()
    } else {
        let mut end = 256;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(is_retryable(&HttpError::Status { status: 429, body: String::new() }));
        assert!(is_retryable(&HttpError::Status { status: 503, body: String::new() }));
        assert!(is_retryable(&HttpError::Transport("reset".into())));
        assert!(!is_retryable(&HttpError::Status { status: 404, body: String::new() }));
        assert!(!is_retryable(&HttpError::Status { status: 403, body: String::new() }));
        assert!(!is_retryable(&HttpError::Cancelled));
    }

    #[test]
    fn preview_truncates_long_bodies() {
        let long = "x".repeat(1000);
        assert!(preview(&long).len() < 300);
        assert_eq!(preview("short"), "short");
    }
}
