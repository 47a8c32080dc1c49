//! Retrying HTTP client shared by the platform adapters.
//!
//! Each adapter owns one [`RetryingHttpClient`]. The client classifies every
//! outcome, sleeps between retryable failures through an injected
//! [`Sleeper`] with delays jittered by an injected [`Jitter`], and races both the request and the sleep against the
//! caller's [`CancellationToken`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::credentials::SecretValue;

pub mod backoff;

pub use backoff::{
    parse_retry_after, Jitter, NoJitter, RandomJitter, RetryPolicy, SeededJitter, Sleeper,
    TokioSleeper,
};

/// HTTP connect timeout for the reqwest client.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for a single attempt.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Response of one attempt, already read into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed `Retry-After` header, if any.
    pub retry_after: Option<Duration>,
    /// Raw response body.
    pub body: String,
}

impl HttpResponse {
    /// Read status, `Retry-After` and body from a reqwest response.
    ///
    /// # Errors
    ///
    /// Returns a retryable [`TransportFailure`] if the body cannot be read.
    pub async fn read(response: reqwest::Response) -> Result<Self, TransportFailure> {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, chrono::Utc::now()));
        let body = response.text().await.map_err(TransportFailure::from)?;
        Ok(Self {
            status,
            retry_after,
            body,
        })
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure below the HTTP layer: connect, DNS, timeout, reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    /// Whether another attempt may succeed.
    pub retryable: bool,
    /// Human-readable cause.
    pub detail: String,
}

impl TransportFailure {
    /// Failure worth retrying.
    pub fn retryable(detail: impl Into<String>) -> Self {
        Self {
            retryable: true,
            detail: detail.into(),
        }
    }

    /// Failure that will repeat on every attempt.
    pub fn permanent(detail: impl Into<String>) -> Self {
        Self {
            retryable: false,
            detail: detail.into(),
        }
    }
}

impl From<reqwest::Error> for TransportFailure {
    fn from(error: reqwest::Error) -> Self {
        let retryable =
            error.is_timeout() || error.is_connect() || error.is_request() || error.is_body();
        Self {
            retryable,
            detail: error.without_url().to_string(),
        }
    }
}

/// Terminal outcome of [`RetryingHttpClient::execute`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    /// Non-retryable 4xx. Returned on first occurrence.
    #[error("upstream rejected request with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Raw response body; sanitize before surfacing.
        body: String,
    },
    /// Retryable failures exhausted, or a non-retryable server failure.
    #[error("upstream unavailable after {attempts} attempt(s): {detail}")]
    Unavailable {
        /// Attempts made.
        attempts: u32,
        /// Sanitized last failure.
        detail: String,
    },
    /// Caller cancelled before an outcome was reached.
    #[error("request cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Retryable,
    Rejected,
    Unavailable,
}

fn classify_status(status: u16) -> StatusClass {
    match status {
        429 | 502 | 503 | 504 => StatusClass::Retryable,
        400..=499 => StatusClass::Rejected,
        _ => StatusClass::Unavailable,
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Connect and per-attempt request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// TCP/TLS connect timeout.
    pub connect: Duration,
    /// Whole-request timeout for one attempt.
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// HTTP client applying a [`RetryPolicy`] to every request.
#[derive(Clone)]
pub struct RetryingHttpClient {
    client: reqwest::Client,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn Jitter>,
}

impl RetryingHttpClient {
    /// Build a pooled client with the given timeouts.
    pub fn new(policy: RetryPolicy, timeouts: HttpTimeouts) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self::with_client(client, policy)
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: reqwest::Client, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(RandomJitter),
        }
    }

    /// Replace the sleep implementation.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the jitter source.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Active retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `send` until it succeeds, fails permanently, runs out of
    /// attempts, or `cancel` fires.
    ///
    /// `label` identifies the call site in logs.
    ///
    /// # Errors
    ///
    /// - [`HttpError::Rejected`] for a non-retryable 4xx.
    /// - [`HttpError::Unavailable`] once attempts are exhausted or the
    ///   failure is not retryable.
    /// - [`HttpError::Cancelled`] when the token fires first.
    pub async fn execute<F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut send: F,
    ) -> Result<HttpResponse, HttpError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<HttpResponse, TransportFailure>> + Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(HttpError::Cancelled),
                outcome = send() => outcome,
            };

            let (detail, retry_after) = match outcome {
                Ok(response) if response.is_success() => {
                    debug!(label, attempt, status = response.status, "upstream accepted request");
                    return Ok(response);
                }
                Ok(response) => {
                    let detail = format!(
                        "status {}: {}",
                        response.status,
                        sanitize_http_error_body(&response.body)
                    );
                    match classify_status(response.status) {
                        StatusClass::Retryable => (detail, response.retry_after),
                        StatusClass::Rejected => {
                            return Err(HttpError::Rejected {
                                status: response.status,
                                body: response.body,
                            });
                        }
                        StatusClass::Unavailable => {
                            return Err(HttpError::Unavailable {
                                attempts: attempt,
                                detail,
                            });
                        }
                    }
                }
                Err(failure) if failure.retryable => (failure.detail, None),
                Err(failure) => {
                    return Err(HttpError::Unavailable {
                        attempts: attempt,
                        detail: failure.detail,
                    });
                }
            };

            if attempt >= max_attempts {
                warn!(label, attempts = attempt, detail = %detail, "upstream retries exhausted");
                return Err(HttpError::Unavailable {
                    attempts: attempt,
                    detail,
                });
            }

            let delay = match retry_after {
                Some(requested) => self.policy.clamp_retry_after(requested),
                None => self.policy.backoff_delay(attempt, self.jitter.as_ref()),
            };
            warn!(
                label,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                detail = %detail,
                "transient upstream failure, retrying"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(HttpError::Cancelled),
                () = self.sleeper.sleep(delay) => {}
            }
        }
    }

    /// POST a JSON body with bearer authentication, with retries.
    ///
    /// # Errors
    ///
    /// See [`RetryingHttpClient::execute`].
    pub async fn post_json(
        &self,
        label: &str,
        url: &str,
        bearer: &SecretValue,
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, HttpError> {
        self.execute(label, cancel, || {
            let request = self
                .client
                .post(url)
                .bearer_auth(bearer.expose())
                .json(body);
            async move {
                let response = request.send().await.map_err(TransportFailure::from)?;
                HttpResponse::read(response).await
            }
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Collapse whitespace, redact token-shaped values and truncate to 256 chars.
pub fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"EAA[A-Za-z0-9]{20,}",
        r"(?i)bearer\s+[A-Za-z0-9._\-]{10,}",
        r#"(?i)"access_token"\s*:\s*"[^"]*""#,
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}
