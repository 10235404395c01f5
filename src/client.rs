//! Authenticated HTTP client for the repository API.
//!
//! Every request carries the session cookie and standard headers. Idempotent
//! GETs are retried automatically on connection failures and on a fixed set
//! of server-side statuses (429, 500, 502, 503, 504) with capped exponential
//! backoff and jitter; 401/403 surface immediately as authentication errors.

use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use reqwest::header::{ACCEPT, COOKIE, HeaderMap, HeaderValue, RETRY_AFTER};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::SessionCookie;

/// Total request budget per URL: the initial attempt plus five retries.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;

/// Per-request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Base delay for the first retry.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Cap on any single backoff delay.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Maximum jitter added to each delay.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Cap on honored Retry-After values.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Statuses retried automatically on GET.
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Errors raised by API fetches.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level error (DNS, connection refused, TLS, mid-body failure).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-2xx response that is not an authentication failure.
    #[error("HTTP {status} fetching {url}")]
    Status {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// The session credential was rejected (401/403). Never retried.
    #[error("authentication rejected (HTTP {status}) fetching {url}: refresh the session cookie")]
    Auth {
        /// The URL that rejected the credential.
        url: String,
        /// The HTTP status code (401 or 403).
        status: u16,
    },

    /// The session credential cannot be sent as an HTTP header.
    #[error("session cookie is not a valid HTTP header value")]
    InvalidCredential,
}

impl ApiError {
    /// Creates a network error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a status error without a Retry-After value.
    pub fn status(url: impl Into<String>, status: u16) -> Self {
        Self::Status {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an authentication error.
    pub fn auth(url: impl Into<String>, status: u16) -> Self {
        Self::Auth {
            url: url.into(),
            status,
        }
    }

    /// Whether this failure may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
            Self::Auth { .. } | Self::InvalidCredential => false,
        }
    }

    /// Parsed Retry-After delay, when the server sent a usable one.
    fn retry_after_delay(&self) -> Option<Duration> {
        match self {
            Self::Status {
                retry_after: Some(value),
                ..
            } => parse_retry_after(value),
            _ => None,
        }
    }
}

/// Retry configuration for transient GET failures.
///
/// Delay formula: `min(base_delay * multiplier^(attempt - 1), max_delay) + jitter`.
/// With defaults the ladder is roughly 0.5s, 1s, 2s, 4s, 8s across the five
/// retries of the six-attempt budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit settings. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Returns the total attempt budget (initial attempt included).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the retry following failed attempt number `attempt` (1-indexed).
    fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * self.backoff_multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(capped_ms as u64) + Duration::from_millis(jitter_ms)
    }
}

/// Parses a Retry-After header value: integer seconds or an HTTP-date.
///
/// Values are capped at one hour; negative or unparseable values yield `None`.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        if let Ok(duration) = datetime.duration_since(std::time::SystemTime::now()) {
            return Some(duration.min(MAX_RETRY_AFTER));
        }
    }

    None
}

/// HTTP client that attaches the session credential to every request.
///
/// Built once per run and reused across all crawl stages to take advantage
/// of connection pooling.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    retry_policy: RetryPolicy,
}

impl ApiClient {
    /// Creates a client with the default retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidCredential`] if the cookie cannot be sent
    /// as a header, or [`ApiError::Network`] if client construction fails.
    pub fn new(cookie: &SessionCookie) -> Result<Self, ApiError> {
        Self::with_retry_policy(cookie, RetryPolicy::default())
    }

    /// Creates a client with an explicit retry policy (tests tighten delays here).
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`new`](Self::new).
    pub fn with_retry_policy(
        cookie: &SessionCookie,
        retry_policy: RetryPolicy,
    ) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        let mut cookie_value = HeaderValue::from_str(cookie.header_value())
            .map_err(|_| ApiError::InvalidCredential)?;
        cookie_value.set_sensitive(true);
        headers.insert(COOKIE, cookie_value);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .gzip(true)
            .user_agent(default_user_agent())
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::network("<client construction>", e))?;

        Ok(Self {
            client,
            retry_policy,
        })
    }

    /// Fetches a URL and returns the response body as text.
    ///
    /// Transient failures (connection errors, timeouts, 429/5xx) are retried
    /// up to the policy's attempt budget; a 429 with a parseable Retry-After
    /// header uses that delay instead of the backoff ladder. 401/403 and
    /// other non-2xx statuses fail immediately.
    ///
    /// # Errors
    ///
    /// Returns the final [`ApiError`] once the budget is exhausted, or the
    /// first non-transient error encountered.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_text(&self, url: &str) -> Result<String, ApiError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.try_fetch(url).await {
                Ok(text) => return Ok(text),
                Err(error) => {
                    if !error.is_transient() || attempt >= self.retry_policy.max_attempts() {
                        debug!(attempt, error = %error, "not retrying fetch");
                        return Err(error);
                    }

                    let delay = error
                        .retry_after_delay()
                        .unwrap_or_else(|| self.retry_policy.delay_for(attempt));
                    warn!(
                        attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Single fetch attempt with status classification.
    async fn try_fetch(&self, url: &str) -> Result<String, ApiError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::timeout(url)
            } else {
                ApiError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();

            if matches!(status_code, 401 | 403) {
                return Err(ApiError::auth(url, status_code));
            }

            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(ApiError::Status {
                url: url.to_string(),
                status: status_code,
                retry_after,
            });
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::timeout(url)
            } else {
                ApiError::network(url, e)
            }
        })
    }
}

/// Default User-Agent identifying the tool.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("exam-harvester/{version}")
}
