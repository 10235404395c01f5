//! Runtime configuration: API endpoints, session credential, crawl tunables.
//!
//! The session credential is produced by an external interactive login flow
//! and handed to this crate as an opaque `name=value` cookie pair, typically
//! via the `COOKIE_HEADER` environment variable.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Environment variable carrying the session cookie from the login collaborator.
pub const COOKIE_ENV_VAR: &str = "COOKIE_HEADER";

/// Default repository API root.
pub const DEFAULT_BASE_URL: &str = "https://exampapers.ed.ac.uk/server/api";

/// Default search page size (large enough to return the full result set in one page).
pub const DEFAULT_SEARCH_PAGE_SIZE: u32 = 9999;

/// Default pause inserted after each successful crawl request.
pub const DEFAULT_PAUSE_BETWEEN_REQUESTS: Duration = Duration::from_millis(100);

/// Errors raised while assembling runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No session cookie was supplied via flag or environment.
    #[error(
        "no session cookie provided: pass --cookie or set {COOKIE_ENV_VAR} (run the login helper to obtain one)"
    )]
    MissingCookie,

    /// The supplied cookie does not look like a `name=value` pair.
    #[error("malformed session cookie: expected a name=value pair")]
    MalformedCookie,
}

/// An opaque session credential attached to every API request.
///
/// Validated on construction to be a `name=value` pair with a non-empty name;
/// beyond that the value is treated as an opaque bearer artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie(String);

impl SessionCookie {
    /// Parses a `name=value` cookie pair.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MalformedCookie`] if the input has no `=` or an
    /// empty name, or [`ConfigError::MissingCookie`] if it is empty/blank.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::MissingCookie);
        }
        match trimmed.split_once('=') {
            Some((name, _)) if !name.trim().is_empty() => Ok(Self(trimmed.to_string())),
            _ => Err(ConfigError::MalformedCookie),
        }
    }

    /// Reads the cookie from an explicit value or the `COOKIE_HEADER` environment variable.
    ///
    /// An explicit value takes precedence over the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCookie`] when neither source is set, or
    /// [`ConfigError::MalformedCookie`] for a non-`name=value` input.
    pub fn from_flag_or_env(flag: Option<&str>) -> Result<Self, ConfigError> {
        match flag {
            Some(value) => Self::parse(value),
            None => match std::env::var(COOKIE_ENV_VAR) {
                Ok(value) => Self::parse(&value),
                Err(_) => Err(ConfigError::MissingCookie),
            },
        }
    }

    /// Returns the raw `name=value` header value.
    #[must_use]
    pub fn header_value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCookie {
    /// Displays the cookie name only; the value is a credential and is never printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.0.split('=').next().unwrap_or("");
        write!(f, "{name}=<redacted>")
    }
}

/// Repository API configuration used by the crawl orchestrator.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// API root, e.g. `https://exampapers.ed.ac.uk/server/api`. No trailing slash.
    pub base_url: String,
    /// Page size for the single-page search request.
    pub search_page_size: u32,
    /// Pause inserted after each successful crawl request.
    pub pause_between_requests: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            search_page_size: DEFAULT_SEARCH_PAGE_SIZE,
            pause_between_requests: DEFAULT_PAUSE_BETWEEN_REQUESTS,
        }
    }
}

impl ApiConfig {
    /// Creates a config rooted at `base_url`, with default tunables.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            ..Self::default()
        }
    }

    /// Search endpoint for a course query (single large page, newest first).
    #[must_use]
    pub fn search_url(&self, course_id: &str) -> String {
        let query = urlencoding::encode(course_id);
        format!(
            "{base}/discover/search/objects?sort=dc.date.accessioned,DESC&page=0&size={size}&query={query}&embed=thumbnail&embed=item%2Fthumbnail",
            base = self.base_url,
            size = self.search_page_size,
        )
    }

    /// Bundle listing endpoint for an item.
    #[must_use]
    pub fn item_bundles_url(&self, item_id: &str) -> String {
        format!("{}/core/items/{item_id}/bundles", self.base_url)
    }

    /// Bitstream listing endpoint for a bundle.
    #[must_use]
    pub fn bundle_bitstreams_url(&self, bundle_id: &str) -> String {
        format!("{}/core/bundles/{bundle_id}/bitstreams", self.base_url)
    }

    /// Binary content endpoint for a bitstream.
    #[must_use]
    pub fn bitstream_content_url(&self, bitstream_id: &str) -> String {
        format!("{}/core/bitstreams/{bitstream_id}/content", self.base_url)
    }
}
