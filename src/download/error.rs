//! Error types for individual download jobs.
//!
//! Every variant is scoped to one job: the engine records these per job and
//! never aborts the batch over them.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can fail a single download job.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS, mid-body failure).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Final response had a non-200 status.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The redirect chain exceeded the hop bound.
    #[error("too many redirects downloading {url} (limit {limit})")]
    TooManyRedirects {
        /// The original job URL.
        url: String,
        /// The configured hop limit.
        limit: usize,
    },

    /// A redirect response carried no Location header.
    #[error("redirect without Location header downloading {url}")]
    MissingLocation {
        /// The URL whose response lacked a Location.
        url: String,
    },

    /// The job URL (or a redirect target) is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// File system error writing the output file.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The output path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
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

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a redirect-bound error.
    pub fn too_many_redirects(url: impl Into<String>, limit: usize) -> Self {
        Self::TooManyRedirects {
            url: url.into(),
            limit,
        }
    }

    /// Creates a missing-Location error.
    pub fn missing_location(url: impl Into<String>) -> Self {
        Self::MissingLocation { url: url.into() }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
