//! Download engine executing a bounded pool of concurrent jobs.
//!
//! The engine uses a semaphore to limit the number of concurrent downloads
//! (teacher pattern: one task per job, RAII permits). Each job performs its
//! own raw fetch with the credential header only, following redirects
//! manually up to a bounded hop count, and streams the body to disk in
//! chunks. One job's failure does not cancel or affect the others; there is
//! no retry in this path.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{COOKIE, HeaderValue, LOCATION};
use reqwest::{Client, redirect};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::error::DownloadError;
use crate::config::SessionCookie;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default number of concurrent download workers.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Maximum redirect hops followed per job.
pub const MAX_REDIRECTS: usize = 5;

/// Connect timeout for download requests.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Total per-request timeout (generous: bodies are streamed PDFs).
const READ_TIMEOUT_SECS: u64 = 300;

/// One resolved unit of work: source URL and destination path.
///
/// Constructed by the crawl planner once all identifiers and names are
/// known; destination paths are unique within the run's output folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    /// Bitstream content URL.
    pub url: String,
    /// Collision-free destination path.
    pub dest: PathBuf,
}

impl DownloadJob {
    /// Creates a job from its parts.
    #[must_use]
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
        }
    }
}

/// Outcome of one job: the job itself plus bytes written or the failure.
#[derive(Debug)]
pub struct JobResult {
    /// The job that was executed.
    pub job: DownloadJob,
    /// Bytes written on success, or the isolated failure.
    pub result: Result<u64, DownloadError>,
}

impl JobResult {
    /// Whether the job completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Error type for engine construction and batch execution.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The session credential cannot be sent as an HTTP header.
    #[error("session cookie is not a valid HTTP header value")]
    InvalidCredential,

    /// Failed to construct the underlying HTTP client.
    #[error("failed to build download HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Engine executing download jobs concurrently up to a fixed worker limit.
///
/// The underlying client has redirect following disabled: each hop is
/// re-issued explicitly so that only the credential header travels to the
/// target (no cookie jar accumulation across hosts), and each hop's
/// connection is scoped to that hop.
#[derive(Debug)]
pub struct DownloadEngine {
    client: Client,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl DownloadEngine {
    /// Creates an engine with the given worker limit (1-100).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] for an out-of-range limit
    /// or [`EngineError::Client`] if the HTTP client cannot be built.
    #[instrument(level = "debug")]
    pub fn new(concurrency: usize) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .user_agent(crate::client::default_user_agent())
            .build()?;

        debug!(concurrency, "creating download engine");

        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        })
    }

    /// Returns the configured worker limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Executes all jobs and returns per-job results.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] only for batch-level problems (bad credential,
    /// closed semaphore). Individual job failures are carried in the results.
    pub async fn run(
        &self,
        jobs: Vec<DownloadJob>,
        cookie: &SessionCookie,
    ) -> Result<Vec<JobResult>, EngineError> {
        self.run_with_progress(jobs, cookie, |_, _| {}).await
    }

    /// Executes all jobs, invoking `on_progress(done, total)` as each completes.
    ///
    /// Completion order is non-deterministic and used only for progress
    /// counting; results are returned in job submission order.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`run`](Self::run).
    #[instrument(skip(self, jobs, cookie, on_progress), fields(jobs = jobs.len()))]
    pub async fn run_with_progress<F>(
        &self,
        jobs: Vec<DownloadJob>,
        cookie: &SessionCookie,
        on_progress: F,
    ) -> Result<Vec<JobResult>, EngineError>
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        let mut cookie_value = HeaderValue::from_str(cookie.header_value())
            .map_err(|_| EngineError::InvalidCredential)?;
        cookie_value.set_sensitive(true);

        let total = jobs.len();
        let done = Arc::new(AtomicUsize::new(0));
        let on_progress = Arc::new(on_progress);
        let mut handles = Vec::with_capacity(total);

        info!(total, concurrency = self.concurrency, "starting downloads");

        for job in jobs {
            // Acquire a permit before spawning (blocks at the worker limit).
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;

            let client = self.client.clone();
            let cookie_value = cookie_value.clone();
            let done = Arc::clone(&done);
            let on_progress = Arc::clone(&on_progress);

            handles.push(tokio::spawn(async move {
                // Permit is dropped when this block exits (RAII)
                let _permit = permit;

                let result = download_job(&client, &job, &cookie_value).await;
                match &result {
                    Ok(bytes) => {
                        info!(url = %job.url, path = %job.dest.display(), bytes, "download complete");
                    }
                    Err(error) => {
                        warn!(url = %job.url, error = %error, "download failed");
                    }
                }

                let completed = done.fetch_add(1, Ordering::SeqCst) + 1;
                on_progress(completed, total);

                JobResult { job, result }
            }));
        }

        let mut results = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                // Task panics are logged but don't fail the batch.
                Err(error) => warn!(error = %error, "download task panicked"),
            }
        }

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            succeeded,
            failed = results.len() - succeeded,
            "downloads finished"
        );

        Ok(results)
    }
}

/// Fetches one job's content, following redirects manually.
///
/// Each hop issues a fresh request carrying only the credential header; the
/// previous hop's response is dropped before the next request so its
/// connection is released on every path, including errors.
async fn download_job(
    client: &Client,
    job: &DownloadJob,
    cookie_value: &HeaderValue,
) -> Result<u64, DownloadError> {
    let mut url = Url::parse(&job.url).map_err(|_| DownloadError::invalid_url(&job.url))?;
    let mut redirects = 0usize;

    let response = loop {
        debug!(url = %url, redirects, "requesting");
        let response = client
            .get(url.clone())
            .header(COOKIE, cookie_value.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DownloadError::timeout(&job.url)
                } else {
                    DownloadError::network(&job.url, e)
                }
            })?;

        let status = response.status().as_u16();
        if matches!(status, 301 | 302 | 303 | 307 | 308) {
            if redirects >= MAX_REDIRECTS {
                return Err(DownloadError::too_many_redirects(&job.url, MAX_REDIRECTS));
            }
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            let Some(location) = location else {
                return Err(DownloadError::missing_location(&job.url));
            };
            url = url
                .join(&location)
                .map_err(|_| DownloadError::invalid_url(&location))?;
            redirects += 1;
            continue;
        }

        if status != 200 {
            return Err(DownloadError::http_status(&job.url, status));
        }

        break response;
    };

    stream_to_file(response, job).await
}

/// Streams the response body to the job's destination in chunks.
///
/// Partial files from a failed stream are left on disk; callers treat any
/// failed job as needing a full redownload.
async fn stream_to_file(response: reqwest::Response, job: &DownloadJob) -> Result<u64, DownloadError> {
    let file = File::create(&job.dest)
        .await
        .map_err(|e| DownloadError::io(&job.dest, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::network(&job.url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(&job.dest, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(&job.dest, e))?;

    Ok(bytes_written)
}
