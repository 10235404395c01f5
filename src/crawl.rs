//! Four-stage crawl orchestration: search → items → bundles → bitstreams.
//!
//! Stages run strictly sequentially, each completing before the next starts,
//! with a fixed pause after every successful fetch to bound the request rate
//! against the upstream service. Any single fetch failure aborts the run:
//! partial crawl metadata is not resumable, so there is no per-stage
//! recovery.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::client::{ApiClient, ApiError};
use crate::config::ApiConfig;
use crate::download::DownloadJob;
use crate::extract::{BitstreamRef, Role, extract_bitstream_refs, extract_ids};
use crate::filename::{ensure_pdf_extension, resolve_unique_name, sanitize_filename};

/// Marker distinguishing bundles that carry downloadable content.
const ORIGINAL_BUNDLE_MARKER: &str = "ORIGINAL";

/// Errors that abort a crawl run.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// A stage request failed after the client's retry budget.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// The four sequential crawl stages, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStage {
    /// Stage 0: one search request for the course.
    Search,
    /// Stage 1: bundle listing per item.
    Bundles,
    /// Stage 2: bitstream listing per (item, bundle) pair.
    Bitstreams,
    /// Stage 3: filter and extract (no network).
    Extract,
}

impl fmt::Display for CrawlStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Search => write!(f, "search"),
            Self::Bundles => write!(f, "bundles"),
            Self::Bitstreams => write!(f, "bitstreams"),
            Self::Extract => write!(f, "extract"),
        }
    }
}

/// Bitstream references extracted from one bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleContents {
    /// The bundle's identifier.
    pub bundle_id: String,
    /// Deduplicated (id, name) references; empty for bundles without
    /// downloadable content.
    pub refs: Vec<BitstreamRef>,
}

/// Everything the crawl discovered, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    /// Distinct items returned by the search.
    pub items_found: usize,
    /// Per-bundle bitstream references (one entry per distinct bundle).
    pub bundles: Vec<BundleContents>,
    /// (item, bundle) pairs whose listing lacked the content marker.
    pub bundles_skipped: usize,
}

impl CrawlOutcome {
    /// Total bitstream references across all bundles.
    #[must_use]
    pub fn total_refs(&self) -> usize {
        self.bundles.iter().map(|b| b.refs.len()).sum()
    }
}

type ProgressFn = dyn Fn(CrawlStage, usize, usize) + Send + Sync;

/// Drives the four discovery stages and accumulates downloadable-file
/// descriptors.
///
/// Owns its HTTP client and configuration; progress counters and collected
/// state live on the stack of [`crawl`](Self::crawl), never in globals.
pub struct Crawler {
    client: ApiClient,
    config: ApiConfig,
    progress: Option<Box<ProgressFn>>,
}

impl Crawler {
    /// Creates a crawler over an authenticated client.
    #[must_use]
    pub fn new(client: ApiClient, config: ApiConfig) -> Self {
        Self {
            client,
            config,
            progress: None,
        }
    }

    /// Registers a progress callback invoked after each unit of work with
    /// that stage's done/total counts.
    #[must_use]
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(CrawlStage, usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Returns the crawler's API configuration.
    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Runs all four stages for a course and returns the discovered
    /// bitstream references.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError`] on the first fetch that fails after retries;
    /// the run is aborted with no partial result.
    #[instrument(skip(self), fields(course_id = %course_id))]
    pub async fn crawl(&self, course_id: &str) -> Result<CrawlOutcome, CrawlError> {
        // Stage 0: one large-page search request.
        let search_text = self.fetch(&self.config.search_url(course_id)).await?;
        let item_ids = extract_ids(&search_text, Role::Items);
        self.report(CrawlStage::Search, 1, 1);
        info!(items = item_ids.len(), "search complete");

        // Stage 1: bundle listing per item.
        let mut bundle_pairs: Vec<(String, String)> = Vec::new();
        let stage_total = item_ids.len();
        for (done, item_id) in item_ids.iter().enumerate() {
            let text = self.fetch(&self.config.item_bundles_url(item_id)).await?;
            let bundle_ids = extract_ids(&text, Role::Bundles);
            debug!(item = %item_id, bundles = bundle_ids.len(), "item bundles listed");
            for bundle_id in bundle_ids {
                bundle_pairs.push((item_id.clone(), bundle_id));
            }
            self.report(CrawlStage::Bundles, done + 1, stage_total);
        }

        // Stage 2: bitstream listing per (item, bundle) pair; text retained
        // for stage 3.
        let mut bundle_texts: HashMap<String, String> = HashMap::new();
        let stage_total = bundle_pairs.len();
        for (done, (_, bundle_id)) in bundle_pairs.iter().enumerate() {
            let text = self
                .fetch(&self.config.bundle_bitstreams_url(bundle_id))
                .await?;
            bundle_texts.insert(bundle_id.clone(), text);
            self.report(CrawlStage::Bitstreams, done + 1, stage_total);
        }

        // Stage 3: filter on the content marker and extract references.
        let mut bundles: Vec<BundleContents> = Vec::new();
        let mut seen_bundles: HashSet<String> = HashSet::new();
        let mut bundles_skipped = 0usize;
        let stage_total = bundle_pairs.len();
        for (done, (_, bundle_id)) in bundle_pairs.iter().enumerate() {
            let text = bundle_texts.get(bundle_id).map_or("", String::as_str);

            let refs = if text.contains(ORIGINAL_BUNDLE_MARKER) {
                extract_bitstream_refs(text)
            } else {
                bundles_skipped += 1;
                Vec::new()
            };

            if seen_bundles.insert(bundle_id.clone()) {
                bundles.push(BundleContents {
                    bundle_id: bundle_id.clone(),
                    refs,
                });
            }
            self.report(CrawlStage::Extract, done + 1, stage_total);
        }

        let outcome = CrawlOutcome {
            items_found: item_ids.len(),
            bundles,
            bundles_skipped,
        };
        info!(
            items = outcome.items_found,
            refs = outcome.total_refs(),
            skipped = outcome.bundles_skipped,
            "crawl complete"
        );
        Ok(outcome)
    }

    /// Fetches a URL, then pauses to bound the request rate.
    async fn fetch(&self, url: &str) -> Result<String, CrawlError> {
        let text = self.client.fetch_text(url).await?;
        tokio::time::sleep(self.config.pause_between_requests).await;
        Ok(text)
    }

    fn report(&self, stage: CrawlStage, done: usize, total: usize) {
        if let Some(callback) = &self.progress {
            callback(stage, done, total);
        }
    }
}

/// Turns crawl results into download jobs with collision-free destinations.
///
/// References without an identifier are dropped (they cannot become a
/// download). Names are sanitized, `.pdf`-suffixed, and made unique against
/// both the run-scoped used-name set and pre-existing files in `dest_dir`.
#[must_use]
pub fn plan_jobs(outcome: &CrawlOutcome, config: &ApiConfig, dest_dir: &Path) -> Vec<DownloadJob> {
    let mut used = HashSet::new();
    let mut jobs = Vec::new();

    for bundle in &outcome.bundles {
        for bitstream in &bundle.refs {
            if bitstream.id.is_empty() {
                continue;
            }
            let base = ensure_pdf_extension(&sanitize_filename(&bitstream.name));
            let dest = resolve_unique_name(dest_dir, &base, &mut used);
            jobs.push(DownloadJob::new(
                config.bitstream_content_url(&bitstream.id),
                dest,
            ));
        }
    }

    jobs
}
