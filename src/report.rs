//! Run summary aggregation.
//!
//! Pure counting over completed stages; computed only after the crawl and
//! downloads finish, never partially observable.

use std::fmt;
use std::path::PathBuf;

use crate::download::JobResult;

/// Final counts for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Items returned by the search.
    pub items_found: usize,
    /// Download jobs planned (= available papers).
    pub jobs_planned: usize,
    /// Jobs that completed successfully.
    pub downloaded: usize,
    /// Destination folder for this run.
    pub destination: PathBuf,
}

impl RunSummary {
    /// Builds a summary from the crawl counts and per-job results.
    #[must_use]
    pub fn from_results(
        items_found: usize,
        jobs_planned: usize,
        results: &[JobResult],
        destination: PathBuf,
    ) -> Self {
        let downloaded = results.iter().filter(|r| r.is_success()).count();
        Self {
            items_found,
            jobs_planned,
            downloaded,
            destination,
        }
    }

    /// Items found that yielded no downloadable paper.
    #[must_use]
    pub fn unavailable(&self) -> usize {
        self.items_found.saturating_sub(self.jobs_planned)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===== Paper Download Summary =====")?;
        writeln!(f, "Total papers found:               {}", self.items_found)?;
        writeln!(f, "Total available papers:           {}", self.jobs_planned)?;
        writeln!(f, "Total available papers downloaded:{}", self.downloaded)?;
        writeln!(f, "Total unavailable papers:         {}", self.unavailable())?;
        writeln!(f, "----------------------------------")?;
        writeln!(
            f,
            "Downloaded {} out of {} available paper(s).",
            self.downloaded, self.jobs_planned
        )?;
        write!(f, "Saved to: {}", self.destination.display())
    }
}
