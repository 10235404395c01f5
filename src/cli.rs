//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use exam_harvester::DEFAULT_CONCURRENCY;
use exam_harvester::config::DEFAULT_BASE_URL;

/// Harvest exam papers from a university repository.
///
/// Searches the repository for a course, discovers the downloadable papers
/// through the bundle/bitstream listings, and downloads them into a
/// timestamped folder. Requires a session cookie from the interactive login
/// helper (via --cookie or the COOKIE_HEADER environment variable).
#[derive(Parser, Debug)]
#[command(name = "exam-harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Course identifier to search for (e.g. MATH08058)
    pub course_id: String,

    /// Session cookie as a name=value pair (falls back to COOKIE_HEADER)
    #[arg(long)]
    pub cookie: Option<String>,

    /// Parent directory for the timestamped run folder
    #[arg(short = 'o', long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Pause after each crawl request in milliseconds (max 60000)
    #[arg(short = 'p', long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub pause_ms: u64,

    /// Repository API root
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
