//! CLI entry point for the exam-paper harvester.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use exam_harvester::{
    ApiClient, ApiConfig, Crawler, CrawlStage, DownloadEngine, RunSummary, SessionCookie,
    filename::sanitize_filename, plan_jobs,
};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (warn)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let cookie = SessionCookie::from_flag_or_env(args.cookie.as_deref())?;
    info!(credential = %cookie, "session cookie loaded");

    let mut config = ApiConfig::with_base_url(&args.base_url);
    config.pause_between_requests = Duration::from_millis(args.pause_ms);

    // Timestamped destination folder, fatal if it cannot be created.
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    let folder_name = format!("{}_{stamp}", sanitize_filename(&args.course_id));
    let dest_dir = args.output_dir.join(folder_name);
    std::fs::create_dir_all(&dest_dir)
        .with_context(|| format!("cannot create destination folder {}", dest_dir.display()))?;

    let client = ApiClient::new(&cookie)?;

    let stage_bars = StageBars::new(args.quiet);
    let crawler = Crawler::new(client, config)
        .with_progress(move |stage, done, total| stage_bars.update(stage, done, total));

    let outcome = crawler
        .crawl(&args.course_id)
        .await
        .context("crawl aborted")?;

    let jobs = plan_jobs(&outcome, crawler.config(), &dest_dir);
    let items_found = outcome.items_found;
    let jobs_planned = jobs.len();
    info!(items_found, jobs_planned, "download jobs planned");

    let engine = DownloadEngine::new(usize::from(args.concurrency))?;
    let download_bar = make_download_bar(args.quiet, jobs_planned);
    let results = engine
        .run_with_progress(jobs, &cookie, move |done, total| {
            if let Some(bar) = &download_bar {
                bar.set_position(done as u64);
                if done >= total {
                    bar.finish();
                }
            }
        })
        .await?;

    let summary = RunSummary::from_results(items_found, jobs_planned, &results, dest_dir);
    println!("\n{summary}");

    Ok(())
}

/// One progress bar per crawl stage, created lazily as stages begin.
struct StageBars {
    quiet: bool,
    current: Mutex<Option<(CrawlStage, ProgressBar)>>,
}

impl StageBars {
    fn new(quiet: bool) -> Self {
        Self {
            quiet,
            current: Mutex::new(None),
        }
    }

    fn update(&self, stage: CrawlStage, done: usize, total: usize) {
        if self.quiet {
            return;
        }
        let Ok(mut guard) = self.current.lock() else {
            return;
        };

        let same_stage = matches!(guard.as_ref(), Some((active, _)) if *active == stage);
        if !same_stage {
            // A new stage begins: close out the previous bar.
            if let Some((_, bar)) = guard.take() {
                bar.finish();
            }
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::with_template("{prefix:>12} [{bar:40}] {pos}/{len}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar.set_prefix(stage.to_string());
            *guard = Some((stage, bar));
        }

        if let Some((_, bar)) = guard.as_ref() {
            bar.set_position(done as u64);
            if done >= total {
                bar.finish();
            }
        }
    }
}

fn make_download_bar(quiet: bool, total: usize) -> Option<ProgressBar> {
    if quiet || total == 0 {
        return None;
    }
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("{prefix:>12} [{bar:40}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_prefix("download");
    Some(bar)
}
