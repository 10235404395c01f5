//! Concurrent download engine for bitstream content.
//!
//! Downloads authenticate with the session cookie header only: no cookie
//! jar, no session reuse across redirects. Redirects are followed manually,
//! one request per hop, bounded by a hop counter. Individual job failures
//! are recorded, never propagated to the batch.

mod engine;
mod error;

pub use engine::{
    DEFAULT_CONCURRENCY, DownloadEngine, DownloadJob, EngineError, JobResult, MAX_REDIRECTS,
};
pub use error::DownloadError;
