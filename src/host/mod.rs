//! Stand-ins for the parts of the host platform that consume the
//! configuration: the refresh scheduler, the pre-aggregation build queue,
//! the query cache partitioning and the per-query hook pipeline.

pub mod cache;
pub mod queue;
pub mod refresh;
pub mod session;

pub use cache::CacheKey;
pub use queue::{BuildJob, BuildOutcome, PreAggregationBuilder, PreAggregationQueue};
pub use refresh::{RefreshScheduler, RefreshTarget};
pub use session::{HostSession, PreparedQuery};

use crate::hooks::HookError;
use crate::sql_parser::CompileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("Failed to fingerprint query: {0}")]
    Fingerprint(#[from] serde_json::Error),
    #[error("Concurrency must be at least 1")]
    InvalidConcurrency,
    #[error("Build queue closed")]
    QueueClosed,
    #[error("Pre-aggregation build failed: {0}")]
    Build(String),
    #[error("Refresh failed: {0}")]
    Refresh(String),
}
