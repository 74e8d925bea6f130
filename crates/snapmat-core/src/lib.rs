//! Snapshot materializer core.
//!
//! This crate provides:
//! - The request coalescing scheduler (at most one running, one queued rebuild)
//! - Row sources feeding a rebuild
//! - The rebuild job routing rows into a write strategy
//! - Logging setup and exit codes for the `snapmat` binary

pub mod exit_codes;
pub mod job;
pub mod logging;
pub mod scheduler;
pub mod source;

pub use exit_codes::ExitCode;
pub use job::{RunSummary, SnapshotJob};
pub use scheduler::{Rebuild, RequestOutcome, Scheduler, SchedulerStats, SchedulerStatus};
pub use source::{JsonLinesFactory, JsonLinesSource, RowSource, SourceFactory, VecSource};
