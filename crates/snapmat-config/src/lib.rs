//! Snapshot materializer configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for the materializer config file
//! - Config resolution (CLI → env → XDG → defaults)
//! - Semantic validation that reports every problem at once

pub mod materializer;
pub mod resolve;
pub mod validate;

pub use materializer::{
    ColumnSpec, CompressionKind, ConfigError, MaterializerConfig, WriteStrategyKind,
};
pub use resolve::{resolve_config, ConfigPaths, ConfigSource, ResolvedConfig};
pub use validate::{ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// Default row-group size for buffered writes.
pub const DEFAULT_ROW_GROUP_SIZE: usize = 1000;

/// Default number of rows between progress log lines.
pub const DEFAULT_PROGRESS_EVERY: u64 = 50_000;
