//! Materializer configuration types.

use serde::{Deserialize, Serialize};
use snapmat_common::ColumnType;
use std::path::{Path, PathBuf};

use crate::{CONFIG_SCHEMA_VERSION, DEFAULT_PROGRESS_EVERY, DEFAULT_ROW_GROUP_SIZE};

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("TOML parse error in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unsupported config file extension: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for snapmat_common::Error {
    fn from(err: ConfigError) -> Self {
        snapmat_common::Error::Config(err.to_string())
    }
}

/// Which writer strategy a rebuild routes rows into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStrategyKind {
    /// Single-threaded, bounded-memory streaming writer.
    Buffered,
    /// Many producer threads, one terminal write pass.
    Concurrent,
    /// Each source batch appends its own row group to a shared file.
    Slice,
}

impl std::fmt::Display for WriteStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteStrategyKind::Buffered => write!(f, "buffered"),
            WriteStrategyKind::Concurrent => write!(f, "concurrent"),
            WriteStrategyKind::Slice => write!(f, "slice"),
        }
    }
}

/// Per-row-group compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionKind {
    None,
    Snappy,
    Zstd,
}

/// One explicitly declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Complete materializer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterializerConfig {
    pub schema_version: String,

    /// Canonical snapshot path.
    pub output_path: PathBuf,

    pub strategy: WriteStrategyKind,

    /// Producer threads for the concurrent strategy.
    pub producers: usize,

    /// Rows per row group (buffered) and per source batch (all strategies).
    pub row_group_size: usize,

    pub compression: CompressionKind,

    /// Emit a progress line every this many rows.
    pub progress_every: u64,

    /// Append `_row_hash` / `_is_complete` columns to the snapshot.
    pub derive_columns: bool,

    /// Explicit schema. When absent the schema is inferred from the first batch.
    pub schema: Option<Vec<ColumnSpec>>,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            output_path: default_output_dir().join("snapshot.parquet"),
            strategy: WriteStrategyKind::Buffered,
            producers: 4,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            compression: CompressionKind::Zstd,
            progress_every: DEFAULT_PROGRESS_EVERY,
            derive_columns: true,
            schema: None,
        }
    }
}

impl MaterializerConfig {
    /// Parse a config from JSON text.
    pub fn from_json_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Json {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Toml {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load from a `.json` or `.toml` file, then validate.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text, path)?,
            Some("toml") => Self::from_toml_str(&text, path)?,
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };

        let result = config.validate();
        if !result.is_valid() {
            return Err(ConfigError::Invalid(result.summary()));
        }
        Ok(config)
    }
}

/// Default directory for snapshot output.
pub fn default_output_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("snapmat")
}
