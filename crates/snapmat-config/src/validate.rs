//! Semantic validation of materializer configuration.

use std::collections::HashSet;

use crate::materializer::{MaterializerConfig, WriteStrategyKind};
use crate::CONFIG_SCHEMA_VERSION;

/// A single validation problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Outcome of validating a config: every problem, not just the first.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// One-line summary joining all problems.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl MaterializerConfig {
    /// Validate semantic constraints that serde cannot express.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.schema_version.split('.').next() != CONFIG_SCHEMA_VERSION.split('.').next() {
            result.push(
                "schema_version",
                format!(
                    "unsupported version {} (supported: {})",
                    self.schema_version, CONFIG_SCHEMA_VERSION
                ),
            );
        }

        if self.output_path.as_os_str().is_empty() {
            result.push("output_path", "must not be empty");
        } else if self.output_path.file_name().is_none() {
            result.push("output_path", "must name a file");
        }

        if self.row_group_size == 0 {
            result.push("row_group_size", "must be at least 1");
        }

        if self.progress_every == 0 {
            result.push("progress_every", "must be at least 1");
        }

        if self.strategy == WriteStrategyKind::Concurrent && self.producers == 0 {
            result.push("producers", "concurrent strategy needs at least 1 producer");
        }

        if let Some(columns) = &self.schema {
            if columns.is_empty() {
                result.push("schema", "explicit schema must declare at least one column");
            }
            let mut seen = HashSet::new();
            for (idx, column) in columns.iter().enumerate() {
                if column.name.trim().is_empty() {
                    result.push(format!("schema[{idx}].name"), "must not be empty");
                } else if !seen.insert(column.name.as_str()) {
                    result.push(
                        format!("schema[{idx}].name"),
                        format!("duplicate column '{}'", column.name),
                    );
                }
            }
        }

        result
    }
}
