//! Semantic column types shared by configuration and writers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Semantic type of a snapshot column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Int32,
    Int64,
    Double,
    Bool,
    /// UTC instant, microsecond precision.
    Timestamp,
}

impl ColumnType {
    /// All supported column types, in declaration order.
    pub const ALL: [ColumnType; 6] = [
        ColumnType::Text,
        ColumnType::Int32,
        ColumnType::Int64,
        ColumnType::Double,
        ColumnType::Bool,
        ColumnType::Timestamp,
    ];

    /// Stable lowercase name, as used in config files and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Double => "double",
            Self::Bool => "bool",
            Self::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "string" | "utf8" => Ok(Self::Text),
            "int32" | "int" => Ok(Self::Int32),
            "int64" | "long" => Ok(Self::Int64),
            "double" | "float64" => Ok(Self::Double),
            "bool" | "boolean" => Ok(Self::Bool),
            "timestamp" => Ok(Self::Timestamp),
            other => Err(format!("unknown column type: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse_agree() {
        for ty in ColumnType::ALL {
            assert_eq!(ty.as_str().parse::<ColumnType>(), Ok(ty));
        }
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("String".parse::<ColumnType>(), Ok(ColumnType::Text));
        assert_eq!("boolean".parse::<ColumnType>(), Ok(ColumnType::Bool));
        assert!("decimal".parse::<ColumnType>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&ColumnType::Int64).unwrap();
        assert_eq!(json, "\"int64\"");
    }
}
