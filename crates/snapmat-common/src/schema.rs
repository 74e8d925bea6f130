//! Snapshot file format versioning.
//!
//! Every snapshot carries [`FORMAT_VERSION`] in its key-value metadata.
//! Appending to an existing file is only allowed when that stamp is present
//! and names the same major version.

use thiserror::Error;

/// Format version stamped into every snapshot file's key-value metadata.
///
/// MAJOR changes the column type mapping or the derived column layout;
/// MINOR adds metadata keys; PATCH is for fixes only.
pub const FORMAT_VERSION: &str = "1.0.0";

/// Major component of [`FORMAT_VERSION`].
pub const FORMAT_MAJOR: u32 = 1;

/// Metadata key under which [`FORMAT_VERSION`] is stored.
pub const FORMAT_VERSION_KEY: &str = "snapmat.format_version";

/// Why a file's format stamp rules out appending to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatVersionError {
    #[error("no {FORMAT_VERSION_KEY} stamp")]
    Missing,

    #[error("unreadable format version '{0}'")]
    Malformed(String),

    #[error("format version {found} (major {major})")]
    OtherMajor { found: String, major: u32 },
}

/// Check the format stamp of an existing snapshot before appending to it.
///
/// `found` is the value stored under [`FORMAT_VERSION_KEY`], if any. It
/// must be a full `MAJOR.MINOR.PATCH` triple with major [`FORMAT_MAJOR`].
pub fn check_appendable(found: Option<&str>) -> Result<(), FormatVersionError> {
    let found = found.ok_or(FormatVersionError::Missing)?;
    let parts: Vec<u32> = found
        .split('.')
        .map(|part| part.parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|_| FormatVersionError::Malformed(found.to_string()))?;
    match parts.as_slice() {
        [major, _, _] if *major == FORMAT_MAJOR => Ok(()),
        [major, _, _] => Err(FormatVersionError::OtherMajor {
            found: found.to_string(),
            major: *major,
        }),
        _ => Err(FormatVersionError::Malformed(found.to_string())),
    }
}
