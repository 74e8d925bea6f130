//! Snapshot request and run identity types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag logged when a queued request is promoted to an active run.
pub const QUEUED_REQUEST_TAG: &str = "queued-request";

/// A caller's request to refresh a snapshot.
///
/// Ephemeral: created by the trigger, consumed by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    /// Who or what asked for the refresh (e.g. "nightly", "manual").
    pub source_tag: String,
    /// When the request was made.
    pub requested_at: DateTime<Utc>,
}

impl SnapshotRequest {
    /// Create a request stamped with the current time.
    pub fn new(source_tag: impl Into<String>) -> Self {
        Self {
            source_tag: source_tag.into(),
            requested_at: Utc::now(),
        }
    }
}

impl fmt::Display for SnapshotRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.source_tag, self.requested_at.to_rfc3339())
    }
}

/// Identifier of one rebuild run.
///
/// Format: `run-<YYYYmmddHHMMSS>-<8 hex chars>`. Also used to name
/// temporary files so concurrent leftovers never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new run ID.
    pub fn new() -> Self {
        let now = Utc::now();
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        RunId(format!("run-{}-{}", now.format("%Y%m%d%H%M%S"), &uuid[..8]))
    }

    /// Parse and validate a RunId string.
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix("run-")?;
        let (stamp, suffix) = rest.split_once('-')?;
        if stamp.len() == 14
            && stamp.chars().all(|c| c.is_ascii_digit())
            && suffix.len() == 8
            && suffix.chars().all(|c| c.is_ascii_hexdigit())
        {
            Some(RunId(s.to_string()))
        } else {
            None
        }
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
