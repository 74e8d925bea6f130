//! Exit codes for the `snapmat` CLI.
//!
//! Exit codes communicate the outcome without requiring output parsing.

/// Exit codes for snapmat operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Rebuild completed (or nothing to do)
    Success = 0,

    /// Rebuild ran and failed
    RunFailed = 1,

    /// Configuration could not be resolved or is invalid
    ConfigError = 10,

    /// Rebuild did not finish within the wait timeout
    Timeout = 12,

    /// Internal/unknown error
    InternalError = 99,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }

    /// Exit code for an error surfaced before or outside a rebuild.
    pub fn for_error(err: &snapmat_common::Error) -> Self {
        match err {
            snapmat_common::Error::Config(_) => ExitCode::ConfigError,
            snapmat_common::Error::Io(_) | snapmat_common::Error::Json(_) => {
                ExitCode::InternalError
            }
            _ => ExitCode::RunFailed,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}
