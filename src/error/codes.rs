//! Standardized error codes for machine-parseable output.
//!
//! Error codes follow a numeric taxonomy:
//! - 1xx: Packaging errors
//! - 2xx: Registry errors
//! - 3xx: Config errors
//! - 6xx: Storage errors
//! - 8xx: Validation errors
//! - 9xx: Internal errors

use serde::{Deserialize, Serialize};

/// Standardized error codes for robot mode output.
///
/// Each variant maps to a numeric code (e.g., `PathTraversal` -> E101).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================
    // Packaging errors (1xx)
    // ========================================
    /// E101: Declared path contains a traversal segment or NUL byte
    PathTraversal,
    /// E102: Resolved path is outside the base directory
    PathEscape,
    /// E103: Declared path is not a regular file
    NotAFile,

    // ========================================
    // Registry errors (2xx)
    // ========================================
    /// E201: Caller has no resolved identity
    NotAuthenticated,
    /// E202: Version string already published for this skill
    DuplicateVersion,
    /// E203: Caller does not own the target skill
    NotAuthorized,
    /// E204: Fixed-window budget exhausted for this key
    RateLimited,
    /// E205: Version must be verified for this operation
    NotVerified,

    // ========================================
    // Config errors (3xx)
    // ========================================
    /// E302: Config file has invalid syntax or values
    ConfigInvalid,

    // ========================================
    // Storage errors (6xx)
    // ========================================
    /// E601: Blob store operation failed
    StorageError,
    /// E604: Database operation failed
    DatabaseError,
    /// E605: Serialization/deserialization failed
    SerializationError,

    // ========================================
    // Validation errors (8xx)
    // ========================================
    /// E801: Validation rules failed
    ValidationFailed,

    // ========================================
    // Internal errors (9xx)
    // ========================================
    /// E903: Operation timed out
    Timeout,
    /// E905: Generic not found (catch-all)
    NotFound,
    /// E906: IO operation failed
    IoError,
}

impl ErrorCode {
    /// Get the numeric error code (e.g., `PathTraversal` -> 101).
    #[must_use]
    pub const fn numeric(&self) -> u16 {
        match self {
            Self::PathTraversal => 101,
            Self::PathEscape => 102,
            Self::NotAFile => 103,

            Self::NotAuthenticated => 201,
            Self::DuplicateVersion => 202,
            Self::NotAuthorized => 203,
            Self::RateLimited => 204,
            Self::NotVerified => 205,

            Self::ConfigInvalid => 302,

            Self::StorageError => 601,
            Self::DatabaseError => 604,
            Self::SerializationError => 605,

            Self::ValidationFailed => 801,

            Self::Timeout => 903,
            Self::NotFound => 905,
            Self::IoError => 906,
        }
    }

    /// Get the error code as a formatted string (e.g., "E101").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("E{}", self.numeric())
    }

    /// Get the default suggestion for this error code.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::PathTraversal => "Use plain relative paths in `files`; `..` segments, leading `/` and NUL bytes are never packaged",
            Self::PathEscape => "A declared file resolves outside the skill directory. Replace symlinks with real files",
            Self::NotAFile => "List individual files in `files`, not directories",

            Self::NotAuthenticated => "Pass --actor <id> or set SKILLPACK_ACTOR",
            Self::DuplicateVersion => "Published versions are immutable. Bump the version in the manifest and publish again",
            Self::NotAuthorized => "Only the skill owner can perform this operation",
            Self::RateLimited => "Wait for the current rate-limit window to pass, then retry",
            Self::NotVerified => "Only verified versions can be made default. Run `skillpack registry reverify` first",

            Self::ConfigInvalid => "Check TOML syntax in the config file and SKILLPACK_* environment variables",

            Self::StorageError => "Check the blob store location and retry; pending versions are retried by `registry verify-pending`",
            Self::DatabaseError => "Check that the registry database is writable and not corrupted",
            Self::SerializationError => "The data format may be corrupted. Check input data for validity",

            Self::ValidationFailed => "Fix the reported field and retry",

            Self::Timeout => "Operation timed out. Try again or increase blob_store.timeout_ms",
            Self::NotFound => "The requested resource was not found. Check the identifier",
            Self::IoError => "File operation failed. Check path exists and permissions are correct",
        }
    }

    /// Check if this error is potentially recoverable by the user.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::PathTraversal
            | Self::PathEscape
            | Self::NotAFile
            | Self::NotAuthenticated
            | Self::DuplicateVersion
            | Self::NotAuthorized
            | Self::RateLimited
            | Self::NotVerified
            | Self::ConfigInvalid
            | Self::StorageError
            | Self::ValidationFailed
            | Self::Timeout
            | Self::NotFound
            | Self::IoError => true,

            Self::DatabaseError | Self::SerializationError => false,
        }
    }

    /// Whether retrying the identical call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::StorageError | Self::Timeout)
    }

    /// Get the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self.numeric() / 100 {
            1 => "pack",
            2 => "registry",
            3 => "config",
            6 => "storage",
            8 => "validation",
            9 => "internal",
            _ => "unknown",
        }
    }

    /// Iterate over all error codes.
    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::PathTraversal,
            Self::PathEscape,
            Self::NotAFile,
            Self::NotAuthenticated,
            Self::DuplicateVersion,
            Self::NotAuthorized,
            Self::RateLimited,
            Self::NotVerified,
            Self::ConfigInvalid,
            Self::StorageError,
            Self::DatabaseError,
            Self::SerializationError,
            Self::ValidationFailed,
            Self::Timeout,
            Self::NotFound,
            Self::IoError,
        ]
        .into_iter()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code_string())
    }
}
