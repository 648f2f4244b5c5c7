//! Error handling for skillpack.
//!
//! This module provides:
//! - [`PackError`]: The main error enum for all skillpack operations
//! - [`ValidationError`]: Typed, caller-fixable input problems
//! - [`ErrorCode`]: Standardized error codes for machine parsing
//! - [`StructuredError`]: Serializable error with code, suggestion and context

mod codes;

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use codes::ErrorCode;

/// Main error type for skillpack operations.
#[derive(Error, Debug)]
pub enum PackError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Version {version} already exists for {skill}")]
    DuplicateVersion { skill: String, version: String },

    #[error("Path traversal rejected: {0}")]
    PathTraversal(String),

    #[error("Path escapes base directory: {}", .0.display())]
    PathEscape(PathBuf),

    #[error("Not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Rate limit exceeded for {key}; retry in {retry_after_ms} ms")]
    RateLimited { key: String, retry_after_ms: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version {version_id} is not verified (status: {status})")]
    NotVerified { version_id: String, status: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Blob storage error: {0}")]
    Storage(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Caller-fixable input problems. Never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("manifest name is required")]
    MissingName,

    #[error("manifest slug is required")]
    MissingSlug,

    #[error("invalid slug '{0}': expected 1-100 lowercase letters, digits or hyphens, not starting or ending with a hyphen")]
    InvalidSlug(String),

    #[error("manifest version is required")]
    MissingVersion,

    #[error("invalid version '{0}': expected MAJOR.MINOR.PATCH[-pre][+build]")]
    InvalidVersion(String),

    #[error("manifest description is required")]
    MissingDescription,

    #[error("manifest author is required")]
    MissingAuthor,

    #[error("manifest license is required")]
    MissingLicense,

    #[error("manifest entry is required")]
    MissingEntry,

    #[error("manifest files must be a non-empty list")]
    EmptyFiles,

    #[error("duplicate file after normalization: {0}")]
    DuplicateFile(String),

    #[error("entry '{0}' is not listed in files")]
    EntryNotInFiles(String),

    #[error("malformed manifest: {0}")]
    Malformed(String),

    #[error("{field}: {reason}")]
    Field { field: String, reason: String },
}

impl ValidationError {
    pub fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Field {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl PackError {
    /// Get the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::SerializationError,
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::DuplicateVersion { .. } => ErrorCode::DuplicateVersion,
            Self::PathTraversal(_) => ErrorCode::PathTraversal,
            Self::PathEscape(_) => ErrorCode::PathEscape,
            Self::NotAFile(_) => ErrorCode::NotAFile,
            Self::NotAuthenticated => ErrorCode::NotAuthenticated,
            Self::NotAuthorized(_) => ErrorCode::NotAuthorized,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::NotVerified { .. } => ErrorCode::NotVerified,
            Self::Config(_) => ErrorCode::ConfigInvalid,
            Self::Storage(_) => ErrorCode::StorageError,
            Self::Timeout(_) => ErrorCode::Timeout,
        }
    }

    /// Whether the failure is transient and the same call may succeed later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Storage(_)
        )
    }

    /// Get context information for this error as JSON.
    #[must_use]
    pub fn context(&self) -> Option<Value> {
        match self {
            Self::DuplicateVersion { skill, version } => {
                Some(serde_json::json!({ "skill": skill, "version": version }))
            }
            Self::RateLimited {
                key,
                retry_after_ms,
            } => Some(serde_json::json!({ "key": key, "retry_after_ms": retry_after_ms })),
            Self::NotVerified { version_id, status } => {
                Some(serde_json::json!({ "version_id": version_id, "status": status }))
            }
            Self::PathEscape(path) | Self::NotAFile(path) => {
                Some(serde_json::json!({ "path": path.display().to_string() }))
            }
            Self::PathTraversal(path) => Some(serde_json::json!({ "path": path })),
            _ => None,
        }
    }

    /// Convert this error to a structured error.
    #[must_use]
    pub fn to_structured(&self) -> StructuredError {
        StructuredError::from_pack_error(self)
    }
}

/// A structured error with machine-readable code, suggestion, and context.
///
/// Emitted on stdout in robot mode so scripts can branch on `code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// The error code (e.g., "DUPLICATE_VERSION")
    pub code: ErrorCode,

    /// The numeric error code (e.g., 202)
    pub numeric_code: u16,

    /// Human-readable error message
    pub message: String,

    /// Actionable suggestion for recovery
    pub suggestion: String,

    /// Additional context for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Whether this error is potentially recoverable by the user
    pub recoverable: bool,

    /// Whether retrying the same call later may succeed
    pub transient: bool,

    /// Error category (e.g., "pack", "registry", "config")
    pub category: String,
}

impl StructuredError {
    /// Create a new structured error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            numeric_code: code.numeric(),
            suggestion: code.suggestion().to_string(),
            context: None,
            recoverable: code.is_recoverable(),
            transient: code.is_transient(),
            category: code.category().to_string(),
            code,
            message: message.into(),
        }
    }

    /// Create a structured error from a `PackError`.
    #[must_use]
    pub fn from_pack_error(err: &PackError) -> Self {
        let mut structured = Self::new(err.code(), err.to_string());
        structured.context = err.context();
        structured
    }

    /// Add context to this error.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<&PackError> for StructuredError {
    fn from(err: &PackError) -> Self {
        Self::from_pack_error(err)
    }
}

/// Result type alias using `PackError`.
pub type Result<T> = std::result::Result<T, PackError>;
