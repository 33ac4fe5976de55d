//! Error types for bundling, remote fetching and payload validation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a bundling or traversal call.
///
/// Unresolvable references are never reported through this type; they end
/// up in the `missing` list of the result instead.
#[derive(Debug, Error)]
pub enum BundleError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("root document '{file}' is not part of the collection")]
    UnknownRoot { file: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    // Parse errors (exit code 2)
    #[error("cannot parse {file}: {message}")]
    Parse { file: String, message: String },

    #[error("unsupported document version: {message}")]
    UnsupportedVersion { message: String },
}

impl BundleError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            BundleError::FileNotFound { .. }
            | BundleError::ReadError { .. }
            | BundleError::UnknownRoot { .. }
            | BundleError::Fetch(_) => 3,
            _ => 2,
        }
    }
}

/// Failure to retrieve a remote document.
///
/// The remote resolver turns every variant into a missing reference.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("failed to fetch {url}: {message}")]
    Transport { url: String, message: String },

    #[error("no document registered for {url}")]
    NotFound { url: String },
}

/// Errors during payload validation.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("no schema found at {target}")]
    SchemaNotFound { target: String },

    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    #[error("validation failed with {} error(s)", errors.len())]
    Invalid { errors: Vec<SchemaError> },
}

/// Single validation error with path context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchemaError {
    /// JSON Pointer (RFC 6901) to the invalid field.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl ValidateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::Bundle(e) => e.exit_code(),
            ValidateError::Invalid { .. } => 1,
            _ => 2,
        }
    }
}
