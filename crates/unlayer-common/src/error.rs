//! Unified error types for the unlayer workspace.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum UnlayerError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The archive or its manifest does not have the expected structure.
    #[error("malformed image archive: {message}")]
    Format {
        /// Description of the structural problem.
        message: String,
    },

    /// An output path or symlink target resolves outside the destination root.
    #[error("path {path} escapes destination root {root}")]
    PathEscape {
        /// Offending path after normalization.
        path: PathBuf,
        /// Destination root the path had to stay under.
        root: PathBuf,
    },

    /// A content-addressed layer does not match its digest.
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Expected hash value.
        expected: String,
        /// Actual computed hash value.
        actual: String,
    },

    /// An external command exited unsuccessfully.
    #[error("`{program} {}` failed with {status}", args.join(" "))]
    Process {
        /// Program that was invoked.
        program: String,
        /// Arguments passed to the program.
        args: Vec<String>,
        /// Exit status description.
        status: String,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl UnlayerError {
    /// Builds an [`UnlayerError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds an [`UnlayerError::Format`] from a message.
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, UnlayerError>;
