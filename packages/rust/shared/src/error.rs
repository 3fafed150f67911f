//! Error types for redline.
//!
//! Library crates use [`RedlineError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all redline operations.
#[derive(Debug, thiserror::Error)]
pub enum RedlineError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The document root is missing or unreadable.
    #[error("storage unavailable at {path:?}: {reason}")]
    StorageUnavailable { path: PathBuf, reason: String },

    /// A source document disappeared between listing and conversion.
    #[error("source not found: {path:?}")]
    SourceNotFound { path: PathBuf },

    /// The source document could not be parsed or laid out.
    #[error("conversion failed for {path:?}: {reason}")]
    ConversionFailed { path: PathBuf, reason: String },

    /// A single stage attempt failed. `message` is the raw error text
    /// reported by the executor.
    #[error("stage {stage} failed: {message}")]
    Stage { stage: String, message: String },

    /// A stage kept failing transiently until its attempt budget ran out.
    #[error("stage {stage} failed after {attempts} attempts")]
    StageExhausted { stage: String, attempts: u32 },

    /// Writing a run artifact failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Stage executor bridge error (spawn, protocol, or transport).
    #[error("bridge error: {0}")]
    Bridge(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (missing prerequisite, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RedlineError>;

impl RedlineError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a conversion failure for the given source path.
    pub fn conversion(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConversionFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a failed-attempt error for a stage.
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }
}
