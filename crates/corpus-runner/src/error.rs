//! Error types for the corpus runner
//!
//! Every error that can end a run carries a user-facing message and maps to a
//! distinct process exit status through [`RunnerError::exit_status`].
//! Per-item failures never appear here: they are recorded as failure rows and
//! the item stays eligible for the next run.

use crate::storage::StoreError;
use corpus_common::CommonError;
use thiserror::Error;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Fatal errors raised while driving a run or an operator command
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The corpus manifest is neither in the remote store nor mirrored locally
    #[error("Manifest '{key}' not found. Run 'corpus-runner generate' to build it from the corpus listing.")]
    ManifestMissing { key: String },

    /// The remote store rejected a request or could not be reached
    #[error("Remote store error: {0}. Check the S3_* settings and that the store is reachable.")]
    Store(#[from] StoreError),

    /// A persisted manifest could not be parsed
    #[error("Invalid manifest '{key}': {reason}")]
    InvalidManifest { key: String, reason: String },

    /// An identifier was marked done that the corpus manifest does not list
    #[error("Item '{0}' is not listed in the corpus manifest")]
    NotInManifest(String),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your environment variables and command-line flags.")]
    Config(String),

    /// Local file system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// Result artifact could not be written or read
    #[error("Result file error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] CommonError),

    /// Invariant violation inside the runner itself
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RunnerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn manifest_missing(key: impl Into<String>) -> Self {
        Self::ManifestMissing { key: key.into() }
    }

    pub fn invalid_manifest(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Process exit status reported for this error
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::ManifestMissing { .. } => ExitStatus::ManifestMissing,
            Self::Store(_) => ExitStatus::StoreUnavailable,
            Self::Config(_) => ExitStatus::Config,
            Self::Common(CommonError::Parse(_)) => ExitStatus::Config,
            _ => ExitStatus::Failure,
        }
    }
}

/// Exit statuses of the `corpus-runner` binary
///
/// `2` is left to clap, which exits with it on usage errors before any of
/// this code runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    ManifestMissing,
    StoreUnavailable,
    Config,
    NothingToDo,
    Interrupted,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::ManifestMissing => 3,
            Self::StoreUnavailable => 4,
            Self::Config => 5,
            Self::NothingToDo => 10,
            Self::Interrupted => 130,
        }
    }
}
