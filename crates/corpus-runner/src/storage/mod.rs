//! Remote object store adapter
//!
//! The runner only needs five operations from the store, so everything else
//! (manifests, checkpoints, result upload, downloads) talks to a
//! [`RemoteStore`] trait object. [`S3Store`] backs it with `aws-sdk-s3` for
//! MinIO or AWS; [`MemoryStore`] keeps objects in process for tests and local
//! dry runs.

use async_trait::async_trait;
use thiserror::Error;

pub mod config;
pub mod memory;
pub mod s3;

pub use config::StorageConfig;
pub use memory::MemoryStore;
pub use s3::S3Store;

/// Errors surfaced by a [`RemoteStore`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object '{0}' does not exist")]
    NotFound(String),

    #[error("{operation} '{key}' failed: {message}")]
    Unavailable {
        operation: &'static str,
        key: String,
        message: String,
    },
}

impl StoreError {
    pub fn unavailable(
        operation: &'static str,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Unavailable {
            operation,
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Flat key/value object store
///
/// Keys are `/`-separated paths relative to the bucket root. Reads after
/// writes from the same process must be immediately consistent.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every key starting with `prefix`, in no particular order
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Whole object body, or [`StoreError::NotFound`]
    async fn get(&self, key: &str) -> StoreResult<Vec<u8>>;

    /// Create or overwrite
    async fn put(&self, key: &str, data: Vec<u8>) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove an object; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Short location string for log lines and summaries, e.g. `s3://bucket`
    fn describe(&self) -> String;
}
