//! Pluggable per-item processing step
//!
//! Implement this trait for any transformation of one downloaded document.
//! The pool calls it once per item with the local path of the item's
//! descriptor; the sibling inputs sit in the same directory.

use crate::manifest::WorkItem;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Why a processor gave up on an item
///
/// These never end a run: the item gets a failure row and stays eligible.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("processing task failed: {0}")]
    Task(String),
}

impl ProcessError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Transformation applied to each work item
#[async_trait]
pub trait UnitProcessor: Send + Sync {
    /// Short name used in logs and the run summary
    fn name(&self) -> &str;

    /// Process one item whose inputs were downloaded next to `descriptor`
    ///
    /// The returned value is stored as the JSON payload of the item's result
    /// row. CPU-heavy implementations should move their work onto
    /// `tokio::task::spawn_blocking`.
    async fn process(
        &self,
        item: &WorkItem,
        descriptor: &Path,
    ) -> Result<serde_json::Value, ProcessError>;
}
