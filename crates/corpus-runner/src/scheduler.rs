//! Batch selection
//!
//! A batch is the first `max_files` items of the manifest that the processed
//! set does not hold, in manifest order. Nothing here is persisted: the next
//! run recomputes its batch from the two manifests.

use crate::manifest::{Manifest, ProcessedSet, WorkItem};

/// Next slice of unprocessed items; `max_files == 0` means no bound
pub fn next_batch(manifest: &Manifest, processed: &ProcessedSet, max_files: usize) -> Vec<WorkItem> {
    let limit = if max_files == 0 { usize::MAX } else { max_files };
    manifest
        .iter()
        .filter(|item| !processed.contains(item))
        .take(limit)
        .cloned()
        .collect()
}

/// Number of manifest items not yet processed
pub fn backlog(manifest: &Manifest, processed: &ProcessedSet) -> usize {
    manifest
        .iter()
        .filter(|item| !processed.contains(item))
        .count()
}
