use crate::manifest::WorkItem;
use crate::pipeline::{ProcessError, UnitProcessor};
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;

/// Records the descriptor size and nothing else
///
/// Exercises download, checkpointing and upload end to end without paying
/// for a real transformation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunProcessor;

#[async_trait]
impl UnitProcessor for DryRunProcessor {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn process(
        &self,
        _item: &WorkItem,
        descriptor: &Path,
    ) -> Result<serde_json::Value, ProcessError> {
        let bytes = tokio::fs::metadata(descriptor).await?.len();
        Ok(json!({ "dry_run": true, "bytes": bytes }))
    }
}
