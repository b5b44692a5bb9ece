//! `corpus-runner cleanup-processed` command implementation

use crate::config::RunnerConfig;
use crate::error::{ExitStatus, Result, RunnerError};
use crate::manifest::ProcessedSet;
use crate::storage::RemoteStore;
use colored::Colorize;
use std::sync::Arc;

/// Delete the processed manifest remotely and locally
pub async fn run(store: Arc<dyn RemoteStore>, config: &RunnerConfig, yes: bool) -> Result<ExitStatus> {
    if !yes {
        println!(
            "This deletes '{}' from {} and the local mirror; every item will be processed again.",
            config.processed_key,
            store.describe()
        );
        return Err(RunnerError::config(
            "refusing to delete the processed manifest without --yes",
        ));
    }

    if ProcessedSet::clear(store.as_ref(), config).await? {
        println!("{} Processed manifest deleted.", "✓".green());
    } else {
        println!("No processed manifest to delete.");
    }
    Ok(ExitStatus::Success)
}
