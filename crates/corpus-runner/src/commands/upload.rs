//! `corpus-runner upload` command implementation
//!
//! Operator repair: push the local manifest mirrors back to the store, e.g.
//! after `generate --skip-upload` or when a remote object was lost.

use crate::config::RunnerConfig;
use crate::error::{ExitStatus, Result, RunnerError};
use crate::manifest::{CorpusManifest, ProcessedSet};
use crate::storage::RemoteStore;
use colored::Colorize;
use std::sync::Arc;

/// Entries uploaded per mirror, `None` for a mirror that does not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uploaded {
    pub manifest: Option<usize>,
    pub processed: Option<usize>,
}

pub async fn upload_mirrors(store: Arc<dyn RemoteStore>, config: &RunnerConfig) -> Result<Uploaded> {
    let manifest = CorpusManifest::new(store.clone(), config)
        .upload_mirror()
        .await?;
    let processed = ProcessedSet::upload_mirror(store.as_ref(), config).await?;
    Ok(Uploaded {
        manifest,
        processed,
    })
}

pub async fn run(store: Arc<dyn RemoteStore>, config: &RunnerConfig) -> Result<ExitStatus> {
    let uploaded = upload_mirrors(store, config).await?;

    let describe = |name: &str, key: &str, entries: Option<usize>| match entries {
        Some(n) => println!("  {} {} -> {} ({} entries)", "✓".green(), name, key, n),
        None => println!("  {} {}: no local mirror", "-".yellow(), name),
    };
    println!("{}", "Uploaded mirrors:".cyan().bold());
    describe("corpus manifest", &config.manifest_key, uploaded.manifest);
    describe("processed manifest", &config.processed_key, uploaded.processed);

    if uploaded.manifest.is_none() && uploaded.processed.is_none() {
        return Err(RunnerError::manifest_missing(
            config.manifest_mirror().display().to_string(),
        ));
    }
    Ok(ExitStatus::Success)
}
