//! `corpus-runner generate` command implementation

use crate::config::RunnerConfig;
use crate::error::{ExitStatus, Result};
use crate::manifest::CorpusManifest;
use crate::storage::RemoteStore;
use colored::Colorize;
use std::sync::Arc;

/// Build (or fetch) the corpus manifest
pub async fn run(
    store: Arc<dyn RemoteStore>,
    config: &RunnerConfig,
    force_refresh: bool,
    skip_upload: bool,
) -> Result<ExitStatus> {
    let corpus = CorpusManifest::new(store.clone(), config);
    let manifest = corpus.generate(force_refresh, skip_upload).await?;

    println!("{}", "Corpus manifest".cyan().bold());
    println!("  Entries: {}", manifest.len());
    println!("  Mirror:  {}", corpus.mirror_path().display());
    if skip_upload {
        println!("  Remote:  {}", "not uploaded (--skip-upload)".yellow());
    } else {
        println!("  Remote:  {}/{}", store.describe(), corpus.key());
    }

    Ok(ExitStatus::Success)
}
