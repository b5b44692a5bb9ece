//! `corpus-runner report` command implementation

use crate::config::RunnerConfig;
use crate::error::{ExitStatus, Result};
use crate::manifest::{CorpusManifest, ManifestReport, ProcessedSet};
use crate::progress::ProgressReport;
use crate::storage::RemoteStore;
use colored::Colorize;
use std::sync::Arc;

/// Manifest existence and corpus progress
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusStatus {
    pub manifest: ManifestReport,
    /// `None` when there is no manifest to measure against
    pub progress: Option<ProgressReport>,
}

/// Status of the corpus, read from the store alone
///
/// Local mirrors are neither read nor written.
pub async fn status(store: Arc<dyn RemoteStore>, config: &RunnerConfig) -> Result<CorpusStatus> {
    let corpus = CorpusManifest::new(store.clone(), config);
    let manifest = corpus.fetch().await?;

    let progress = match &manifest {
        Some(manifest) => {
            let processed = ProcessedSet::count_done(store.as_ref(), config, manifest).await?;
            Some(ProgressReport::new(manifest.len(), processed))
        }
        None => None,
    };

    Ok(CorpusStatus {
        manifest: ManifestReport {
            key: corpus.key().to_string(),
            exists: manifest.is_some(),
            entries: manifest.as_ref().map_or(0, |m| m.len()),
        },
        progress,
    })
}

pub async fn run(store: Arc<dyn RemoteStore>, config: &RunnerConfig) -> Result<ExitStatus> {
    let location = store.describe();
    let status = status(store, config).await?;

    println!("{}", "Corpus status:".cyan().bold());
    println!("  Store:    {}", location);
    println!("  Manifest: {}", status.manifest.key);

    let Some(progress) = status.progress else {
        println!("  {}", "Manifest not found.".yellow());
        println!("  Run 'corpus-runner generate' to build it.");
        return Ok(ExitStatus::ManifestMissing);
    };

    println!("  Entries:  {}", status.manifest.entries);
    println!("  Processed: {}", progress.processed);
    println!("  Remaining: {}", progress.remaining());
    println!();
    println!("{}", progress.to_string().green());

    Ok(ExitStatus::Success)
}
