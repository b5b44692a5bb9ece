//! One complete run: recover, schedule, process, checkpoint, publish

use super::cache::LocalCache;
use super::coordinator::CheckpointCommitter;
use super::processor::UnitProcessor;
use super::sink::{new_run_id, Artifact, ResultSink, SinkSettings};
use super::worker::{PoolSettings, WorkerPool};
use crate::config::RunnerConfig;
use crate::error::{ExitStatus, Result};
use crate::manifest::{CorpusManifest, ProcessedSet};
use crate::progress::{create_batch_progress, ProgressReport};
use crate::scheduler;
use indicatif::ProgressBar;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Outcome of [`run_batch`]
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub host: String,
    pub processor: String,
    pub batch_size: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Successes for items some earlier run had already marked
    pub duplicates: usize,
    /// Batch items never claimed because the run was interrupted
    pub skipped: usize,
    /// Unprocessed items left in the manifest after this run
    pub backlog: usize,
    pub progress: ProgressReport,
    pub artifacts: Vec<Artifact>,
    /// Result files of an interrupted run published during this one
    pub recovered: Vec<Artifact>,
    pub interrupted: bool,
    pub concurrency: usize,
    /// Most cache entries on disk at once
    pub cache_peak: usize,
}

impl RunReport {
    pub fn exit_status(&self) -> ExitStatus {
        if self.interrupted {
            ExitStatus::Interrupted
        } else if self.batch_size == 0 {
            ExitStatus::NothingToDo
        } else {
            ExitStatus::Success
        }
    }
}

fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Process the next batch of the corpus
///
/// Store failures while loading, checkpointing or publishing end the run
/// with an error. Item failures only show up as failure rows and counts.
#[instrument(skip_all, fields(processor = processor.name()))]
pub async fn run_batch(
    store: Arc<dyn crate::storage::RemoteStore>,
    processor: Arc<dyn UnitProcessor>,
    config: &RunnerConfig,
    cancel: CancellationToken,
) -> Result<RunReport> {
    config.validate()?;

    let run_id = new_run_id();
    let host = host_name();
    info!(%run_id, %host, store = %store.describe(), "Starting run");

    let manifest = Arc::new(CorpusManifest::new(store.clone(), config).load().await?);
    let processed = ProcessedSet::load(store.clone(), config, manifest.clone()).await?;
    let sink = ResultSink::new(store.clone(), SinkSettings::from_config(config), run_id.as_str());
    let mut committer =
        CheckpointCommitter::new(processed, sink, config.checkpoint_every, ProgressBar::hidden());

    let recovery = committer.recover().await?;
    info!("{}", committer.progress_report());

    let batch = scheduler::next_batch(&manifest, committer.processed(), config.max_files);
    let mut report = RunReport {
        run_id,
        host,
        processor: processor.name().to_string(),
        batch_size: batch.len(),
        succeeded: 0,
        failed: 0,
        duplicates: 0,
        skipped: 0,
        backlog: 0,
        progress: committer.progress_report(),
        artifacts: Vec::new(),
        recovered: recovery.artifacts,
        interrupted: false,
        concurrency: 0,
        cache_peak: 0,
    };

    if batch.is_empty() {
        info!("Nothing to do, every manifest item is processed");
        report.interrupted = cancel.is_cancelled();
        return Ok(report);
    }

    let cache = LocalCache::new(&config.cache_dir);
    cache.clear_stale()?;
    let pool = WorkerPool::new(
        store.clone(),
        processor,
        cache.clone(),
        PoolSettings::from_config(config),
    );

    committer.set_progress(create_batch_progress(batch.len(), config.show_progress));
    let mut handle = pool.start(batch, config.concurrency, cancel.clone());
    report.concurrency = handle.concurrency();

    let consumed = committer.consume(&mut handle.reports, &cancel).await;
    handle.join().await;
    consumed?;

    report.artifacts = committer.finish().await?;
    report.interrupted = cancel.is_cancelled();
    if report.interrupted {
        warn!("Run interrupted, in-flight items were finished and checkpointed");
    }

    let tally = committer.tally();
    report.succeeded = tally.succeeded;
    report.failed = tally.failed;
    report.duplicates = tally.duplicates;
    report.skipped = report
        .batch_size
        .saturating_sub(tally.succeeded + tally.failed + tally.duplicates);
    report.backlog = scheduler::backlog(&manifest, committer.processed());
    report.progress = committer.progress_report();
    report.cache_peak = cache.peak();

    info!(
        run_id = %report.run_id,
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        backlog = report.backlog,
        "Run finished"
    );
    Ok(report)
}
