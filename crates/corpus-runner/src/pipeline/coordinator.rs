//! Checkpoint committer
//!
//! The single consumer of worker reports. It owns the processed set and the
//! result sink, so the order for every success is fixed: the row is synced
//! to the artifact, then the item is marked done, then (every
//! `checkpoint_every` successes) the processed set is flushed. Result files
//! are only uploaded after a flush, so a crash in between leaves a local file
//! the next run recovers rather than an uploaded success that is not marked.

use super::sink::{Artifact, ResultSink};
use super::types::ItemReport;
use crate::error::{Result, RunnerError};
use crate::manifest::ProcessedSet;
use crate::progress::ProgressReport;
use indicatif::ProgressBar;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Counts for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub succeeded: usize,
    pub failed: usize,
    /// Successes for items that were already marked done
    pub duplicates: usize,
    pub flushes: usize,
}

/// What recovery of leftover result files did
#[derive(Debug, Clone, Default)]
pub struct Recovery {
    pub artifacts: Vec<Artifact>,
    /// Items newly marked done from recovered rows
    pub marked: usize,
}

pub struct CheckpointCommitter {
    processed: ProcessedSet,
    sink: ResultSink,
    checkpoint_every: usize,
    since_flush: usize,
    tally: Tally,
    progress: ProgressBar,
}

impl CheckpointCommitter {
    pub fn new(
        processed: ProcessedSet,
        sink: ResultSink,
        checkpoint_every: usize,
        progress: ProgressBar,
    ) -> Self {
        Self {
            processed,
            sink,
            checkpoint_every: checkpoint_every.max(1),
            since_flush: 0,
            tally: Tally::default(),
            progress,
        }
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    pub fn sink(&self) -> &ResultSink {
        &self.sink
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }

    pub fn set_progress(&mut self, progress: ProgressBar) {
        self.progress = progress;
    }

    pub fn progress_report(&self) -> ProgressReport {
        ProgressReport::new(self.processed.manifest().len(), self.processed.len())
    }

    /// Mark the successes of leftover result files, flush, then upload them
    #[instrument(skip(self))]
    pub async fn recover(&mut self) -> Result<Recovery> {
        let pending = self.sink.recover_pending()?;
        if pending.is_empty() {
            return Ok(Recovery::default());
        }

        let mut marked = 0;
        for leftover in &pending {
            for item in &leftover.succeeded {
                match self.processed.mark_done(item) {
                    Ok(true) => marked += 1,
                    Ok(false) => {}
                    Err(RunnerError::NotInManifest(id)) => {
                        warn!(item = %id, file = %leftover.path.display(), "Recovered row is not in the manifest")
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if self.processed.pending_flush() > 0 {
            self.processed.flush().await?;
            self.tally.flushes += 1;
        }

        let mut artifacts = Vec::with_capacity(pending.len());
        for leftover in &pending {
            artifacts.push(self.sink.publish_recovered(leftover).await?);
        }

        info!(files = artifacts.len(), marked, "Recovered results of an interrupted run");
        Ok(Recovery { artifacts, marked })
    }

    /// Commit reports until every worker is done
    ///
    /// A failed write or flush cancels the pool and is returned; the remote
    /// processed set stays as last flushed and the open result file stays on
    /// disk for the next run.
    pub async fn consume(
        &mut self,
        reports: &mut mpsc::Receiver<ItemReport>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        while let Some(report) = reports.recv().await {
            if let Err(e) = self.commit(report).await {
                error!(error = %e, "Checkpoint failed, stopping the run");
                cancel.cancel();
                return Err(e);
            }
        }
        Ok(())
    }

    async fn commit(&mut self, report: ItemReport) -> Result<()> {
        let item = report.item.clone();
        let success = report.is_success();
        let record = report.into_record();

        self.sink.append(&record)?;

        if success {
            if self.processed.mark_done(&item)? {
                self.tally.succeeded += 1;
                self.since_flush += 1;
            } else {
                warn!(item = %item, "Item was already marked done");
                self.tally.duplicates += 1;
            }
            if self.since_flush >= self.checkpoint_every {
                self.checkpoint().await?;
            }
        } else {
            self.tally.failed += 1;
        }
        self.progress.inc(1);

        if self.sink.has_ready() {
            self.checkpoint().await?;
            self.sink.upload_ready().await?;
        }
        Ok(())
    }

    /// Flush pending marks, if any
    pub async fn checkpoint(&mut self) -> Result<()> {
        if self.processed.pending_flush() == 0 {
            return Ok(());
        }
        let entries = self.processed.flush().await?;
        self.since_flush = 0;
        self.tally.flushes += 1;
        debug!(entries, "Checkpoint written");
        info!("{}", self.progress_report());
        Ok(())
    }

    /// Final flush, then upload and retain the result files
    #[instrument(skip(self))]
    pub async fn finish(&mut self) -> Result<Vec<Artifact>> {
        self.checkpoint().await?;
        self.progress.finish_and_clear();
        self.sink.finalize().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;
    use crate::manifest::{Manifest, WorkItem};
    use crate::pipeline::sink::SinkSettings;
    use crate::pipeline::types::{Outcome, ResultRecord};
    use crate::storage::MemoryStore;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    async fn committer(
        store: &MemoryStore,
        root: &Path,
        checkpoint_every: usize,
    ) -> CheckpointCommitter {
        let config = RunnerConfig::default().with_local_root(root);
        let manifest = Arc::new(Manifest::new(
            ["A", "B", "C", "D"].into_iter().map(WorkItem::from),
        ));
        let processed = ProcessedSet::load(Arc::new(store.clone()), &config, manifest)
            .await
            .unwrap();
        let sink = ResultSink::new(
            Arc::new(store.clone()),
            SinkSettings::from_config(&config),
            "run",
        );
        CheckpointCommitter::new(processed, sink, checkpoint_every, ProgressBar::hidden())
    }

    fn ok(id: &str) -> ItemReport {
        let item = WorkItem::from(id);
        ItemReport {
            outcome: Outcome::Success(ResultRecord::success(
                &item,
                &serde_json::json!({}),
                Duration::ZERO,
            )),
            item,
            duration: Duration::ZERO,
            worker: 0,
        }
    }

    fn failed(id: &str) -> ItemReport {
        ItemReport {
            item: WorkItem::from(id),
            outcome: Outcome::Failure("boom".to_string()),
            duration: Duration::ZERO,
            worker: 0,
        }
    }

    async fn feed(committer: &mut CheckpointCommitter, reports: Vec<ItemReport>) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(reports.len().max(1));
        for report in reports {
            tx.send(report).await.unwrap();
        }
        drop(tx);
        committer.consume(&mut rx, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_flush_every_success() {
        let root = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let mut c = committer(&store, root.path(), 1).await;

        feed(&mut c, vec![ok("A"), failed("B"), ok("C")]).await.unwrap();
        assert_eq!(store.text("processed.manifest.txt").unwrap(), "A\nC\n");
        assert_eq!(c.tally().flushes, 2);

        let artifacts = c.finish().await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].rows, 3);
        assert_eq!(c.tally().succeeded, 2);
        assert_eq!(c.tally().failed, 1);
    }

    #[tokio::test]
    async fn test_checkpoint_cadence() {
        let root = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let mut c = committer(&store, root.path(), 3).await;

        feed(&mut c, vec![ok("A"), ok("B")]).await.unwrap();
        assert!(store.object("processed.manifest.txt").is_none());
        assert_eq!(c.processed().pending_flush(), 2);

        c.finish().await.unwrap();
        assert_eq!(store.text("processed.manifest.txt").unwrap(), "A\nB\n");
    }

    #[tokio::test]
    async fn test_failed_flush_cancels_and_keeps_file() {
        let root = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.fail_writes_to("processed.manifest.txt");
        let mut c = committer(&store, root.path(), 1).await;

        let (tx, mut rx) = mpsc::channel(4);
        tx.send(ok("A")).await.unwrap();
        tx.send(ok("B")).await.unwrap();
        drop(tx);
        let cancel = CancellationToken::new();

        let err = c.consume(&mut rx, &cancel).await.unwrap_err();
        assert!(matches!(err, RunnerError::Store(_)));
        assert!(cancel.is_cancelled());
        assert!(root.path().join("output/run.csv").exists());
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_recover_marks_then_uploads() {
        let root = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        {
            let config = RunnerConfig::default().with_local_root(root.path());
            let mut crashed = ResultSink::new(
                Arc::new(store.clone()),
                SinkSettings::from_config(&config),
                "crashed",
            );
            crashed.append(&ok("A").into_record()).unwrap();
            crashed.append(&failed("B").into_record()).unwrap();
            crashed.append(&ok("ZZ").into_record()).unwrap();
        }

        let mut c = committer(&store, root.path(), 1).await;
        let recovery = c.recover().await.unwrap();

        assert_eq!(recovery.marked, 1);
        assert_eq!(recovery.artifacts.len(), 1);
        assert_eq!(store.text("processed.manifest.txt").unwrap(), "A\n");
        assert!(store.object("output/crashed.csv").is_some());
        assert!(c.processed().contains(&"A".into()));
    }

    #[tokio::test]
    async fn test_rotated_parts_upload_after_flush() {
        let root = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let config = RunnerConfig::default().with_local_root(root.path());
        let manifest = Arc::new(Manifest::new(
            ["A", "B", "C"].into_iter().map(WorkItem::from),
        ));
        let processed = ProcessedSet::load(Arc::new(store.clone()), &config, manifest)
            .await
            .unwrap();
        let mut settings = SinkSettings::from_config(&config);
        settings.upload_every = Some(2);
        let sink = ResultSink::new(Arc::new(store.clone()), settings, "rot");
        let mut c = CheckpointCommitter::new(processed, sink, 10, ProgressBar::hidden());

        feed(&mut c, vec![ok("A"), ok("B"), ok("C")]).await.unwrap();
        assert!(store.object("output/rot-part0001.csv").is_some());
        assert_eq!(store.text("processed.manifest.txt").unwrap(), "A\nB\n");

        let artifacts = c.finish().await.unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(store.text("processed.manifest.txt").unwrap(), "A\nB\nC\n");
    }
}
