//! Bounded worker pool
//!
//! `concurrency` tasks share one batch through an atomic cursor, so every
//! item is claimed exactly once. Each claimed item is downloaded into its own
//! cache entry, handed to the processor, cleaned up, and reported to the
//! committer over an mpsc channel. Item failures are reported, never raised.

use super::cache::{CacheEntry, LocalCache};
use super::processor::UnitProcessor;
use super::types::{ItemReport, Outcome, ResultRecord};
use crate::config::RunnerConfig;
use crate::manifest::WorkItem;
use crate::storage::{RemoteStore, StoreError, StoreResult};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Download behaviour shared by every worker
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Attempts per object before the item fails
    pub download_retries: u32,
    /// Base backoff, multiplied by the attempt number
    pub retry_delay: Duration,
    /// Sibling objects with these suffixes are not downloaded
    pub skip_suffixes: Vec<String>,
}

impl PoolSettings {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            download_retries: config.download_retries,
            retry_delay: config.retry_delay(),
            skip_suffixes: config.skip_suffixes.clone(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    store: Arc<dyn RemoteStore>,
    processor: Arc<dyn UnitProcessor>,
    cache: LocalCache,
    settings: Arc<PoolSettings>,
}

/// Running pool: its report stream and its tasks
pub struct PoolHandle {
    pub reports: mpsc::Receiver<ItemReport>,
    workers: JoinSet<usize>,
    concurrency: usize,
}

impl PoolHandle {
    /// Executors actually spawned after clamping to the batch size
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Wait for every worker to exit; returns the number of items reported
    pub async fn join(mut self) -> usize {
        // Workers block on a full channel otherwise.
        self.reports.close();
        let mut handled = 0;
        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(count) => handled += count,
                Err(e) if e.is_panic() => error!("Worker task panicked: {e}"),
                Err(e) => warn!("Worker task ended abnormally: {e}"),
            }
        }
        handled
    }
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        processor: Arc<dyn UnitProcessor>,
        cache: LocalCache,
        settings: PoolSettings,
    ) -> Self {
        Self {
            store,
            processor,
            cache,
            settings: Arc::new(settings),
        }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Spawn the executors for `batch`
    ///
    /// `concurrency` is clamped to `1..=batch.len()`. Once `cancel` fires no
    /// new item is claimed; items already claimed still run to completion and
    /// are reported.
    pub fn start(
        &self,
        batch: Vec<WorkItem>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> PoolHandle {
        let concurrency = concurrency.clamp(1, batch.len().max(1));
        let items: Arc<[WorkItem]> = batch.into();
        let cursor = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel::<ItemReport>(concurrency * 2);

        info!(items = items.len(), concurrency, "Starting worker pool");

        let mut workers = JoinSet::new();
        for worker in 0..concurrency {
            let pool = self.clone();
            let items = items.clone();
            let cursor = cursor.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();

            workers.spawn(async move {
                let mut handled = 0;
                loop {
                    if cancel.is_cancelled() {
                        debug!(worker, "Cancelled, not claiming more items");
                        break;
                    }
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(item) = items.get(index).cloned() else {
                        break;
                    };

                    let report = pool.handle(worker, item).await;
                    if tx.send(report).await.is_err() {
                        debug!(worker, "Committer stopped listening");
                        break;
                    }
                    handled += 1;
                }
                handled
            });
        }

        PoolHandle {
            reports: rx,
            workers,
            concurrency,
        }
    }

    /// Run a whole batch and collect every report, in completion order
    pub async fn run(
        &self,
        batch: Vec<WorkItem>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Vec<ItemReport> {
        let mut handle = self.start(batch, concurrency, cancel);
        let mut reports = Vec::new();
        while let Some(report) = handle.reports.recv().await {
            reports.push(report);
        }
        handle.join().await;
        reports
    }

    #[instrument(skip(self, item), fields(item = %item))]
    async fn handle(&self, worker: usize, item: WorkItem) -> ItemReport {
        let started = Instant::now();
        debug!(worker, "Processing item");

        let outcome = match self.cache.acquire().await {
            Ok(entry) => {
                let outcome = self.download_and_process(&item, &entry, started).await;
                if let Err(e) = entry.release().await {
                    warn!(error = %e, "Failed to clean up cache entry");
                }
                outcome
            }
            Err(e) => Outcome::Failure(format!("could not create cache entry: {e}")),
        };

        let duration = started.elapsed();
        match &outcome {
            Outcome::Success(_) => info!(worker, elapsed_ms = duration.as_millis() as u64, "Item processed"),
            Outcome::Failure(reason) => warn!(worker, %reason, "Item failed"),
        }

        ItemReport {
            item,
            outcome,
            duration,
            worker,
        }
    }

    async fn download_and_process(
        &self,
        item: &WorkItem,
        entry: &CacheEntry,
        started: Instant,
    ) -> Outcome {
        let descriptor = match self.download(item, entry).await {
            Ok(path) => path,
            Err(e) => return Outcome::Failure(format!("download failed: {e}")),
        };

        let processed = AssertUnwindSafe(self.processor.process(item, &descriptor))
            .catch_unwind()
            .await;

        match processed {
            Ok(Ok(payload)) => {
                Outcome::Success(ResultRecord::success(item, &payload, started.elapsed()))
            }
            Ok(Err(e)) => Outcome::Failure(format!("{} processor: {e}", self.processor.name())),
            Err(panic) => Outcome::Failure(format!(
                "{} processor panicked: {}",
                self.processor.name(),
                panic_message(panic.as_ref())
            )),
        }
    }

    /// Fetch the descriptor and its siblings; returns the descriptor's local path
    async fn download(&self, item: &WorkItem, entry: &CacheEntry) -> StoreResult<PathBuf> {
        let prefix = item.parent_prefix();

        let mut keys = if prefix.is_empty() {
            vec![item.to_string()]
        } else {
            self.with_retry("list", prefix, || self.store.list(prefix))
                .await?
        };
        if !keys.iter().any(|key| key == item.as_str()) {
            keys.push(item.to_string());
        }

        let mut fetched = 0usize;
        for key in keys.iter().filter(|key| !self.is_skipped(key)) {
            let relative = key.strip_prefix(prefix).unwrap_or(key.as_str());
            let Some(local) = entry.path_for(relative) else {
                warn!(%key, "Skipping object with an unusable name");
                continue;
            };

            let data = self.with_retry("get", key, || self.store.get(key)).await?;
            write_local(&local, &data)
                .await
                .map_err(|e| StoreError::unavailable("write", key.as_str(), e.to_string()))?;
            fetched += 1;
        }
        debug!(objects = fetched, "Inputs downloaded");

        entry
            .path_for(item.as_str().strip_prefix(prefix).unwrap_or(item.as_str()))
            .ok_or_else(|| StoreError::unavailable("get", item.as_str(), "descriptor name is not a file path"))
    }

    fn is_skipped(&self, key: &str) -> bool {
        self.settings
            .skip_suffixes
            .iter()
            .any(|suffix| key.ends_with(suffix.as_str()))
    }

    /// Linear backoff; a missing object is final and not retried
    async fn with_retry<T, F, Fut>(&self, operation: &str, key: &str, mut call: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let attempts = self.settings.download_retries.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e @ StoreError::NotFound(_)) => return Err(e),
                Err(e) if attempt < attempts => {
                    let delay = self.settings.retry_delay * attempt;
                    warn!(
                        "{} attempt {}/{} for {} failed: {}. Retrying in {:?}",
                        operation, attempt, attempts, key, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn write_local(path: &std::path::Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
