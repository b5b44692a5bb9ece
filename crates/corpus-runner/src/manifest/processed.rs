use super::{parse_lines, render_lines, write_mirror, Manifest, WorkItem};
use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::storage::{RemoteStore, StoreError};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Items that completed successfully
///
/// Owned by the checkpoint committer for the whole run. Marks accumulate in
/// memory and reach the store only through [`ProcessedSet::flush`], which
/// always writes a superset of what the store held before.
pub struct ProcessedSet {
    store: Arc<dyn RemoteStore>,
    key: String,
    mirror_path: PathBuf,
    manifest: Arc<Manifest>,
    done: BTreeSet<WorkItem>,
    unflushed: usize,
}

impl ProcessedSet {
    /// Fetch the processed object; a missing object is an empty set
    #[instrument(skip_all, fields(key = %config.processed_key))]
    pub async fn load(
        store: Arc<dyn RemoteStore>,
        config: &RunnerConfig,
        manifest: Arc<Manifest>,
    ) -> Result<Self> {
        let key = config.processed_key.clone();
        let mirror_path = config.processed_mirror();

        let remote = match store.get(&key).await {
            Ok(bytes) => {
                let items = parse_lines(&bytes)
                    .map_err(|e| RunnerError::invalid_manifest(&key, e.to_string()))?;
                write_mirror(&mirror_path, &bytes)?;
                items
            }
            Err(StoreError::NotFound(_)) => {
                info!("No processed manifest yet, starting from an empty set");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let total = remote.len();
        let done: BTreeSet<WorkItem> = remote
            .into_iter()
            .filter(|item| manifest.contains(item))
            .collect();
        if done.len() < total {
            warn!(
                unknown = total - done.len(),
                "Processed manifest lists items the corpus manifest does not, ignoring them"
            );
        }
        debug!(done = done.len(), "Processed set loaded");

        Ok(Self {
            store,
            key,
            mirror_path,
            manifest,
            done,
            unflushed: 0,
        })
    }

    /// Processed items the manifest lists, read from the store without
    /// touching the local mirror
    pub async fn count_done(
        store: &dyn RemoteStore,
        config: &RunnerConfig,
        manifest: &Manifest,
    ) -> Result<usize> {
        let key = &config.processed_key;
        let items = match store.get(key).await {
            Ok(bytes) => parse_lines(&bytes)
                .map_err(|e| RunnerError::invalid_manifest(key, e.to_string()))?,
            Err(StoreError::NotFound(_)) => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        Ok(items.iter().filter(|item| manifest.contains(item)).count())
    }

    pub fn contains(&self, item: &WorkItem) -> bool {
        self.done.contains(item)
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Marks recorded since the last successful flush
    pub fn pending_flush(&self) -> usize {
        self.unflushed
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Record a completed item; `false` if it was already done
    pub fn mark_done(&mut self, item: &WorkItem) -> Result<bool> {
        if !self.manifest.contains(item) {
            return Err(RunnerError::NotInManifest(item.to_string()));
        }
        let inserted = self.done.insert(item.clone());
        if inserted {
            self.unflushed += 1;
        }
        Ok(inserted)
    }

    /// Merge local marks into the remote object, then replace the mirror
    ///
    /// The remote copy is re-read first so marks written by an earlier run
    /// that this process never saw are kept. Returns the number of entries
    /// written.
    #[instrument(skip(self), fields(key = %self.key, pending = self.unflushed))]
    pub async fn flush(&mut self) -> Result<usize> {
        let mut union: BTreeSet<WorkItem> = match self.store.get(&self.key).await {
            Ok(bytes) => parse_lines(&bytes)
                .map_err(|e| RunnerError::invalid_manifest(&self.key, e.to_string()))?
                .into_iter()
                .collect(),
            Err(StoreError::NotFound(_)) => BTreeSet::new(),
            Err(e) => return Err(e.into()),
        };
        union.extend(self.done.iter().cloned());

        let bytes = render_lines(&union);
        self.store.put(&self.key, bytes.clone()).await?;
        write_mirror(&self.mirror_path, &bytes)?;

        self.unflushed = 0;
        debug!(entries = union.len(), "Processed set flushed");
        Ok(union.len())
    }

    /// Delete the remote processed object and its local mirror
    ///
    /// Returns whether anything existed. Used to force a full reprocess.
    pub async fn clear(store: &dyn RemoteStore, config: &RunnerConfig) -> Result<bool> {
        let key = &config.processed_key;
        let existed = store.exists(key).await?;
        if existed {
            store.delete(key).await?;
        }
        let mirror = config.processed_mirror();
        let mirrored = remove_if_present(&mirror)?;
        info!(key = %key, remote = existed, mirror = mirrored, "Processed manifest cleared");
        Ok(existed || mirrored)
    }

    /// Push the local mirror to the store, replacing the remote object
    pub async fn upload_mirror(store: &dyn RemoteStore, config: &RunnerConfig) -> Result<Option<usize>> {
        super::push_mirror(store, &config.processed_key, &config.processed_mirror()).await
    }
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
