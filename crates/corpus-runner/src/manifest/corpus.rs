use super::{parse_lines, render_lines, write_mirror, WorkItem};
use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::storage::{RemoteStore, StoreError};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Ordered, duplicate-free list of every work item in a corpus snapshot
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    items: Vec<WorkItem>,
    index: HashSet<WorkItem>,
}

impl Manifest {
    pub fn new(items: impl IntoIterator<Item = WorkItem>) -> Self {
        let mut manifest = Self::default();
        for item in items {
            if manifest.index.insert(item.clone()) {
                manifest.items.push(item);
            }
        }
        manifest
    }

    pub fn contains(&self, item: &WorkItem) -> bool {
        self.index.contains(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.iter()
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        render_lines(&self.items)
    }
}

/// Read-only view used by the `report` command
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ManifestReport {
    pub key: String,
    pub exists: bool,
    pub entries: usize,
}

/// Corpus manifest stored at one remote key and mirrored locally
pub struct CorpusManifest {
    store: Arc<dyn RemoteStore>,
    key: String,
    mirror_path: PathBuf,
    corpus_prefix: String,
    descriptor_suffix: String,
    exclude_prefixes: Vec<String>,
}

impl CorpusManifest {
    pub fn new(store: Arc<dyn RemoteStore>, config: &RunnerConfig) -> Self {
        Self {
            store,
            key: config.manifest_key.clone(),
            mirror_path: config.manifest_mirror(),
            corpus_prefix: config.corpus_prefix.clone(),
            descriptor_suffix: config.descriptor_suffix.clone(),
            exclude_prefixes: config.exclude_prefixes.clone(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mirror_path(&self) -> &PathBuf {
        &self.mirror_path
    }

    /// Build the manifest from a listing of the corpus prefix
    ///
    /// An existing remote manifest is returned as is unless `force_refresh`
    /// is set. The listing is filtered, deduplicated and sorted, so the same
    /// corpus always renders the same bytes.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn generate(&self, force_refresh: bool, skip_upload: bool) -> Result<Manifest> {
        if !force_refresh {
            match self.store.get(&self.key).await {
                Ok(bytes) => {
                    let manifest = self.parse(&bytes)?;
                    write_mirror(&self.mirror_path, &bytes)?;
                    info!(
                        entries = manifest.len(),
                        "Manifest already exists, use --force-refresh to rebuild it"
                    );
                    return Ok(manifest);
                }
                Err(StoreError::NotFound(_)) => {
                    debug!("No manifest in the store yet, listing the corpus");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let listed = self.store.list(&self.corpus_prefix).await?;
        let total_listed = listed.len();

        let items: BTreeSet<String> = listed
            .into_iter()
            .filter(|key| key.ends_with(&self.descriptor_suffix))
            .filter(|key| !self.is_excluded(key))
            .collect();

        let manifest = Manifest::new(items.into_iter().map(WorkItem::new));
        let bytes = manifest.to_bytes();

        write_mirror(&self.mirror_path, &bytes)?;
        info!(
            listed = total_listed,
            entries = manifest.len(),
            mirror = %self.mirror_path.display(),
            "Manifest generated"
        );

        if skip_upload {
            warn!("Skipping manifest upload, only the local mirror was written");
        } else {
            self.store.put(&self.key, bytes).await?;
            info!(store = %self.store.describe(), "Manifest uploaded");
        }

        Ok(manifest)
    }

    /// Fetch the persisted manifest and refresh the local mirror
    ///
    /// Falls back to the mirror only when the remote object is absent, which
    /// is what `generate --skip-upload` leaves behind.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn load(&self) -> Result<Manifest> {
        match self.store.get(&self.key).await {
            Ok(bytes) => {
                let manifest = self.parse(&bytes)?;
                write_mirror(&self.mirror_path, &bytes)?;
                debug!(entries = manifest.len(), "Manifest loaded");
                Ok(manifest)
            }
            Err(StoreError::NotFound(_)) => match std::fs::read(&self.mirror_path) {
                Ok(bytes) => {
                    warn!(
                        mirror = %self.mirror_path.display(),
                        "Manifest not in the store, using the local mirror"
                    );
                    self.parse(&bytes)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(RunnerError::manifest_missing(&self.key))
                }
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Existence and size of the remote manifest, without touching the mirror
    pub async fn report(&self) -> Result<ManifestReport> {
        let entries = self.fetch().await?.map(|manifest| manifest.len());
        Ok(ManifestReport {
            key: self.key.clone(),
            exists: entries.is_some(),
            entries: entries.unwrap_or(0),
        })
    }

    /// Remote manifest only; nothing is written locally
    pub async fn fetch(&self) -> Result<Option<Manifest>> {
        match self.store.get(&self.key).await {
            Ok(bytes) => self.parse(&bytes).map(Some),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Push the local mirror to the store, replacing the remote manifest
    pub async fn upload_mirror(&self) -> Result<Option<usize>> {
        super::push_mirror(self.store.as_ref(), &self.key, &self.mirror_path).await
    }

    fn is_excluded(&self, key: &str) -> bool {
        self.exclude_prefixes
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
    }

    fn parse(&self, bytes: &[u8]) -> Result<Manifest> {
        parse_lines(bytes)
            .map(Manifest::new)
            .map_err(|e| RunnerError::invalid_manifest(&self.key, e.to_string()))
    }
}
