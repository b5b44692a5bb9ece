//! Result artifacts
//!
//! Rows are appended to a CSV file in the working output directory and synced
//! before `append` returns, so a crash never loses a row the committer has
//! acted on. The directory is synced when a file is created in it, so the
//! file's entry survives a crash as well. Finished files are uploaded under the output prefix and then
//! moved to the retention directory. Anything still sitting in the working
//! directory at startup belongs to an interrupted run and is recovered.

use super::types::{RecordStatus, ResultRecord};
use crate::config::RunnerConfig;
use crate::error::Result;
use crate::manifest::WorkItem;
use crate::storage::RemoteStore;
use chrono::Utc;
use corpus_common::checksum::sha256_hex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Where artifacts are written, uploaded and retained
#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub output_dir: PathBuf,
    pub retention_dir: PathBuf,
    pub output_prefix: String,
    /// Rotate to a new part file every n rows
    pub upload_every: Option<usize>,
}

impl SinkSettings {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            retention_dir: config.retention_dir.clone(),
            output_prefix: config.output_prefix.clone(),
            upload_every: config.upload_every,
        }
    }

    fn remote_key(&self, file_name: &str) -> String {
        let prefix = self.output_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{prefix}/{file_name}")
        }
    }
}

/// An uploaded and retained result file
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub remote_key: String,
    pub local_path: PathBuf,
    pub rows: usize,
    pub sha256: String,
}

/// Leftover file of an interrupted run, parsed and cleaned
#[derive(Debug, Clone)]
pub struct PendingArtifact {
    pub path: PathBuf,
    pub rows: usize,
    /// Items with a success row, in file order
    pub succeeded: Vec<WorkItem>,
    /// Rows that could not be parsed and were dropped from the file
    pub dropped: usize,
}

struct OpenPart {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

/// Unique per-run identifier: `<UTC timestamp>-<short uuid>`
pub fn new_run_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), &uuid[..8])
}

pub struct ResultSink {
    store: Arc<dyn RemoteStore>,
    settings: SinkSettings,
    run_id: String,
    next_part: usize,
    current: Option<OpenPart>,
    ready: Vec<(PathBuf, usize)>,
    rows: usize,
    artifacts: Vec<Artifact>,
}

impl ResultSink {
    pub fn new(store: Arc<dyn RemoteStore>, settings: SinkSettings, run_id: impl Into<String>) -> Self {
        Self {
            store,
            settings,
            run_id: run_id.into(),
            next_part: 1,
            current: None,
            ready: Vec::new(),
            rows: 0,
            artifacts: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Rows appended during this run
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Artifacts published so far by this sink
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Closed part files waiting for upload
    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Write one row and sync it to disk
    pub fn append(&mut self, record: &ResultRecord) -> Result<()> {
        if self.current.is_none() {
            self.current = Some(self.open_part()?);
        }
        let Some(part) = self.current.as_mut() else {
            return Err(crate::error::RunnerError::internal("no open result file"));
        };

        part.writer.serialize(record)?;
        part.writer.flush()?;
        part.writer.get_ref().sync_data()?;
        part.rows += 1;
        self.rows += 1;

        if let Some(limit) = self.settings.upload_every {
            if part.rows >= limit {
                self.close_current()?;
            }
        }
        Ok(())
    }

    /// Upload and retain every closed part
    pub async fn upload_ready(&mut self) -> Result<Vec<Artifact>> {
        let mut published = Vec::new();
        while let Some((path, rows)) = self.ready.first().cloned() {
            let artifact = self.publish(&path, rows).await?;
            self.ready.remove(0);
            self.artifacts.push(artifact.clone());
            published.push(artifact);
        }
        Ok(published)
    }

    /// Close the open file, then upload and retain everything
    ///
    /// A run that appended nothing produces no artifact. Returns every
    /// artifact this sink published.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn finalize(&mut self) -> Result<Vec<Artifact>> {
        self.close_current()?;
        self.upload_ready().await?;
        info!(artifacts = self.artifacts.len(), rows = self.rows, "Result sink finalized");
        Ok(self.artifacts.clone())
    }

    /// Parse leftover files in the working directory
    ///
    /// Rows cut short by a crash are dropped and the file is rewritten with
    /// the valid rows only. Files with no valid row are deleted.
    pub fn recover_pending(&self) -> Result<Vec<PendingArtifact>> {
        let dir = &self.settings.output_dir;
        let mut paths: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "csv"))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        paths.sort();

        let mut pending = Vec::new();
        for path in paths {
            let (records, dropped) = read_records(&path)?;
            if records.is_empty() {
                warn!(file = %path.display(), dropped, "Removing leftover result file with no valid rows");
                std::fs::remove_file(&path)?;
                continue;
            }
            if dropped > 0 {
                warn!(file = %path.display(), dropped, "Dropping incomplete rows from leftover result file");
                rewrite_records(&path, &records)?;
            }
            let succeeded = records
                .iter()
                .filter(|r| r.status == RecordStatus::Success)
                .map(ResultRecord::work_item)
                .collect();
            info!(file = %path.display(), rows = records.len(), "Found result file from an interrupted run");
            pending.push(PendingArtifact {
                path,
                rows: records.len(),
                succeeded,
                dropped,
            });
        }
        Ok(pending)
    }

    /// Upload and retain a recovered file
    ///
    /// Call only after its successes were marked and flushed.
    pub async fn publish_recovered(&mut self, pending: &PendingArtifact) -> Result<Artifact> {
        self.publish(&pending.path, pending.rows).await
    }

    fn open_part(&mut self) -> Result<OpenPart> {
        std::fs::create_dir_all(&self.settings.output_dir)?;

        let file_name = match self.settings.upload_every {
            Some(_) => format!("{}-part{:04}.csv", self.run_id, self.next_part),
            None => format!("{}.csv", self.run_id),
        };
        self.next_part += 1;

        let path = self.settings.output_dir.join(&file_name);
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        sync_dir(&self.settings.output_dir)?;
        debug!(file = %path.display(), "Opened result file");

        Ok(OpenPart {
            path,
            writer: csv::WriterBuilder::new().has_headers(true).from_writer(file),
            rows: 0,
        })
    }

    fn close_current(&mut self) -> Result<()> {
        if let Some(mut part) = self.current.take() {
            part.writer.flush()?;
            if part.rows > 0 {
                self.ready.push((part.path, part.rows));
            }
        }
        Ok(())
    }

    async fn publish(&self, path: &Path, rows: usize) -> Result<Artifact> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| crate::error::RunnerError::internal(format!("bad artifact path {}", path.display())))?;

        let data = tokio::fs::read(path).await?;
        let sha256 = sha256_hex(&data);
        let remote_key = self.settings.remote_key(&file_name);
        self.store.put(&remote_key, data).await?;

        tokio::fs::create_dir_all(&self.settings.retention_dir).await?;
        let local_path = self.settings.retention_dir.join(&file_name);
        move_file(path, &local_path).await?;

        info!(
            remote = %remote_key,
            local = %local_path.display(),
            rows,
            "Result file uploaded"
        );
        Ok(Artifact {
            file_name,
            remote_key,
            local_path,
            rows,
            sha256,
        })
    }
}

fn read_records(path: &Path) -> Result<(Vec<ResultRecord>, usize)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut records = Vec::new();
    let mut dropped = 0;
    for row in reader.deserialize::<ResultRecord>() {
        match row {
            Ok(record) => records.push(record),
            Err(e) => {
                debug!(file = %path.display(), error = %e, "Unreadable result row");
                dropped += 1;
            }
        }
    }
    Ok((records, dropped))
}

fn rewrite_records(path: &Path, records: &[ResultRecord]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(true)
            .from_writer(tmp.as_file());
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir)?;
    Ok(())
}

/// Make created or renamed entries of `dir` durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            // Retention dir may sit on another file system.
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}
