//! Manifest objects
//!
//! Both manifests share one text format: UTF-8, one identifier per line,
//! newline-terminated. Parsing trims each line, ignores blank lines and keeps
//! the first occurrence of a duplicate. Each manifest has a remote copy (the
//! truth) and a local mirror that is only ever replaced atomically.

use crate::error::{Result, RunnerError};
use crate::storage::RemoteStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::Path;

pub mod corpus;
pub mod processed;

pub use corpus::{CorpusManifest, Manifest, ManifestReport};
pub use processed::ProcessedSet;

/// Corpus-relative key of one document descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem(String);

impl WorkItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Folder holding the descriptor and its sibling inputs, with a trailing
    /// slash; empty for a descriptor at the bucket root
    pub fn parent_prefix(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[..=idx],
            None => "",
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkItem {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl AsRef<str> for WorkItem {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parse manifest text into identifiers, first occurrence wins
pub(crate) fn parse_lines(bytes: &[u8]) -> std::result::Result<Vec<WorkItem>, std::str::Utf8Error> {
    let text = std::str::from_utf8(bytes)?;
    let mut seen = std::collections::HashSet::new();
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(*line))
        .map(WorkItem::from)
        .collect())
}

/// Render identifiers one per line, each newline-terminated
pub(crate) fn render_lines<'a, I>(items: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a WorkItem>,
{
    let mut out = String::new();
    for item in items {
        out.push_str(item.as_str());
        out.push('\n');
    }
    out.into_bytes()
}

/// Replace `path` with `bytes` through a synced temp file in the same folder
pub(crate) fn write_mirror(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Upload a local mirror to `key` after re-parsing it
///
/// Returns `None` when there is no mirror on disk.
pub(crate) async fn push_mirror(
    store: &dyn RemoteStore,
    key: &str,
    path: &Path,
) -> Result<Option<usize>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let items = parse_lines(&bytes)
        .map_err(|e| RunnerError::invalid_manifest(path.display().to_string(), e.to_string()))?;

    store.put(key, render_lines(&items)).await?;
    tracing::info!(key, entries = items.len(), mirror = %path.display(), "Uploaded local mirror");
    Ok(Some(items.len()))
}
