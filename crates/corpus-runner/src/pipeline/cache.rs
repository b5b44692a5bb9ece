//! Per-item scratch directories
//!
//! Every item gets its own directory under the cache root for the duration
//! of its download and processing. The directory is removed when the entry is
//! released, or when it is dropped on an abort or panic path, so the disk
//! footprint is bounded by the number of items in flight.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Root of the per-item directories, with live and high-water counters
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
    resident: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            resident: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, empty directory for one item
    pub async fn acquire(&self) -> io::Result<CacheEntry> {
        let dir = self.root.join(format!("item-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&dir).await?;

        let live = self.resident.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);

        Ok(CacheEntry {
            dir,
            resident: self.resident.clone(),
            released: false,
        })
    }

    /// Remove entry directories left behind by a killed process
    ///
    /// Must run before any entry of this process is acquired.
    pub fn clear_stale(&self) -> io::Result<usize> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let stale = path.is_dir()
                && path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with("item-"));
            if stale {
                std::fs::remove_dir_all(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            warn!(removed, root = %self.root.display(), "Removed stale cache entries");
        }
        Ok(removed)
    }

    /// Entries currently on disk
    pub fn resident(&self) -> usize {
        self.resident.load(Ordering::SeqCst)
    }

    /// Most entries that were ever on disk at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Scoped directory holding one item's inputs
#[derive(Debug)]
pub struct CacheEntry {
    dir: PathBuf,
    resident: Arc<AtomicUsize>,
    released: bool,
}

impl CacheEntry {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local path for a store-relative name inside this entry
    ///
    /// Only plain components are accepted, so a crafted key cannot escape
    /// the entry directory.
    pub fn path_for(&self, relative: &str) -> Option<PathBuf> {
        let mut path = self.dir.clone();
        let mut pushed = false;
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    pushed = true;
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        pushed.then_some(path)
    }

    /// Remove the directory and free the slot
    pub async fn release(mut self) -> io::Result<()> {
        let removed = match tokio::fs::remove_dir_all(&self.dir).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        };
        self.mark_released();
        removed
    }

    fn mark_released(&mut self) {
        if !self.released {
            self.released = true;
            self.resident.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for CacheEntry {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), error = %e, "Failed to remove cache entry");
            }
        }
        self.mark_released();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_release_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(root.path());

        let entry = cache.acquire().await.unwrap();
        let dir = entry.dir().to_path_buf();
        std::fs::write(dir.join("input.xml"), "x").unwrap();
        assert!(dir.exists());
        assert_eq!(cache.resident(), 1);

        entry.release().await.unwrap();
        assert!(!dir.exists());
        assert_eq!(cache.resident(), 0);
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(root.path());

        let dir = {
            let entry = cache.acquire().await.unwrap();
            entry.dir().to_path_buf()
        };
        assert!(!dir.exists());
        assert_eq!(cache.resident(), 0);
    }

    #[tokio::test]
    async fn test_peak_tracks_high_water_mark() {
        let root = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(root.path());

        let a = cache.acquire().await.unwrap();
        let b = cache.acquire().await.unwrap();
        a.release().await.unwrap();
        let c = cache.acquire().await.unwrap();

        assert_eq!(cache.resident(), 2);
        assert_eq!(cache.peak(), 2);
        drop(b);
        drop(c);
        assert_eq!(cache.resident(), 0);
        assert_eq!(cache.peak(), 2);
    }

    #[test]
    fn test_clear_stale_only_touches_entries() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("item-0123/ALTO")).unwrap();
        std::fs::create_dir_all(root.path().join("keep-me")).unwrap();
        let cache = LocalCache::new(root.path());

        assert_eq!(cache.clear_stale().unwrap(), 1);
        assert!(!root.path().join("item-0123").exists());
        assert!(root.path().join("keep-me").exists());
        assert_eq!(LocalCache::new(root.path().join("absent")).clear_stale().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_path_for_stays_inside_entry() {
        let root = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(root.path());
        let entry = cache.acquire().await.unwrap();

        let path = entry.path_for("ALTO/00001.xml").unwrap();
        assert!(path.starts_with(entry.dir()));
        assert!(path.ends_with("ALTO/00001.xml"));

        assert!(entry.path_for("../escape.xml").is_none());
        assert!(entry.path_for("/etc/passwd").is_none());
        assert!(entry.path_for("").is_none());
    }
}
