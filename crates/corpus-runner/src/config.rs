//! Runner configuration
//!
//! Built in three layers: the defaults below, `CORPUS_*` environment
//! variables (a `.env` file is loaded first by `main`), then command-line
//! overrides applied by [`crate::Cli`].

use crate::error::{Result, RunnerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Runner Configuration Constants
// ============================================================================

/// Remote key of the corpus manifest.
pub const DEFAULT_MANIFEST_KEY: &str = "corpus.manifest.txt";

/// Remote key of the processed manifest.
pub const DEFAULT_PROCESSED_KEY: &str = "processed.manifest.txt";

/// Keys ending with this suffix are work items.
pub const DEFAULT_DESCRIPTOR_SUFFIX: &str = "METS.xml";

/// Remote prefix that result artifacts are uploaded under.
pub const DEFAULT_OUTPUT_PREFIX: &str = "output";

/// Local folder holding result artifacts until they are uploaded.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Local folder that uploaded artifacts are moved into.
pub const DEFAULT_RETENTION_DIR: &str = "output_uploaded";

/// Local folder for per-item download directories.
pub const DEFAULT_CACHE_DIR: &str = "data";

/// Local folder for the manifest mirrors.
pub const DEFAULT_STATE_DIR: &str = ".corpus-runner";

/// Items scheduled per run.
pub const DEFAULT_MAX_FILES: usize = 10;

/// Successes between two flushes of the processed set.
pub const DEFAULT_CHECKPOINT_EVERY: usize = 1;

/// Attempts per object download before the item fails.
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 3;

/// Base delay between download attempts, multiplied by the attempt number.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Objects next to a descriptor that are never downloaded.
pub const DEFAULT_SKIP_SUFFIXES: &[&str] = &[".pdf"];

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub manifest_key: String,
    pub processed_key: String,

    /// Listing root for manifest generation ("" lists the whole bucket)
    pub corpus_prefix: String,
    pub descriptor_suffix: String,
    /// Keys under these prefixes never enter the manifest
    pub exclude_prefixes: Vec<String>,

    pub output_prefix: String,
    pub output_dir: PathBuf,
    pub retention_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub state_dir: PathBuf,

    /// Batch bound, `0` means unlimited
    pub max_files: usize,
    pub concurrency: usize,
    pub checkpoint_every: usize,
    /// Rotate the result artifact every n rows
    pub upload_every: Option<usize>,

    pub download_retries: u32,
    pub retry_delay_ms: u64,
    pub skip_suffixes: Vec<String>,

    #[serde(default)]
    pub show_progress: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            manifest_key: DEFAULT_MANIFEST_KEY.to_string(),
            processed_key: DEFAULT_PROCESSED_KEY.to_string(),
            corpus_prefix: String::new(),
            descriptor_suffix: DEFAULT_DESCRIPTOR_SUFFIX.to_string(),
            exclude_prefixes: Vec::new(),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            retention_dir: PathBuf::from(DEFAULT_RETENTION_DIR),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            max_files: DEFAULT_MAX_FILES,
            concurrency: default_concurrency(),
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            upload_every: None,
            download_retries: DEFAULT_DOWNLOAD_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            skip_suffixes: DEFAULT_SKIP_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            show_progress: true,
        }
    }
}

/// Number of CPUs available to this process, at least 1
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl RunnerConfig {
    /// Defaults overridden by `CORPUS_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(key) = env_string("CORPUS_MANIFEST_KEY") {
            config.manifest_key = key;
        }
        if let Some(key) = env_string("CORPUS_PROCESSED_KEY") {
            config.processed_key = key;
        }
        if let Some(prefix) = env_string("CORPUS_PREFIX") {
            config.corpus_prefix = prefix;
        }
        if let Some(suffix) = env_string("CORPUS_DESCRIPTOR_SUFFIX") {
            config.descriptor_suffix = suffix;
        }
        if let Some(list) = env_string("CORPUS_EXCLUDE_PREFIXES") {
            config.exclude_prefixes = split_list(&list);
        }
        if let Some(prefix) = env_string("CORPUS_OUTPUT_PREFIX") {
            config.output_prefix = prefix;
        }
        if let Some(dir) = env_string("CORPUS_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("CORPUS_RETENTION_DIR") {
            config.retention_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("CORPUS_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("CORPUS_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(max) = env_parse("CORPUS_MAX_FILES")? {
            config.max_files = max;
        }
        if let Some(n) = env_parse("CORPUS_CONCURRENCY")? {
            config.concurrency = n;
        }
        if let Some(n) = env_parse("CORPUS_CHECKPOINT_EVERY")? {
            config.checkpoint_every = n;
        }
        if let Some(n) = env_parse("CORPUS_UPLOAD_EVERY")? {
            config.upload_every = Some(n);
        }
        if let Some(n) = env_parse("CORPUS_DOWNLOAD_RETRIES")? {
            config.download_retries = n;
        }
        if let Some(ms) = env_parse("CORPUS_RETRY_DELAY_MS")? {
            config.retry_delay_ms = ms;
        }
        if let Some(list) = std::env::var("CORPUS_SKIP_SUFFIXES").ok() {
            config.skip_suffixes = split_list(&list);
        }

        Ok(config)
    }

    /// Reject settings a run cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(RunnerError::config("concurrency must be at least 1"));
        }
        if self.checkpoint_every == 0 {
            return Err(RunnerError::config("checkpoint interval must be at least 1"));
        }
        if self.upload_every == Some(0) {
            return Err(RunnerError::config("upload interval must be at least 1 row"));
        }
        if self.manifest_key.trim().is_empty() || self.processed_key.trim().is_empty() {
            return Err(RunnerError::config("manifest keys cannot be empty"));
        }
        if self.manifest_key == self.processed_key {
            return Err(RunnerError::config(
                "corpus manifest and processed manifest must use different keys",
            ));
        }
        if self.descriptor_suffix.is_empty() {
            return Err(RunnerError::config("descriptor suffix cannot be empty"));
        }
        if self.output_dir == self.retention_dir {
            return Err(RunnerError::config(format!(
                "output dir and retention dir are both '{}'",
                self.output_dir.display()
            )));
        }
        Ok(())
    }

    /// Local mirror of the corpus manifest
    pub fn manifest_mirror(&self) -> PathBuf {
        mirror_path(&self.state_dir, &self.manifest_key)
    }

    /// Local mirror of the processed manifest
    pub fn processed_mirror(&self) -> PathBuf {
        mirror_path(&self.state_dir, &self.processed_key)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn set_max_files(&mut self, max: usize) {
        self.max_files = max;
    }

    pub fn set_concurrency(&mut self, n: usize) {
        self.concurrency = n;
    }

    pub fn set_checkpoint_every(&mut self, n: usize) {
        self.checkpoint_every = n;
    }

    pub fn set_upload_every(&mut self, n: Option<usize>) {
        self.upload_every = n;
    }

    /// Re-root every local directory under `root`
    pub fn with_local_root(mut self, root: &Path) -> Self {
        self.output_dir = root.join(DEFAULT_OUTPUT_DIR);
        self.retention_dir = root.join(DEFAULT_RETENTION_DIR);
        self.cache_dir = root.join(DEFAULT_CACHE_DIR);
        self.state_dir = root.join(DEFAULT_STATE_DIR);
        self
    }
}

fn mirror_path(state_dir: &Path, key: &str) -> PathBuf {
    state_dir.join(key.trim_matches('/').replace('/', "_"))
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| RunnerError::config(format!("{name}='{raw}': {e}"))),
        None => Ok(None),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "CORPUS_MANIFEST_KEY",
        "CORPUS_PROCESSED_KEY",
        "CORPUS_PREFIX",
        "CORPUS_EXCLUDE_PREFIXES",
        "CORPUS_MAX_FILES",
        "CORPUS_CONCURRENCY",
        "CORPUS_UPLOAD_EVERY",
        "CORPUS_SKIP_SUFFIXES",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.manifest_key, DEFAULT_MANIFEST_KEY);
        assert_eq!(config.processed_key, DEFAULT_PROCESSED_KEY);
        assert_eq!(config.max_files, 10);
        assert_eq!(config.checkpoint_every, 1);
        assert!(config.concurrency >= 1);
        assert_eq!(config.skip_suffixes, vec![".pdf".to_string()]);
        assert!(config.exclude_prefixes.is_empty());
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        std::env::set_var("CORPUS_MAX_FILES", "0");
        std::env::set_var("CORPUS_CONCURRENCY", "3");
        std::env::set_var("CORPUS_EXCLUDE_PREFIXES", "Forverts/, Other/");
        std::env::set_var("CORPUS_UPLOAD_EVERY", "100");
        std::env::set_var("CORPUS_SKIP_SUFFIXES", "");

        let config = RunnerConfig::from_env().unwrap();
        assert_eq!(config.max_files, 0);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.exclude_prefixes, vec!["Forverts/", "Other/"]);
        assert_eq!(config.upload_every, Some(100));
        assert!(config.skip_suffixes.is_empty());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage_numbers() {
        clear_env();
        std::env::set_var("CORPUS_CONCURRENCY", "lots");
        let err = RunnerConfig::from_env().unwrap_err();
        assert!(matches!(err, RunnerError::Config(_)));
        clear_env();
    }

    #[test]
    fn test_validate() {
        let mut config = RunnerConfig::default();
        config.set_concurrency(0);
        assert!(config.validate().is_err());

        let mut config = RunnerConfig::default();
        config.set_checkpoint_every(0);
        assert!(config.validate().is_err());

        let mut config = RunnerConfig::default();
        config.set_upload_every(Some(0));
        assert!(config.validate().is_err());

        let mut config = RunnerConfig::default();
        config.processed_key = config.manifest_key.clone();
        assert!(config.validate().is_err());

        let mut config = RunnerConfig::default();
        config.retention_dir = config.output_dir.clone();
        assert!(config.validate().is_err());

        let mut config = RunnerConfig::default();
        config.manifest_key = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mirror_paths() {
        let mut config = RunnerConfig::default().with_local_root(Path::new("/tmp/run"));
        assert_eq!(
            config.manifest_mirror(),
            PathBuf::from("/tmp/run/.corpus-runner/corpus.manifest.txt")
        );
        config.processed_key = "state/processed.manifest.txt".to_string();
        assert_eq!(
            config.processed_mirror(),
            PathBuf::from("/tmp/run/.corpus-runner/state_processed.manifest.txt")
        );
    }
}
