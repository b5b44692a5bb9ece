//! End-to-end tests for batch runs against the in-memory store
//!
//! These tests drive `run_batch` the way `corpus-runner run` does and check
//! what ends up in the store:
//! - bounded batches and the processed manifest
//! - failure rows for failing items
//! - nothing-to-do runs
//! - crash between a result write and a checkpoint, then recovery
//! - cancellation while items are in flight
//! - bounded cache residency
//! - deterministic manifests and results

use async_trait::async_trait;
use corpus_runner::manifest::{CorpusManifest, ProcessedSet};
use corpus_runner::pipeline::{
    run_batch, ProcessError, RecordStatus, ResultRecord, RunReport, UnitProcessor,
};
use corpus_runner::processors::{DryRunProcessor, MetsProcessor};
use corpus_runner::storage::MemoryStore;
use corpus_runner::{ExitStatus, RunnerConfig, RunnerError, WorkItem};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const PROCESSED_KEY: &str = "processed.manifest.txt";

fn descriptor_key(name: &str) -> String {
    format!("davar/{name}/{name}-METS.xml")
}

/// Seed one issue directory per name, with a descriptor, one page and a PDF
fn seed_corpus(store: &MemoryStore, names: &[&str]) {
    for name in names {
        store.insert(descriptor_key(name), format!("<mets id=\"{name}\"/>"));
        store.insert(format!("davar/{name}/ALTO/{name}-0001.xml"), "<alto/>");
        store.insert(format!("davar/{name}/{name}.pdf"), vec![0u8; 64]);
    }
}

fn config(root: &Path, max_files: usize, concurrency: usize) -> RunnerConfig {
    let mut config = RunnerConfig::default().with_local_root(root);
    config.set_max_files(max_files);
    config.set_concurrency(concurrency);
    config.set_checkpoint_every(1);
    config.retry_delay_ms = 1;
    config.show_progress = false;
    config
}

async fn generate(store: &MemoryStore, config: &RunnerConfig) {
    CorpusManifest::new(Arc::new(store.clone()), config)
        .generate(false, false)
        .await
        .unwrap();
}

async fn run(
    store: &MemoryStore,
    processor: Arc<dyn UnitProcessor>,
    config: &RunnerConfig,
) -> corpus_runner::Result<RunReport> {
    run_batch(
        Arc::new(store.clone()),
        processor,
        config,
        CancellationToken::new(),
    )
    .await
}

fn processed_lines(store: &MemoryStore) -> Vec<String> {
    store
        .text(PROCESSED_KEY)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Every row of every uploaded result file
fn uploaded_rows(store: &MemoryStore) -> Vec<ResultRecord> {
    let mut rows = Vec::new();
    for key in store.keys() {
        if !(key.starts_with("output/") && key.ends_with(".csv")) {
            continue;
        }
        let data = store.object(&key).unwrap();
        let mut reader = csv::Reader::from_reader(data.as_slice());
        for record in reader.deserialize::<ResultRecord>() {
            rows.push(record.unwrap());
        }
    }
    rows
}

fn result_keys(store: &MemoryStore) -> Vec<String> {
    store
        .keys()
        .into_iter()
        .filter(|k| k.starts_with("output/"))
        .collect()
}

/// Fails the items it was told to, succeeds on the rest
struct Picky {
    failing: HashSet<String>,
}

impl Picky {
    fn failing(ids: &[String]) -> Arc<Self> {
        Arc::new(Self {
            failing: ids.iter().cloned().collect(),
        })
    }
}

#[async_trait]
impl UnitProcessor for Picky {
    fn name(&self) -> &str {
        "picky"
    }

    async fn process(
        &self,
        item: &WorkItem,
        descriptor: &Path,
    ) -> Result<serde_json::Value, ProcessError> {
        if self.failing.contains(item.as_str()) {
            return Err(ProcessError::malformed("descriptor rejected"));
        }
        let size = tokio::fs::metadata(descriptor).await?.len();
        Ok(json!({ "item": item.as_str(), "bytes": size }))
    }
}

/// Tracks how many items are inside `process` at once
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl UnitProcessor for Gauge {
    fn name(&self) -> &str {
        "gauge"
    }

    async fn process(
        &self,
        _item: &WorkItem,
        _descriptor: &Path,
    ) -> Result<serde_json::Value, ProcessError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({}))
    }
}

/// Cancels the run from inside its first item
struct Interrupter {
    cancel: CancellationToken,
    calls: AtomicUsize,
}

#[async_trait]
impl UnitProcessor for Interrupter {
    fn name(&self) -> &str {
        "interrupter"
    }

    async fn process(
        &self,
        item: &WorkItem,
        _descriptor: &Path,
    ) -> Result<serde_json::Value, ProcessError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.cancel.cancel();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(json!({ "item": item.as_str() }))
    }
}

// ============================================================================
// Batches
// ============================================================================

#[tokio::test]
async fn test_bounded_batch_takes_first_unprocessed() {
    let root = TempDir::new().unwrap();
    let store = MemoryStore::new();
    seed_corpus(&store, &["A", "B", "C", "D", "E"]);
    let config = config(root.path(), 2, 2);
    generate(&store, &config).await;

    let report = run(&store, Arc::new(DryRunProcessor), &config).await.unwrap();

    assert_eq!(report.batch_size, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.backlog, 3);
    assert_eq!(report.exit_status(), ExitStatus::Success);
    assert_eq!(
        processed_lines(&store),
        vec![descriptor_key("A"), descriptor_key("B")]
    );

    let rows = uploaded_rows(&store);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == RecordStatus::Success));

    // The uploaded file moved to retention
    let artifact = &report.artifacts[0];
    assert!(artifact.local_path.starts_with(&config.retention_dir));
    assert!(artifact.local_path.exists());
}

#[tokio::test]
async fn test_failed_item_stays_unprocessed() {
    let root = TempDir::new().unwrap();
    let store = MemoryStore::new();
    seed_corpus(&store, &["A", "B", "C"]);
    let config = config(root.path(), 0, 2);
    generate(&store, &config).await;

    let report = run(&store, Picky::failing(&[descriptor_key("B")]), &config)
        .await
        .unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.backlog, 1);
    assert_eq!(
        processed_lines(&store),
        vec![descriptor_key("A"), descriptor_key("C")]
    );

    let rows = uploaded_rows(&store);
    let failure = rows
        .iter()
        .find(|r| r.item_id == descriptor_key("B"))
        .unwrap();
    assert_eq!(failure.status, RecordStatus::Failure);
    assert!(failure.error.contains("descriptor rejected"));
    assert!(failure.payload.is_empty());

    // The next run picks the failed item up again
    let retry = run(&store, Arc::new(DryRunProcessor), &config).await.unwrap();
    assert_eq!(retry.batch_size, 1);
    assert_eq!(retry.succeeded, 1);
    assert_eq!(processed_lines(&store).len(), 3);
}

#[tokio::test]
async fn test_nothing_to_do() {
    let root = TempDir::new().unwrap();
    let store = MemoryStore::new();
    seed_corpus(&store, &["A", "B"]);
    let config = config(root.path(), 0, 2);
    generate(&store, &config).await;

    run(&store, Arc::new(DryRunProcessor), &config).await.unwrap();
    let before = result_keys(&store);

    let report = run(&store, Arc::new(DryRunProcessor), &config).await.unwrap();
    assert_eq!(report.batch_size, 0);
    assert!(report.artifacts.is_empty());
    assert_eq!(report.exit_status(), ExitStatus::NothingToDo);
    assert_eq!(result_keys(&store), before);
}

#[tokio::test]
async fn test_missing_manifest() {
    let root = TempDir::new().unwrap();
    let store = MemoryStore::new();
    seed_corpus(&store, &["A"]);
    let config = config(root.path(), 0, 1);

    let err = run(&store, Arc::new(DryRunProcessor), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::ManifestMissing { .. }));
    assert_eq!(err.exit_status(), ExitStatus::ManifestMissing);
}

#[tokio::test]
async fn test_store_offline() {
    let root = TempDir::new().unwrap();
    let store = MemoryStore::new();
    seed_corpus(&store, &["A"]);
    let config = config(root.path(), 0, 1);
    generate(&store, &config).await;
    store.set_offline(true);

    let err = run(&store, Arc::new(DryRunProcessor), &config)
        .await
        .unwrap_err();
    assert_eq!(err.exit_status(), ExitStatus::StoreUnavailable);
}

// ============================================================================
// Crash and recovery
// ============================================================================

#[tokio::test]
async fn test_crash_before_checkpoint_is_recovered() {
    let root = TempDir::new().unwrap();
    let store = MemoryStore::new();
    seed_corpus(&store, &["A", "B", "C", "D"]);
    let config = config(root.path(), 2, 1);
    generate(&store, &config).await;

    // The first success row is written, then its checkpoint fails
    store.fail_writes_to(PROCESSED_KEY);
    let err = run(&store, Arc::new(DryRunProcessor), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::Store(_)));
    assert!(store.object(PROCESSED_KEY).is_none());
    assert!(result_keys(&store).is_empty());

    let leftovers: Vec<_> = std::fs::read_dir(&config.output_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(leftovers.len(), 1);

    store.clear_failures();
    let report = run(&store, Arc::new(DryRunProcessor), &config).await.unwrap();

    assert_eq!(report.recovered.len(), 1);
    assert_eq!(report.batch_size, 2);
    assert_eq!(
        processed_lines(&store),
        vec![descriptor_key("A"), descriptor_key("B"), descriptor_key("C")]
    );

    // No item has two success rows across all uploaded files
    let mut successes: BTreeMap<String, usize> = BTreeMap::new();
    for row in uploaded_rows(&store).into_iter().filter(|r| r.is_success()) {
        *successes.entry(row.item_id).or_default() += 1;
    }
    assert_eq!(successes.len(), 3);
    assert!(successes.values().all(|&n| n == 1));
    assert_eq!(result_keys(&store).len(), 2);
}

#[tokio::test]
async fn test_interrupted_run_checkpoints_claimed_items() {
    let root = TempDir::new().unwrap();
    let store = MemoryStore::new();
    seed_corpus(&store, &["A", "B", "C"]);
    let config = config(root.path(), 0, 1);
    generate(&store, &config).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = run_batch(
        Arc::new(store.clone()),
        Arc::new(DryRunProcessor),
        &config,
        cancel,
    )
    .await
    .unwrap();

    assert!(report.interrupted);
    assert_eq!(report.exit_status(), ExitStatus::Interrupted);
    assert_eq!(report.succeeded + report.skipped, 3);
    assert_eq!(processed_lines(&store).len(), report.succeeded);
}

#[tokio::test]
async fn test_cancel_mid_run_finishes_claimed_items() {
    let root = TempDir::new().unwrap();
    let store = MemoryStore::new();
    seed_corpus(&store, &["A", "B", "C", "D"]);
    let config = config(root.path(), 0, 2);
    generate(&store, &config).await;

    let cancel = CancellationToken::new();
    let processor = Arc::new(Interrupter {
        cancel: cancel.clone(),
        calls: AtomicUsize::new(0),
    });
    let report = run_batch(Arc::new(store.clone()), processor, &config, cancel)
        .await
        .unwrap();

    assert!(report.interrupted);
    assert_eq!(report.exit_status(), ExitStatus::Interrupted);
    assert!((1..=2).contains(&report.succeeded), "{report:?}");
    assert_eq!(report.failed, 0);
    assert_eq!(report.succeeded + report.skipped, 4);
    assert_eq!(report.artifacts.len(), 1);

    // Exactly the finished items are checkpointed and uploaded
    let mut rows: Vec<String> = uploaded_rows(&store)
        .into_iter()
        .filter(|r| r.is_success())
        .map(|r| r.item_id)
        .collect();
    rows.sort();
    let mut processed = processed_lines(&store);
    processed.sort();
    assert_eq!(processed.len(), report.succeeded);
    assert_eq!(processed, rows);
}

// ============================================================================
// Resources and determinism
// ============================================================================

#[tokio::test]
async fn test_cache_residency_is_bounded() {
    let root = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let names: Vec<String> = (0..12).map(|i| format!("I{i:02}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    seed_corpus(&store, &refs);
    let config = config(root.path(), 0, 3);
    generate(&store, &config).await;

    let gauge = Arc::new(Gauge::default());
    let report = run(&store, gauge.clone(), &config).await.unwrap();

    assert_eq!(report.succeeded, 12);
    assert_eq!(report.concurrency, 3);
    assert!(report.cache_peak >= 1 && report.cache_peak <= 3);
    assert!(gauge.peak.load(Ordering::SeqCst) <= 3);

    // Every cache entry was released
    let left = std::fs::read_dir(&config.cache_dir).unwrap().count();
    assert_eq!(left, 0);
}

#[tokio::test]
async fn test_generate_is_byte_identical() {
    let root = TempDir::new().unwrap();
    let store = MemoryStore::new();
    seed_corpus(&store, &["C", "A", "B"]);
    store.insert("davar/notes.txt", "not a descriptor");
    let config = config(root.path(), 0, 1);
    let corpus = CorpusManifest::new(Arc::new(store.clone()), &config);

    corpus.generate(true, false).await.unwrap();
    let first = store.object(&config.manifest_key).unwrap();
    corpus.generate(true, false).await.unwrap();
    let second = store.object(&config.manifest_key).unwrap();

    assert_eq!(first, second);
    assert_eq!(
        String::from_utf8(first).unwrap(),
        format!(
            "{}\n{}\n{}\n",
            descriptor_key("A"),
            descriptor_key("B"),
            descriptor_key("C")
        )
    );
    assert_eq!(
        std::fs::read(config.manifest_mirror()).unwrap(),
        second
    );
}

#[tokio::test]
async fn test_same_corpus_same_results() {
    async fn process_all(concurrency: usize) -> (Vec<String>, BTreeMap<String, String>) {
        let root = TempDir::new().unwrap();
        let store = MemoryStore::new();
        seed_corpus(&store, &["A", "B", "C", "D", "E", "F"]);
        let config = config(root.path(), 0, concurrency);
        generate(&store, &config).await;
        run(&store, Picky::failing(&[]), &config).await.unwrap();

        let payloads = uploaded_rows(&store)
            .into_iter()
            .map(|r| (r.item_id, r.payload))
            .collect();
        (processed_lines(&store), payloads)
    }

    let (processed_one, payloads_one) = process_all(1).await;
    let (processed_four, payloads_four) = process_all(4).await;
    assert_eq!(processed_one, processed_four);
    assert_eq!(payloads_one, payloads_four);
}

#[tokio::test]
async fn test_cleanup_then_reprocess() {
    let root = TempDir::new().unwrap();
    let store = MemoryStore::new();
    seed_corpus(&store, &["A", "B"]);
    let config = config(root.path(), 0, 2);
    generate(&store, &config).await;
    run(&store, Arc::new(DryRunProcessor), &config).await.unwrap();

    assert!(ProcessedSet::clear(&store, &config).await.unwrap());
    assert!(store.object(PROCESSED_KEY).is_none());
    assert!(!config.processed_mirror().exists());

    let report = run(&store, Arc::new(DryRunProcessor), &config).await.unwrap();
    assert_eq!(report.batch_size, 2);
}

// ============================================================================
// METS processing
// ============================================================================

const ISSUE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mets:mets xmlns:mets="http://www.loc.gov/METS/">
  <mets:structMap TYPE="LOGICAL">
    <mets:div ID="DIVL1" TYPE="Newspaper">
      <mets:div ID="DIVL3" TYPE="Issue">
        <mets:div ID="DIVL4" TYPE="CONTENT">
          <mets:div ID="DIVL5" TYPE="ARTICLE" LABEL="Front page">
            <mets:div TYPE="BODY_CONTENT">
              <mets:div TYPE="BODY">
                <mets:fptr><mets:area BETYPE="IDREF" BEGIN="P1_TB00001"/></mets:fptr>
              </mets:div>
            </mets:div>
          </mets:div>
        </mets:div>
      </mets:div>
    </mets:div>
  </mets:structMap>
</mets:mets>"#;

#[tokio::test]
async fn test_mets_run_uploads_article_structure() {
    let root = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.insert(descriptor_key("A"), ISSUE);
    store.insert("davar/A/ALTO/A-0001.xml", "<alto/>");
    store.insert("davar/A/ALTO/A-0002.xml", "<alto/>");
    store.insert(descriptor_key("B"), "<mets:mets><unclosed>");
    let config = config(root.path(), 0, 2);
    generate(&store, &config).await;

    let report = run(&store, Arc::new(MetsProcessor::new()), &config)
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);

    let rows = uploaded_rows(&store);
    let ok = rows.iter().find(|r| r.is_success()).unwrap();
    let payload: serde_json::Value = serde_json::from_str(&ok.payload).unwrap();
    assert_eq!(payload["article_count"], 1);
    assert_eq!(payload["alto_pages"], 2);
    assert_eq!(payload["articles"][0]["page"], "1");
    assert_eq!(processed_lines(&store), vec![descriptor_key("A")]);
}
