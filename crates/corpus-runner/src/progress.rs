//! Progress reporting
//!
//! A terminal bar for the batch in flight, and the corpus-level
//! "processed so far" line that is logged at run start, after each
//! checkpoint and printed by `report`.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fmt;

const BATCH_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} items ({eta}) {msg}";

/// Bar for the items of one batch; hidden when progress output is off
pub fn create_batch_progress(total: usize, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template(BATCH_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// How much of the corpus is done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressReport {
    pub total: usize,
    pub processed: usize,
}

impl ProgressReport {
    pub fn new(total: usize, processed: usize) -> Self {
        Self { total, processed }
    }

    /// Percentage of the corpus processed; an empty corpus counts as done
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 * 100.0 / self.total as f64
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.processed)
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total in corpus: {} - processed already {} ({:.2}% done)",
            self.total,
            self.processed,
            self.percent()
        )
    }
}
