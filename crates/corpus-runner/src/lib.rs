//! Corpus Runner Library
//!
//! Resumable batch processing of a document corpus held in an S3-compatible
//! object store.
//!
//! # Overview
//!
//! - **Manifest**: every work item of the corpus, generated once from a
//!   bucket listing (`corpus-runner generate`)
//! - **Processed set**: the items already done, flushed back to the store
//!   after each checkpoint
//! - **Runs**: each `corpus-runner run` takes the next bounded batch of
//!   unprocessed items, downloads them, runs a [`pipeline::UnitProcessor`]
//!   on each and uploads one CSV result file
//!
//! An interrupted run loses nothing: every result row is synced to disk
//! before its item is marked done, and leftover result files are recovered
//! by the next run.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod commands;
pub mod config;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod processors;
pub mod progress;
pub mod scheduler;
pub mod storage;

pub use config::RunnerConfig;
pub use error::{ExitStatus, Result, RunnerError};
pub use manifest::{Manifest, WorkItem};

use clap::{Parser, Subcommand};
use processors::ProcessorKind;

const EXIT_STATUS_HELP: &str = "\
Exit status:
  0    success
  1    unexpected error
  2    usage error
  3    corpus manifest missing
  4    remote store unavailable
  5    configuration error
  10   nothing to do, every item is processed
  130  interrupted after a clean checkpoint";

/// Corpus Runner - resumable distributed corpus processing
#[derive(Parser, Debug)]
#[command(name = "corpus-runner")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
#[command(after_help = EXIT_STATUS_HELP)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Remote key of the corpus manifest
    #[arg(long, env = "CORPUS_MANIFEST_KEY", global = true)]
    pub manifest_key: Option<String>,

    /// Remote key of the processed manifest
    #[arg(long, env = "CORPUS_PROCESSED_KEY", global = true)]
    pub processed_key: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the corpus manifest from a listing of the bucket
    Generate {
        /// Rebuild even if a manifest already exists
        #[arg(long)]
        force_refresh: bool,

        /// Only write the local mirror, do not upload
        #[arg(long)]
        skip_upload: bool,
    },

    /// Show manifest sizes and how much of the corpus is processed
    Report,

    /// Process the next batch of unprocessed items
    Run {
        /// Parallel workers (defaults to the number of CPUs)
        #[arg(short = 'n', long, env = "CORPUS_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Items in this batch, 0 for all remaining
        #[arg(short = 'l', long, env = "CORPUS_MAX_FILES")]
        max_files: Option<usize>,

        /// Successes between two checkpoints of the processed manifest
        #[arg(short = 'c', long, env = "CORPUS_CHECKPOINT_EVERY")]
        checkpoint_every: Option<usize>,

        /// Start a new result file every N rows
        #[arg(long, env = "CORPUS_UPLOAD_EVERY")]
        upload_every: Option<usize>,

        /// Processing applied to each item
        #[arg(short, long, value_enum, default_value_t = ProcessorKind::Mets)]
        processor: ProcessorKind,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Re-upload the local manifest mirrors to the store
    Upload,

    /// Delete the processed manifest so the whole corpus is processed again
    CleanupProcessed {
        /// Confirm the deletion
        #[arg(short, long)]
        yes: bool,
    },
}

impl Cli {
    /// Apply command-line overrides on top of `config`
    pub fn apply(&self, config: &mut RunnerConfig) {
        if let Some(key) = &self.manifest_key {
            config.manifest_key = key.clone();
        }
        if let Some(key) = &self.processed_key {
            config.processed_key = key.clone();
        }

        if let Commands::Run {
            concurrency,
            max_files,
            checkpoint_every,
            upload_every,
            no_progress,
            ..
        } = &self.command
        {
            if let Some(n) = concurrency {
                config.set_concurrency(*n);
            }
            if let Some(max) = max_files {
                config.set_max_files(*max);
            }
            if let Some(n) = checkpoint_every {
                config.set_checkpoint_every(*n);
            }
            if upload_every.is_some() {
                config.set_upload_every(*upload_every);
            }
            if *no_progress {
                config.show_progress = false;
            }
        }
    }
}
