//! Batch execution
//!
//! Data flow for one run:
//!
//! ```text
//! scheduler ──batch──▶ WorkerPool ──ItemReport──▶ CheckpointCommitter
//!                        │   (mpsc)                  │           │
//!                  UnitProcessor               ResultSink   ProcessedSet
//! ```
//!
//! Workers never touch the processed set or the sink; the committer is the
//! only writer of both.

pub mod cache;
pub mod coordinator;
pub mod processor;
pub mod run;
pub mod sink;
pub mod types;
pub mod worker;

pub use cache::{CacheEntry, LocalCache};
pub use coordinator::{CheckpointCommitter, Recovery, Tally};
pub use processor::{ProcessError, UnitProcessor};
pub use run::{run_batch, RunReport};
pub use sink::{Artifact, ResultSink, SinkSettings};
pub use types::{ItemReport, Outcome, RecordStatus, ResultRecord};
pub use worker::{PoolHandle, PoolSettings, WorkerPool};
