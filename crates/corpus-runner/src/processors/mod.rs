//! Bundled [`UnitProcessor`] implementations

use crate::pipeline::UnitProcessor;
use clap::ValueEnum;
use std::sync::Arc;

pub mod alto;
pub mod dry_run;
pub mod mets;

pub use dry_run::DryRunProcessor;
pub use mets::MetsProcessor;

/// Processor selected with `run --processor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ProcessorKind {
    /// Extract the article structure of each METS descriptor
    #[default]
    Mets,
    /// Download inputs and record their size without parsing anything
    DryRun,
}

impl ProcessorKind {
    pub fn build(self) -> Arc<dyn UnitProcessor> {
        match self {
            ProcessorKind::Mets => Arc::new(MetsProcessor::new()),
            ProcessorKind::DryRun => Arc::new(DryRunProcessor),
        }
    }
}
