//! `corpus-runner run` command implementation

use super::cancel_on_signal;
use crate::config::RunnerConfig;
use crate::error::{ExitStatus, Result};
use crate::pipeline::{run_batch, RunReport, UnitProcessor};
use crate::storage::RemoteStore;
use colored::Colorize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Process one batch, stopping cleanly on Ctrl+C or SIGTERM
pub async fn run(
    store: Arc<dyn RemoteStore>,
    processor: Arc<dyn UnitProcessor>,
    config: &RunnerConfig,
) -> Result<ExitStatus> {
    let cancel = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_signal(cancel.clone()));

    let result = run_batch(store, processor, config, cancel).await;
    signals.abort();

    let report = result?;
    print_summary(&report);
    Ok(report.exit_status())
}

fn print_summary(report: &RunReport) {
    println!();
    println!("{} {}", "Run".cyan().bold(), report.run_id.cyan());
    println!("  Host:       {}", report.host);
    println!("  Processor:  {}", report.processor);

    if report.batch_size == 0 && report.recovered.is_empty() {
        println!("  {}", "Nothing to do, the whole corpus is processed.".green());
        println!("  {}", report.progress);
        return;
    }

    println!(
        "  Batch:      {} items on {} workers",
        report.batch_size, report.concurrency
    );
    println!("  Succeeded:  {}", report.succeeded.to_string().green());
    if report.failed > 0 {
        println!("  Failed:     {}", report.failed.to_string().red());
    } else {
        println!("  Failed:     0");
    }
    if report.duplicates > 0 {
        println!("  Duplicates: {}", report.duplicates.to_string().yellow());
    }
    if report.skipped > 0 {
        println!("  Skipped:    {}", report.skipped.to_string().yellow());
    }

    for artifact in report.recovered.iter().chain(&report.artifacts) {
        println!(
            "  {} {} ({} rows, kept at {})",
            "✓".green(),
            artifact.remote_key,
            artifact.rows,
            artifact.local_path.display()
        );
    }

    println!();
    println!("  {}", report.progress);
    println!("  Backlog: {} items", report.backlog);

    if report.interrupted {
        println!(
            "{}",
            "Interrupted: in-flight items were finished and checkpointed.".yellow()
        );
    }
}
