//! Corpus Runner - Main entry point

use clap::Parser;
use colored::Colorize;
use corpus_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use corpus_runner::{commands, Cli, Commands, ExitStatus, RunnerConfig};
use std::process;
use tracing::{error, warn};

const LOG_FILTER: &str = "aws_config=warn,aws_smithy_runtime=warn,hyper=warn";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A missing .env is fine
    dotenvy::dotenv().ok();

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .output(LogOutput::Both)
        .log_file_prefix("corpus-runner")
        .filter_directives(LOG_FILTER)
        .build();
    let log_config = log_config.clone().with_env_overrides().unwrap_or(log_config);

    let guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        }
    };

    let code = match execute(&cli).await {
        Ok(status) => {
            if status == ExitStatus::Interrupted {
                warn!("Stopped by signal");
            }
            status.code()
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("{} {}", "Error:".red().bold(), e);
            e.exit_status().code()
        }
    };

    drop(guard);
    process::exit(code);
}

async fn execute(cli: &Cli) -> corpus_runner::Result<ExitStatus> {
    let mut config = RunnerConfig::from_env()?;
    cli.apply(&mut config);
    config.validate()?;

    let store = commands::connect().await?;

    match &cli.command {
        Commands::Generate {
            force_refresh,
            skip_upload,
        } => commands::generate::run(store, &config, *force_refresh, *skip_upload).await,

        Commands::Report => commands::report::run(store, &config).await,

        Commands::Run { processor, .. } => {
            commands::run::run(store, processor.build(), &config).await
        }

        Commands::Upload => commands::upload::run(store, &config).await,

        Commands::CleanupProcessed { yes } => {
            commands::cleanup::run(store, &config, *yes).await
        }
    }
}
