//! Command implementations
//!
//! Each subcommand has its own module with a `run` function taking the store
//! it should talk to, so the same code drives S3 in production and an
//! in-memory store in tests.

pub mod cleanup;
pub mod generate;
pub mod report;
pub mod run;
pub mod upload;

use crate::error::{ExitStatus, Result};
use crate::storage::{RemoteStore, S3Store, StorageConfig};
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Connect to the store described by the `S3_*` environment variables
pub async fn connect() -> Result<Arc<dyn RemoteStore>> {
    let config = StorageConfig::from_env()?;
    Ok(Arc::new(S3Store::new(config).await))
}

/// Cancel `token` on Ctrl+C or SIGTERM; a second signal exits at once
pub async fn cancel_on_signal(token: CancellationToken) {
    escalate(shutdown_signal, token, || {
        std::process::exit(ExitStatus::Interrupted.code())
    })
    .await
}

/// First signal cancels `token`, the next one calls `abort`
async fn escalate<S, F>(mut signal: impl FnMut() -> S, token: CancellationToken, abort: F)
where
    S: Future<Output = &'static str>,
    F: FnOnce(),
{
    let name = signal().await;
    warn!("Received {name}, finishing in-flight items, send it again to abort");
    token.cancel();

    let name = signal().await;
    warn!("Received {name} again, aborting without checkpointing in-flight items");
    abort();
}

/// Wait for Ctrl+C or SIGTERM and name it
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "Ctrl+C",
        _ = terminate => "SIGTERM",
    }
}
