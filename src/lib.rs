//! # deal-importer
//!
//! Daemon that feeds offline storage deals to a Boost deal service.
//!
//! ## How it works
//!
//! Operators keep CAR files on disk, grouped into datasets listed in a
//! `datasets.json` catalog. On every tick the importer finds one CAR file
//! whose deal is ready for data, hands it to the deal service and records the
//! attempt in a SQLite ledger. A reconciler later moves each recorded deal to
//! `SUCCESS` or `FAILED` as the deal service reports progress.
//!
//! Three modes decide where deals come from:
//! - **default** - clients already proposed offline deals; import them
//! - **pull-dataset** - ask the dataset broker for a deal on a dataset
//! - **pull-cid** - ask the dataset broker for a deal per local CAR file
//!
//! ## Quick Start
//!
//! ```no_run
//! use deal_importer::{Config, Daemon, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.deal_service.auth_token = "boost-token".to_string();
//!
//!     let daemon = Daemon::new(config).await?;
//!
//!     // Run until SIGTERM or Ctrl+C
//!     run_with_shutdown(daemon).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Status REST API
pub mod api;
/// Dataset broker client
pub mod broker;
/// Dataset catalog and CAR file lookup
pub mod catalog;
/// Configuration types
pub mod config;
/// Daemon assembly and lifecycle
pub mod daemon;
/// Database persistence layer
pub mod db;
/// Deal service access
pub mod deal_service;
/// Error types
pub mod error;
/// Import loop
pub mod importer;
/// Ledger reconciliation
pub mod reconciler;
/// Interval loop driver
pub mod ticker;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use broker::{DatasetBroker, HttpBroker};
pub use catalog::{Dataset, DatasetCatalog};
pub use config::{Config, Mode};
pub use daemon::Daemon;
pub use db::Database;
pub use deal_service::{BoostClient, BoostConnector, DealService, DealServiceConnector};
pub use error::{ApiError, DatabaseError, Error, ErrorDetail, Result, ToHttpStatus};
pub use importer::{Importer, TickOutcome};
pub use reconciler::{ReconcileSummary, Reconciler};
pub use types::{
    Checkpoint, DealRecord, DealStats, DealStatus, ImportAttemptResult, ImportedDeal,
    StatusTotals,
};

/// Run the daemon until a termination signal arrives.
///
/// The signal cancels the daemon's shutdown token; this returns once the
/// import loop, the reconciler and the API server have all stopped.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(daemon: Daemon) -> Result<()> {
    let shutdown = daemon.shutdown_token();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.cancel();
    });
    daemon.run().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
