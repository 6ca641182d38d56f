//! Daemon assembly and lifecycle
//!
//! [`Daemon::new`] prepares the data directory, opens the ledger, loads the
//! dataset catalog and builds the deal service and broker clients.
//! [`Daemon::run`] then drives three tasks off one cancellation token: the
//! status API, the reconciler and the import loop.

use crate::api;
use crate::broker::{DatasetBroker, HttpBroker};
use crate::catalog::DatasetCatalog;
use crate::config::Config;
use crate::db::Database;
use crate::deal_service::{BoostConnector, DealServiceConnector};
use crate::error::{Error, Result};
use crate::importer::Importer;
use crate::reconciler::Reconciler;
use crate::ticker::Ticker;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A fully wired importer daemon
pub struct Daemon {
    config: Arc<Config>,
    db: Arc<Database>,
    importer: Importer,
    reconciler: Reconciler,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Build the daemon with the Boost deal service and the HTTP broker
    ///
    /// The broker client is only created in the pull modes.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let connector: Arc<dyn DealServiceConnector> =
            Arc::new(BoostConnector::new(config.deal_service.clone()));
        let broker: Option<Arc<dyn DatasetBroker>> = if config.mode.is_pull() {
            Some(Arc::new(HttpBroker::new(&config.broker)?))
        } else {
            None
        };

        Self::with_collaborators(config, connector, broker).await
    }

    /// Build the daemon around the given deal service and broker
    pub async fn with_collaborators(
        config: Config,
        connector: Arc<dyn DealServiceConnector>,
        broker: Option<Arc<dyn DatasetBroker>>,
    ) -> Result<Self> {
        let data_dir = config.persistence.resolved_data_dir();
        tokio::fs::create_dir_all(&data_dir).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create data directory '{}': {}",
                    data_dir.display(),
                    e
                ),
            ))
        })?;

        let catalog = DatasetCatalog::load(&config.persistence.datasets_path()).await?;
        let db = Arc::new(Database::new(&config.persistence.database_path()).await?);

        let importer = Importer::new(&config, catalog, connector.clone(), broker, db.clone());
        let reconciler = Reconciler::new(db.clone(), connector);

        Ok(Self {
            config: Arc::new(config),
            db,
            importer,
            reconciler,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops [`Daemon::run`] when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Shared handle to the deal ledger
    pub fn database(&self) -> Arc<Database> {
        self.db.clone()
    }

    /// Run until the shutdown token is cancelled
    ///
    /// An API server that fails to start cancels the token too, so the
    /// import loop does not run headless. The ledger is closed once every
    /// task has finished.
    pub async fn run(self) -> Result<()> {
        let Daemon {
            config,
            db,
            mut importer,
            reconciler,
            shutdown,
        } = self;

        tracing::info!(
            mode = %config.mode,
            interval_secs = config.import.interval.as_secs(),
            max_concurrent = config.import.max_concurrent,
            data_dir = %config.persistence.resolved_data_dir().display(),
            api_address = %config.api.bind_address,
            "Starting deal importer"
        );

        let api_task = {
            let db = db.clone();
            let config = config.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let result = api::start_api_server(db, config, shutdown.clone()).await;
                if let Err(e) = &result {
                    tracing::error!(error = %e, "API server failed, shutting down");
                    shutdown.cancel();
                }
                result
            })
        };

        let reconcile_ticker = Ticker::new(config.import.reconcile_interval(), shutdown.clone());
        let reconcile_task = tokio::spawn(async move {
            reconciler.run(&reconcile_ticker).await;
        });

        let import_ticker = Ticker::new(config.import.interval, shutdown.clone());
        importer.run(&import_ticker).await;
        drop(importer);

        if let Err(e) = reconcile_task.await {
            tracing::error!(error = %e, "Reconciler task panicked");
        }

        let api_result = match api_task.await {
            Ok(result) => result,
            Err(e) => Err(Error::ApiServerError(format!("API server task panicked: {e}"))),
        };

        match Arc::try_unwrap(db) {
            Ok(db) => {
                db.close().await;
                tracing::info!("Deal ledger closed");
            }
            Err(_) => {
                tracing::warn!("Deal ledger still shared, leaving the pool to close on drop");
            }
        }

        tracing::info!("Deal importer stopped");
        api_result
    }
}
