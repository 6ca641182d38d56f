//! Import orchestration
//!
//! One tick of the importer:
//!
//! 1. Open a fresh deal service connection.
//! 2. Admission control: with a non-zero ceiling, count the deals in the
//!    sealing pipeline and skip the tick once the ceiling is reached.
//! 3. Walk the datasets in catalog order, handing each to the
//!    [`CandidateSelector`] until one attempt is made. A dataset whose
//!    search fails upstream is logged and passed over.
//! 4. Record the attempt, accepted or not, in the deal ledger.
//!
//! Ticks run strictly one after another, so at most one import is in
//! flight at any time.

mod executor;
mod ledger;
mod selector;
mod waiter;

pub use executor::ImportExecutor;
pub use ledger::AttemptLedger;
pub use selector::{CandidateSelector, Selection};
pub use waiter::MaterializationWaiter;

use crate::broker::DatasetBroker;
use crate::catalog::DatasetCatalog;
use crate::config::{Config, Mode};
use crate::db::Database;
use crate::deal_service::DealServiceConnector;
use crate::error::Result;
use crate::ticker::Ticker;
use crate::types::ImportAttemptResult;
use std::sync::Arc;
use tracing::{debug, error, info};

/// What a single tick did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The sealing pipeline is full
    AtCapacity {
        /// Deals currently in the pipeline
        in_pipeline: usize,
        /// Configured ceiling
        ceiling: usize,
    },
    /// One import was attempted and recorded
    Attempted {
        /// Ledger row of the attempt
        row_id: i64,
        /// The attempt itself
        result: ImportAttemptResult,
    },
    /// No attempt was made and at least one dataset search failed upstream
    Aborted {
        /// First dataset whose search failed
        dataset: String,
    },
    /// No dataset had an eligible candidate
    Idle,
}

/// Drives the import loop
pub struct Importer {
    mode: Mode,
    max_concurrent: usize,
    catalog: DatasetCatalog,
    connector: Arc<dyn DealServiceConnector>,
    db: Arc<Database>,
    selector: CandidateSelector,
}

impl Importer {
    /// Build an importer from the daemon configuration
    ///
    /// `broker` is only consulted in the pull modes.
    pub fn new(
        config: &Config,
        catalog: DatasetCatalog,
        connector: Arc<dyn DealServiceConnector>,
        broker: Option<Arc<dyn DatasetBroker>>,
        db: Arc<Database>,
    ) -> Self {
        let selector = CandidateSelector::new(
            broker,
            MaterializationWaiter::new(config.materialization.clone()),
            ImportExecutor::new(
                config.import.staging_dir.clone(),
                config.import.delete_after_import,
            ),
            config.import.min_sealing_time,
        );

        Self {
            mode: config.mode,
            max_concurrent: config.import.max_concurrent,
            catalog,
            connector,
            db,
            selector,
        }
    }

    /// Operating mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// CIDs examined so far in this process
    pub fn ledger(&self) -> &AttemptLedger {
        self.selector.ledger()
    }

    /// Force the pull-cid caches to be reseeded on the next tick
    pub fn invalidate_caches(&mut self) {
        self.selector.invalidate_caches();
    }

    /// Run one tick
    ///
    /// Connection, pipeline query and ledger write errors end the tick;
    /// the caller logs them and tries again next tick. A failed upstream
    /// call during selection is logged here and the walk moves on to the
    /// next dataset; if no dataset yields an attempt the tick reports
    /// [`TickOutcome::Aborted`] for the first one that failed.
    pub async fn run_tick(&mut self) -> Result<TickOutcome> {
        let service = self.connector.connect().await?;

        if self.max_concurrent != 0 {
            let in_pipeline = service.deals_in_pipeline().await?.len();
            if in_pipeline >= self.max_concurrent {
                info!(
                    in_pipeline,
                    ceiling = self.max_concurrent,
                    "Sealing pipeline full, skipping import"
                );
                return Ok(TickOutcome::AtCapacity {
                    in_pipeline,
                    ceiling: self.max_concurrent,
                });
            }
            debug!(in_pipeline, ceiling = self.max_concurrent, "Pipeline has room");
        }

        let mut aborted: Option<String> = None;
        for dataset in self.catalog.datasets() {
            match self.selector.select(self.mode, service.as_ref(), dataset).await {
                Selection::Attempted(result) => {
                    let row_id = self.db.insert_deal(&result, self.mode).await?;
                    info!(
                        row_id,
                        dataset = %dataset.name,
                        deal_id = %result.deal_id,
                        piece_cid = %result.piece_cid,
                        success = result.success,
                        "Recorded import attempt"
                    );
                    return Ok(TickOutcome::Attempted { row_id, result });
                }
                Selection::Exhausted => {
                    debug!(dataset = %dataset.name, "No eligible candidate in dataset");
                }
                Selection::Aborted(e) => {
                    error!(dataset = %dataset.name, error = %e, "Candidate search aborted");
                    if aborted.is_none() {
                        aborted = Some(dataset.name.clone());
                    }
                }
            }
        }

        Ok(match aborted {
            Some(dataset) => TickOutcome::Aborted { dataset },
            None => TickOutcome::Idle,
        })
    }

    /// Tick until the ticker is cancelled
    pub async fn run(&mut self, ticker: &Ticker) {
        info!(
            mode = %self.mode,
            interval_secs = ticker.interval().as_secs(),
            datasets = self.catalog.len(),
            "Importer started"
        );

        while !ticker.is_cancelled() {
            if let Err(e) = self.run_tick().await {
                error!(error = %e, "Import tick failed");
            }
            if !ticker.wait().await {
                break;
            }
        }

        info!(attempted = self.ledger().len(), "Importer stopped");
    }
}
