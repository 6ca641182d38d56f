//! Moves pending ledger rows to their final status
//!
//! A row recorded as `PENDING` becomes `SUCCESS` once the deal service
//! reports the deal proving, and `FAILED` once its message starts with
//! the error marker. Anything else leaves the row pending for the next
//! pass. Each pass opens its own deal service connection.

use crate::db::Database;
use crate::deal_service::{DealService, DealServiceConnector, messages};
use crate::error::Result;
use crate::ticker::Ticker;
use crate::types::{DealStatus, ImportedDeal};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Counts from one reconciliation pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Pending rows looked at
    pub checked: usize,
    /// Rows moved to `SUCCESS`
    pub succeeded: usize,
    /// Rows moved to `FAILED`
    pub failed: usize,
    /// Rows left pending
    pub unchanged: usize,
    /// Rows whose lookup failed
    pub errors: usize,
}

/// Status a deal service message maps to, if any
pub fn status_for_message(message: &str) -> Option<DealStatus> {
    if message == messages::SEALER_PROVING {
        Some(DealStatus::Success)
    } else if message.starts_with(messages::ERROR_PREFIX) {
        Some(DealStatus::Failed)
    } else {
        None
    }
}

/// Background reconciliation of the deal ledger
pub struct Reconciler {
    db: Arc<Database>,
    connector: Arc<dyn DealServiceConnector>,
}

impl Reconciler {
    /// Reconciler over `db`, connecting through `connector`
    pub fn new(db: Arc<Database>, connector: Arc<dyn DealServiceConnector>) -> Self {
        Self { db, connector }
    }

    /// Check every pending row once
    ///
    /// Failing to connect or to read the pending rows fails the pass. A
    /// failed lookup or update for one row is logged and counted, and the
    /// pass moves on.
    pub async fn reconcile_pass(&self) -> Result<ReconcileSummary> {
        let service = self.connector.connect().await?;
        let pending = self.db.pending_deals().await?;
        let mut summary = ReconcileSummary::default();

        for row in &pending {
            summary.checked += 1;
            match self.reconcile_row(service.as_ref(), row).await {
                Ok(Some(DealStatus::Success)) => summary.succeeded += 1,
                Ok(Some(DealStatus::Failed)) => summary.failed += 1,
                Ok(_) => summary.unchanged += 1,
                Err(e) => {
                    summary.errors += 1;
                    error!(row_id = row.id, deal_id = %row.deal_uuid, error = %e, "Failed to reconcile deal");
                }
            }
        }

        if summary.checked > 0 {
            info!(
                checked = summary.checked,
                succeeded = summary.succeeded,
                failed = summary.failed,
                errors = summary.errors,
                "Reconciliation pass finished"
            );
        }
        Ok(summary)
    }

    async fn reconcile_row(
        &self,
        service: &dyn DealService,
        row: &ImportedDeal,
    ) -> Result<Option<DealStatus>> {
        let Some(deal) = service.deal_by_id(&row.deal_uuid).await? else {
            debug!(deal_id = %row.deal_uuid, "Deal not known to deal service yet");
            return Ok(None);
        };

        let Some(status) = status_for_message(&deal.message) else {
            return Ok(None);
        };

        if self.db.update_deal_status(row.id, status).await? {
            info!(
                row_id = row.id,
                deal_id = %row.deal_uuid,
                status = %status,
                message = %deal.message,
                "Deal reached final status"
            );
            Ok(Some(status))
        } else {
            Ok(None)
        }
    }

    /// Reconcile on every tick until cancelled
    pub async fn run(&self, ticker: &Ticker) {
        info!(interval_secs = ticker.interval().as_secs(), "Reconciler started");

        while !ticker.is_cancelled() {
            if let Err(e) = self.reconcile_pass().await {
                error!(error = %e, "Reconciliation pass failed");
            }
            if !ticker.wait().await {
                break;
            }
        }

        info!("Reconciler stopped");
    }
}
