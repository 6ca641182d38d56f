//! Per-mode candidate selection
//!
//! Each call looks at one dataset and makes at most one import attempt.
//! Every piece CID is marked in the [`AttemptLedger`] the moment it is first
//! examined, before any eligibility check, so no CID is looked at twice in
//! the same process, across datasets and modes alike.

use super::executor::ImportExecutor;
use super::ledger::AttemptLedger;
use super::waiter::MaterializationWaiter;
use crate::broker::DatasetBroker;
use crate::catalog::{Dataset, ImportedCidCache};
use crate::config::Mode;
use crate::deal_service::DealService;
use crate::error::{Error, Result};
use crate::types::{DealRecord, ImportAttemptResult};
use crate::utils;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What selection in one dataset came to
#[derive(Debug)]
pub enum Selection {
    /// One import was attempted; the tick is over
    Attempted(ImportAttemptResult),
    /// Nothing eligible here; move on to the next dataset
    Exhausted,
    /// An upstream call failed; the importer moves on to the next dataset
    Aborted(Error),
}

/// Finds at most one importable deal per dataset
pub struct CandidateSelector {
    ledger: AttemptLedger,
    caches: HashMap<String, ImportedCidCache>,
    broker: Option<Arc<dyn DatasetBroker>>,
    waiter: MaterializationWaiter,
    executor: ImportExecutor,
    min_sealing_time: Duration,
}

impl CandidateSelector {
    /// Selector with an empty attempt ledger
    pub fn new(
        broker: Option<Arc<dyn DatasetBroker>>,
        waiter: MaterializationWaiter,
        executor: ImportExecutor,
        min_sealing_time: Duration,
    ) -> Self {
        Self {
            ledger: AttemptLedger::new(),
            caches: HashMap::new(),
            broker,
            waiter,
            executor,
            min_sealing_time,
        }
    }

    /// CIDs examined so far
    pub fn ledger(&self) -> &AttemptLedger {
        &self.ledger
    }

    /// Drop every dataset's imported-CID cache so the next pull-cid tick reseeds it
    pub fn invalidate_caches(&mut self) {
        for cache in self.caches.values_mut() {
            cache.invalidate();
        }
    }

    /// Run the strategy for `mode` against one dataset
    pub async fn select(
        &mut self,
        mode: Mode,
        service: &dyn DealService,
        dataset: &Dataset,
    ) -> Selection {
        let result = match mode {
            Mode::Default => self.select_default(service, dataset).await,
            Mode::PullDataset => self.select_pull_dataset(service, dataset).await,
            Mode::PullCid => self.select_pull_cid(service, dataset).await,
        };

        match result {
            Ok(Some(attempt)) => Selection::Attempted(attempt),
            Ok(None) => Selection::Exhausted,
            Err(e) => Selection::Aborted(e),
        }
    }

    async fn select_default(
        &mut self,
        service: &dyn DealService,
        dataset: &Dataset,
    ) -> Result<Option<ImportAttemptResult>> {
        let awaiting = service.deals_awaiting_import(&dataset.addresses).await?;
        debug!(dataset = %dataset.name, candidates = awaiting.len(), "Deals awaiting import");

        // The deal service lists newest first; the oldest deals are closest to their deadline
        for deal in awaiting.iter().rev() {
            if !self.ledger.mark(&deal.piece_cid) {
                continue;
            }

            if !self.starts_late_enough(deal) {
                debug!(
                    deal_id = %deal.id,
                    piece_cid = %deal.piece_cid,
                    start_epoch = %deal.start_epoch.height,
                    "Deal starts too soon to seal, skipping"
                );
                continue;
            }

            if service.has_content_mismatch(&deal.piece_cid).await? {
                warn!(piece_cid = %deal.piece_cid, "Piece previously failed with commp mismatch, skipping");
                continue;
            }

            let Some(path) = dataset.car_file_path(&deal.piece_cid) else {
                debug!(piece_cid = %deal.piece_cid, dataset = %dataset.name, "No CAR path for piece");
                continue;
            };
            if !utils::is_file(&path).await {
                info!(path = %path.display(), deal_id = %deal.id, "CAR file not found, skipping");
                continue;
            }

            let Some(deal_id) = parse_deal_id(&deal.id) else {
                continue;
            };

            let attempt = self
                .executor
                .execute(service, &path, &deal.piece_cid, deal_id)
                .await;
            return Ok(Some(attempt));
        }

        Ok(None)
    }

    async fn select_pull_dataset(
        &mut self,
        service: &dyn DealService,
        dataset: &Dataset,
    ) -> Result<Option<ImportAttemptResult>> {
        let broker = self.broker()?;
        let piece_cid = broker.request_deal_for_dataset(&dataset.name).await?;
        info!(dataset = %dataset.name, piece_cid = %piece_cid, "Broker made a deal");

        if !self.ledger.mark(&piece_cid) {
            info!(piece_cid = %piece_cid, "Piece already attempted in this run, skipping");
            return Ok(None);
        }

        let expected_path = dataset.car_file_path(&piece_cid);
        let ready = match self.waiter.wait(service, &piece_cid).await {
            Ok(ready) => ready,
            Err(e @ Error::NotMaterialized { .. }) => {
                let size = size_or_zero(expected_path.as_deref()).await;
                return Ok(Some(not_materialized(&piece_cid, size, e)));
            }
            Err(e) => return Err(e),
        };

        let Some(deal) = ready.first() else {
            return Ok(None);
        };
        let Some(path) = expected_path else {
            error!(dataset = %dataset.name, piece_cid = %piece_cid, "No CAR path for brokered piece");
            return Ok(None);
        };
        if !utils::is_file(&path).await {
            error!(path = %path.display(), piece_cid = %piece_cid, "CAR file for brokered deal not found");
            return Ok(None);
        }
        let Some(deal_id) = parse_deal_id(&deal.id) else {
            return Ok(None);
        };

        Ok(Some(
            self.executor
                .execute(service, &path, &deal.piece_cid, deal_id)
                .await,
        ))
    }

    async fn select_pull_cid(
        &mut self,
        service: &dyn DealService,
        dataset: &Dataset,
    ) -> Result<Option<ImportAttemptResult>> {
        let broker = self.broker()?;

        let cache = self.caches.entry(dataset.name.clone()).or_default();
        if !cache.is_populated() {
            let known = known_piece_cids(service, dataset).await?;
            cache.populate(known);
            debug!(dataset = %dataset.name, cids = cache.len(), "Seeded imported-CID cache");
        }

        let paths = match dataset.car_file_paths().await {
            Ok(paths) => paths,
            Err(e) => {
                error!(dataset = %dataset.name, error = %e, "Could not list CAR files, skipping dataset");
                return Ok(None);
            }
        };

        for path in paths {
            let Some(piece_cid) = utils::file_stem(&path) else {
                continue;
            };
            if cache.contains(&piece_cid) || !self.ledger.mark(&piece_cid) {
                continue;
            }

            if service.has_content_mismatch(&piece_cid).await? {
                warn!(piece_cid = %piece_cid, "Piece previously failed with commp mismatch, skipping");
                continue;
            }

            let granted = broker.request_deal_for_cid(&piece_cid).await?;
            if granted != piece_cid {
                warn!(piece_cid = %piece_cid, granted = %granted, "Broker made a deal for a different piece, skipping");
                continue;
            }
            info!(piece_cid = %piece_cid, "Broker made a deal");

            let ready = match self.waiter.wait(service, &piece_cid).await {
                Ok(ready) => ready,
                Err(e @ Error::NotMaterialized { .. }) => {
                    let size = size_or_zero(Some(&path)).await;
                    return Ok(Some(not_materialized(&piece_cid, size, e)));
                }
                Err(e) => return Err(e),
            };

            let Some(deal_id) = ready.first().and_then(|d| parse_deal_id(&d.id)) else {
                return Ok(None);
            };

            return Ok(Some(
                self.executor
                    .execute(service, &path, &piece_cid, deal_id)
                    .await,
            ));
        }

        Ok(None)
    }

    fn broker(&self) -> Result<Arc<dyn DatasetBroker>> {
        self.broker
            .clone()
            .ok_or_else(|| Error::config("pull modes need a dataset broker", "broker.url"))
    }

    fn starts_late_enough(&self, deal: &DealRecord) -> bool {
        let Some(start) = deal.start_epoch.to_datetime() else {
            return false;
        };
        let Ok(min_sealing) = chrono::Duration::from_std(self.min_sealing_time) else {
            return false;
        };
        start >= Utc::now() + min_sealing
    }
}

/// CIDs a dataset's clients already have proving or in the pipeline
async fn known_piece_cids(service: &dyn DealService, dataset: &Dataset) -> Result<Vec<String>> {
    let mut cids = Vec::new();
    for address in &dataset.addresses {
        cids.extend(
            service
                .completed_deals(address)
                .await?
                .into_iter()
                .map(|d| d.piece_cid),
        );
    }
    cids.extend(
        service
            .deals_in_pipeline()
            .await?
            .into_iter()
            .map(|d| d.piece_cid),
    );
    Ok(cids)
}

fn parse_deal_id(id: &str) -> Option<Uuid> {
    match Uuid::parse_str(id) {
        Ok(uuid) => Some(uuid),
        Err(e) => {
            let err = Error::InvalidDealId {
                id: id.to_string(),
                reason: e.to_string(),
            };
            error!(error = %err, "Skipping deal");
            None
        }
    }
}

fn not_materialized(piece_cid: &str, size_bytes: u64, err: Error) -> ImportAttemptResult {
    error!(piece_cid = %piece_cid, error = %err, "Requested deal never became ready");
    ImportAttemptResult::failed("", piece_cid, size_bytes, err.to_string())
}

async fn size_or_zero(path: Option<&Path>) -> u64 {
    match path {
        Some(path) => utils::file_size(path).await.unwrap_or(0),
        None => 0,
    }
}
