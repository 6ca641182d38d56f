//! Shared in-memory collaborators for unit tests.

use crate::broker::DatasetBroker;
use crate::deal_service::{DealQuery, DealService, DealServiceConnector, ImportOutcome};
use crate::error::{Error, Result};
use crate::types::{ChainEpoch, Checkpoint, DealRecord};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A deal with a start epoch comfortably in the future
pub(crate) fn deal(id: &str, piece_cid: &str, checkpoint: Checkpoint, message: &str) -> DealRecord {
    DealRecord {
        id: id.to_string(),
        message: message.to_string(),
        piece_cid: piece_cid.to_string(),
        is_offline: true,
        client_address: "f1client".to_string(),
        checkpoint,
        start_epoch: epoch_in_hours(72),
        inbound_file_path: String::new(),
        err: String::new(),
    }
}

/// Chain epoch roughly `hours` from now
pub(crate) fn epoch_in_hours(hours: i64) -> ChainEpoch {
    let unix = Utc::now().timestamp() + hours * 3600;
    ChainEpoch::new(crate::utils::unix_to_height(unix))
}

/// One recorded `import_offline_deal` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ImportCall {
    pub deal_id: Uuid,
    pub file_path: PathBuf,
    pub delete_after_import: bool,
}

/// Deal service backed by a vector of deals
///
/// Search terms match a deal's ID, piece CID or client address exactly.
#[derive(Default)]
pub(crate) struct MockDealService {
    deals: Mutex<Vec<DealRecord>>,
    reveals: Mutex<Vec<(usize, DealRecord)>>,
    queries: Mutex<Vec<DealQuery>>,
    imports: Mutex<Vec<ImportCall>>,
    outcome: Mutex<Option<ImportOutcome>>,
    fail_queries: AtomicBool,
    failing_terms: Mutex<Vec<String>>,
    fail_imports: AtomicBool,
}

impl MockDealService {
    pub fn new(deals: Vec<DealRecord>) -> Self {
        Self {
            deals: Mutex::new(deals),
            ..Default::default()
        }
    }

    /// Make `deal` visible from the `nth` query onwards (1-based)
    pub fn reveal_after(&self, nth: usize, deal: DealRecord) {
        self.reveals.lock().unwrap().push((nth, deal));
    }

    pub fn set_deals(&self, deals: Vec<DealRecord>) {
        *self.deals.lock().unwrap() = deals;
    }

    pub fn reject_imports(&self, reason: &str) {
        *self.outcome.lock().unwrap() = Some(ImportOutcome::Rejected(reason.to_string()));
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Fail only the queries searching for `term`
    pub fn fail_searches_for(&self, term: &str) {
        self.failing_terms.lock().unwrap().push(term.to_string());
    }

    pub fn fail_imports(&self, fail: bool) {
        self.fail_imports.store(fail, Ordering::SeqCst);
    }

    pub fn queries(&self) -> Vec<DealQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn imports(&self) -> Vec<ImportCall> {
        self.imports.lock().unwrap().clone()
    }

    /// How many queries searched for this term
    pub fn searches_for(&self, term: &str) -> usize {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.search.as_deref() == Some(term))
            .count()
    }
}

#[async_trait]
impl DealService for MockDealService {
    async fn query_deals(&self, query: &DealQuery) -> Result<Vec<DealRecord>> {
        let count = {
            let mut queries = self.queries.lock().unwrap();
            queries.push(query.clone());
            queries.len()
        };

        let term_fails = query
            .search
            .as_ref()
            .is_some_and(|term| self.failing_terms.lock().unwrap().contains(term));
        if self.fail_queries.load(Ordering::SeqCst) || term_fails {
            return Err(Error::DealService("connection refused".into()));
        }

        let mut visible = self.deals.lock().unwrap().clone();
        visible.extend(
            self.reveals
                .lock()
                .unwrap()
                .iter()
                .filter(|(nth, _)| count >= *nth)
                .map(|(_, d)| d.clone()),
        );

        let mut matched: Vec<DealRecord> = visible
            .into_iter()
            .filter(|d| query.matches_filter(d))
            .filter(|d| match query.search.as_deref() {
                Some(term) => d.id == term || d.piece_cid == term || d.client_address == term,
                None => true,
            })
            .collect();

        if let Some(limit) = query.limit {
            matched.truncate(limit as usize);
        }
        Ok(matched)
    }

    async fn import_offline_deal(
        &self,
        deal_id: Uuid,
        file_path: &Path,
        delete_after_import: bool,
    ) -> Result<ImportOutcome> {
        self.imports.lock().unwrap().push(ImportCall {
            deal_id,
            file_path: file_path.to_path_buf(),
            delete_after_import,
        });

        if self.fail_imports.load(Ordering::SeqCst) {
            return Err(Error::DealService("rpc: connection reset".into()));
        }

        Ok(self
            .outcome
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(ImportOutcome::Accepted))
    }
}

/// Connector that always hands out the same mock
pub(crate) struct StaticConnector {
    service: Arc<MockDealService>,
    connects: AtomicUsize,
    fail: AtomicBool,
}

impl StaticConnector {
    pub fn new(service: Arc<MockDealService>) -> Self {
        Self {
            service,
            connects: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DealServiceConnector for StaticConnector {
    async fn connect(&self) -> Result<Arc<dyn DealService>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::DealService("deal service unreachable".into()));
        }
        let service: Arc<dyn DealService> = self.service.clone();
        Ok(service)
    }
}

/// Broker with canned answers per dataset name / CID
#[derive(Default)]
pub(crate) struct MockBroker {
    by_dataset: Mutex<HashMap<String, String>>,
    by_cid: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant_dataset(&self, dataset: &str, piece_cid: &str) {
        self.by_dataset
            .lock()
            .unwrap()
            .insert(dataset.to_string(), piece_cid.to_string());
    }

    pub fn grant_cid(&self, piece_cid: &str) {
        self.grant_cid_as(piece_cid, piece_cid);
    }

    /// Answer a request for `piece_cid` with a deal for `granted`
    pub fn grant_cid_as(&self, piece_cid: &str, granted: &str) {
        self.by_cid
            .lock()
            .unwrap()
            .insert(piece_cid.to_string(), granted.to_string());
    }

    /// Calls made, as `dataset:<name>` or `cid:<cid>`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatasetBroker for MockBroker {
    async fn request_deal_for_dataset(&self, dataset: &str) -> Result<String> {
        self.calls.lock().unwrap().push(format!("dataset:{dataset}"));
        self.by_dataset
            .lock()
            .unwrap()
            .get(dataset)
            .cloned()
            .ok_or_else(|| Error::Broker {
                status: 404,
                body: format!("no deals available for {dataset}"),
            })
    }

    async fn request_deal_for_cid(&self, piece_cid: &str) -> Result<String> {
        self.calls.lock().unwrap().push(format!("cid:{piece_cid}"));
        self.by_cid
            .lock()
            .unwrap()
            .get(piece_cid)
            .cloned()
            .ok_or_else(|| Error::Broker {
                status: 404,
                body: format!("no deal for {piece_cid}"),
            })
    }
}
