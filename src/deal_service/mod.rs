//! Access to the storage deal service
//!
//! [`DealService`] has two required operations, a filtered deal query and
//! the offline-deal import call. The semantic queries the importer and
//! reconciler need (awaiting import, in pipeline, for content, ...) are
//! provided methods built on top of the query, so alternative backends and
//! test doubles only implement the two primitives.
//!
//! [`DealServiceConnector`] hands out a fresh connection per import tick or
//! reconciliation pass.

use crate::error::Result;
use crate::types::{Checkpoint, DealRecord};
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use uuid::Uuid;

mod client;

pub use client::{BoostClient, BoostConnector};

/// Progress messages the deal service reports
pub mod messages {
    /// Sealed and proving; the deal is done
    pub const SEALER_PROVING: &str = "Sealer: Proving";
    /// Sector removed
    pub const SEALER_REMOVED: &str = "Sealer: Removed";
    /// Sector termination failed
    pub const SEALER_TERMINATE_FAILED: &str = "Sealer: TerminateFailed";
    /// Transferred, waiting to be published
    pub const READY_TO_PUBLISH: &str = "Ready to Publish";
    /// Published, waiting on chain confirmation
    pub const AWAITING_PUBLISH_CONFIRMATION: &str = "Awaiting Publish Confirmation";
    /// Publish confirmed, being added to a sector
    pub const ADDING_TO_SECTOR: &str = "Adding to Sector";
    /// Data received, piece commitment being checked
    pub const VERIFYING_COMMP: &str = "Verifying Commp";
    /// Prefix of every failure message
    pub const ERROR_PREFIX: &str = "Error";
}

/// Deals per client address considered in one default-mode scan
pub const AWAITING_IMPORT_LIMIT: u32 = 100;
/// Deals fetched per pipeline checkpoint
pub const PIPELINE_LIMIT: u32 = 2000;
/// Deals fetched when checking a piece CID for earlier failures
pub const CONTENT_LOOKUP_LIMIT: u32 = 5;
/// Effectively unbounded; used to seed the imported-CID cache
pub const COMPLETED_LIMIT: u32 = 1_000_000;

static COMMP_MISMATCH: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"commp mismatch").ok());

/// Whether a deal's error text says its data did not match its piece commitment
pub fn is_commp_mismatch(err: &str) -> bool {
    match COMMP_MISMATCH.as_ref() {
        Some(re) => re.is_match(err),
        None => err.contains("commp mismatch"),
    }
}

/// Filter for [`DealService::query_deals`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DealQuery {
    /// Free-text search (deal ID, piece CID, client address, ...)
    pub search: Option<String>,
    /// Exact checkpoint
    pub checkpoint: Option<Checkpoint>,
    /// Offline flag
    pub is_offline: Option<bool>,
    /// Maximum number of deals returned
    pub limit: Option<u32>,
}

impl DealQuery {
    /// Match everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a search term
    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// Restrict to a checkpoint
    pub fn checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Restrict to offline (or online) deals
    pub fn offline(mut self, is_offline: bool) -> Self {
        self.is_offline = Some(is_offline);
        self
    }

    /// Cap the result size
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a deal satisfies the checkpoint and offline filters
    ///
    /// Search and limit are left to the backend.
    pub fn matches_filter(&self, deal: &DealRecord) -> bool {
        self.checkpoint.is_none_or(|c| deal.checkpoint == c)
            && self.is_offline.is_none_or(|o| deal.is_offline == o)
    }
}

/// Answer to an offline import request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The deal service took the file
    Accepted,
    /// The deal service refused, with its reason
    Rejected(String),
}

/// Read and import access to the deal service
#[async_trait]
pub trait DealService: Send + Sync {
    /// Deals matching a query, newest first
    async fn query_deals(&self, query: &DealQuery) -> Result<Vec<DealRecord>>;

    /// Hand a local file to the deal service for an offline deal
    async fn import_offline_deal(
        &self,
        deal_id: Uuid,
        file_path: &Path,
        delete_after_import: bool,
    ) -> Result<ImportOutcome>;

    /// Accepted offline deals whose data has not been supplied yet
    ///
    /// Queries once per client address; an empty list queries across all
    /// clients. Deals already verifying their piece commitment have been
    /// handed data and are left out.
    async fn deals_awaiting_import(&self, addresses: &[String]) -> Result<Vec<DealRecord>> {
        let base = DealQuery::new()
            .checkpoint(Checkpoint::Accepted)
            .offline(true)
            .limit(AWAITING_IMPORT_LIMIT);

        let queries: Vec<DealQuery> = if addresses.is_empty() {
            vec![base]
        } else {
            addresses
                .iter()
                .map(|a| base.clone().search(a.as_str()))
                .collect()
        };

        let mut awaiting = Vec::new();
        for query in &queries {
            awaiting.extend(self.query_deals(query).await?.into_iter().filter(|d| {
                d.inbound_file_path.is_empty() && d.message != messages::VERIFYING_COMMP
            }));
        }
        Ok(awaiting)
    }

    /// A few deals for a piece CID, in any state
    async fn deals_for_content(&self, piece_cid: &str) -> Result<Vec<DealRecord>> {
        self.query_deals(
            &DealQuery::new()
                .search(piece_cid)
                .limit(CONTENT_LOOKUP_LIMIT),
        )
        .await
    }

    /// Whether any deal for this piece CID failed with a commp mismatch
    async fn has_content_mismatch(&self, piece_cid: &str) -> Result<bool> {
        Ok(self
            .deals_for_content(piece_cid)
            .await?
            .iter()
            .any(|d| is_commp_mismatch(&d.err)))
    }

    /// Deals for a piece CID that are ready for their data
    async fn ready_deals_for_content(&self, piece_cid: &str) -> Result<Vec<DealRecord>> {
        Ok(self
            .deals_for_content(piece_cid)
            .await?
            .into_iter()
            .filter(DealRecord::is_ready_for_import)
            .collect())
    }

    /// Look a deal up by its UUID
    async fn deal_by_id(&self, deal_id: &str) -> Result<Option<DealRecord>> {
        let deals = self.query_deals(&DealQuery::new().search(deal_id)).await?;
        Ok(deals.into_iter().find(|d| d.id == deal_id))
    }

    /// Deals currently working their way through sealing
    ///
    /// The deal service has no single "in progress" filter, so this takes
    /// one query per checkpoint, each narrowed by progress message.
    async fn deals_in_pipeline(&self) -> Result<Vec<DealRecord>> {
        let mut in_pipeline = Vec::new();

        let sealing = self
            .query_deals(
                &DealQuery::new()
                    .checkpoint(Checkpoint::IndexedAndAnnounced)
                    .limit(PIPELINE_LIMIT),
            )
            .await?;
        in_pipeline.extend(sealing.into_iter().filter(|d| {
            d.message != messages::SEALER_PROVING
                && d.message != messages::SEALER_REMOVED
                && d.message != messages::SEALER_TERMINATE_FAILED
        }));

        for (checkpoint, message) in [
            (Checkpoint::Transferred, messages::READY_TO_PUBLISH),
            (Checkpoint::Published, messages::AWAITING_PUBLISH_CONFIRMATION),
            (Checkpoint::PublishConfirmed, messages::ADDING_TO_SECTOR),
        ] {
            let deals = self
                .query_deals(
                    &DealQuery::new()
                        .checkpoint(checkpoint)
                        .limit(PIPELINE_LIMIT),
                )
                .await?;
            in_pipeline.extend(deals.into_iter().filter(|d| d.message == message));
        }

        Ok(in_pipeline)
    }

    /// Deals of a client that reached proving
    async fn completed_deals(&self, address: &str) -> Result<Vec<DealRecord>> {
        let deals = self
            .query_deals(
                &DealQuery::new()
                    .search(address)
                    .checkpoint(Checkpoint::IndexedAndAnnounced)
                    .limit(COMPLETED_LIMIT),
            )
            .await?;
        Ok(deals
            .into_iter()
            .filter(|d| d.message == messages::SEALER_PROVING)
            .collect())
    }
}

/// Opens deal service connections
#[async_trait]
pub trait DealServiceConnector: Send + Sync {
    /// A new, unshared connection
    async fn connect(&self) -> Result<Arc<dyn DealService>>;
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockDealService, deal};

    #[test]
    fn mismatch_pattern_matches_anywhere_in_error() {
        assert!(is_commp_mismatch(
            "failed to verify data: commp mismatch: expected baga..."
        ));
        assert!(is_commp_mismatch("commp mismatch"));
        assert!(!is_commp_mismatch("transfer failed"));
        assert!(!is_commp_mismatch(""));
    }

    #[test]
    fn query_filter_checks_checkpoint_and_offline() {
        let d = deal("u1", "baga1", Checkpoint::Accepted, "");
        assert!(DealQuery::new().matches_filter(&d));
        assert!(DealQuery::new().checkpoint(Checkpoint::Accepted).offline(true).matches_filter(&d));
        assert!(!DealQuery::new().checkpoint(Checkpoint::Published).matches_filter(&d));
        assert!(!DealQuery::new().offline(false).matches_filter(&d));
    }

    #[tokio::test]
    async fn awaiting_import_excludes_staged_and_verifying_deals() {
        let mut staged = deal("u2", "baga2", Checkpoint::Accepted, "");
        staged.inbound_file_path = "/boost/incoming/u2".into();
        let service = MockDealService::new(vec![
            deal("u1", "baga1", Checkpoint::Accepted, "Awaiting Offline Data Import"),
            staged,
            deal("u3", "baga3", Checkpoint::Accepted, messages::VERIFYING_COMMP),
            deal("u4", "baga4", Checkpoint::Transferred, ""),
        ]);

        let deals = service.deals_awaiting_import(&[]).await.unwrap();
        let ids: Vec<&str> = deals.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["u1"]);
    }

    #[tokio::test]
    async fn awaiting_import_queries_each_address() {
        let mut a = deal("u1", "baga1", Checkpoint::Accepted, "");
        a.client_address = "f1alice".into();
        let mut b = deal("u2", "baga2", Checkpoint::Accepted, "");
        b.client_address = "f1bob".into();
        let mut c = deal("u3", "baga3", Checkpoint::Accepted, "");
        c.client_address = "f1carol".into();
        let service = MockDealService::new(vec![a, b, c]);

        let deals = service
            .deals_awaiting_import(&["f1alice".to_string(), "f1carol".to_string()])
            .await
            .unwrap();
        let ids: Vec<&str> = deals.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u3"]);

        let queries = service.queries();
        assert_eq!(queries.len(), 2);
        assert!(queries.iter().all(|q| q.limit == Some(AWAITING_IMPORT_LIMIT)));
    }

    #[tokio::test]
    async fn pipeline_counts_only_in_progress_messages() {
        let service = MockDealService::new(vec![
            deal("s1", "c1", Checkpoint::IndexedAndAnnounced, "Sealer: PreCommit1"),
            deal("s2", "c2", Checkpoint::IndexedAndAnnounced, messages::SEALER_PROVING),
            deal("s3", "c3", Checkpoint::IndexedAndAnnounced, messages::SEALER_REMOVED),
            deal("s4", "c4", Checkpoint::IndexedAndAnnounced, messages::SEALER_TERMINATE_FAILED),
            deal("t1", "c5", Checkpoint::Transferred, messages::READY_TO_PUBLISH),
            deal("t2", "c6", Checkpoint::Transferred, "Transferring"),
            deal("p1", "c7", Checkpoint::Published, messages::AWAITING_PUBLISH_CONFIRMATION),
            deal("pc1", "c8", Checkpoint::PublishConfirmed, messages::ADDING_TO_SECTOR),
            deal("pc2", "c9", Checkpoint::PublishConfirmed, "Something else"),
        ]);

        let deals = service.deals_in_pipeline().await.unwrap();
        let mut ids: Vec<&str> = deals.iter().map(|d| d.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["p1", "pc1", "s1", "t1"]);
        assert_eq!(service.queries().len(), 4, "one query per checkpoint");
    }

    #[tokio::test]
    async fn mismatch_lookup_sees_any_failed_deal_for_the_cid() {
        let mut failed = deal("u1", "baga1", Checkpoint::Complete, "Error");
        failed.err = "commp mismatch: data does not match".into();
        let service = MockDealService::new(vec![
            failed,
            deal("u2", "baga1", Checkpoint::Accepted, ""),
            deal("u3", "baga2", Checkpoint::Accepted, ""),
        ]);

        assert!(service.has_content_mismatch("baga1").await.unwrap());
        assert!(!service.has_content_mismatch("baga2").await.unwrap());
    }

    #[tokio::test]
    async fn deal_by_id_requires_exact_id() {
        let service = MockDealService::new(vec![deal("abc", "baga1", Checkpoint::Accepted, "")]);
        assert!(service.deal_by_id("abc").await.unwrap().is_some());
        assert!(service.deal_by_id("ab").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completed_deals_are_proving_indexed_deals() {
        let mut done = deal("u1", "baga1", Checkpoint::IndexedAndAnnounced, messages::SEALER_PROVING);
        done.client_address = "f1alice".into();
        let mut sealing = deal("u2", "baga2", Checkpoint::IndexedAndAnnounced, "Sealer: WaitSeed");
        sealing.client_address = "f1alice".into();
        let service = MockDealService::new(vec![done, sealing]);

        let deals = service.completed_deals("f1alice").await.unwrap();
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].piece_cid, "baga1");
    }
}
