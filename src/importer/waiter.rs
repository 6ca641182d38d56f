//! Waiting for a brokered deal to reach the deal service

use crate::config::MaterializationConfig;
use crate::deal_service::DealService;
use crate::error::{Error, Result};
use crate::types::DealRecord;
use tracing::{debug, info};

/// Polls the deal service with a linear backoff until a requested deal is ready
///
/// Query `n` waits `base_delay * n` first. With the defaults that is three
/// queries after 10, 30 and 60 seconds; if none of them finds a ready deal
/// the wait fails with [`Error::NotMaterialized`].
#[derive(Clone, Debug)]
pub struct MaterializationWaiter {
    config: MaterializationConfig,
}

impl MaterializationWaiter {
    /// Waiter with the given schedule
    pub fn new(config: MaterializationConfig) -> Self {
        Self { config }
    }

    /// Wait for import-ready deals on `piece_cid`
    ///
    /// Returns the ready deals from the first query that found any. Query
    /// errors end the wait immediately.
    pub async fn wait(
        &self,
        service: &dyn DealService,
        piece_cid: &str,
    ) -> Result<Vec<DealRecord>> {
        for attempt in 1..=self.config.max_attempts {
            let delay = self.config.base_delay * attempt;
            debug!(
                piece_cid = %piece_cid,
                attempt,
                delay_secs = delay.as_secs(),
                "Waiting for deal to appear"
            );
            tokio::time::sleep(delay).await;

            let ready = service.ready_deals_for_content(piece_cid).await?;
            if !ready.is_empty() {
                info!(piece_cid = %piece_cid, attempt, "Deal is ready for import");
                return Ok(ready);
            }
        }

        Err(Error::NotMaterialized {
            piece_cid: piece_cid.to_string(),
            attempts: self.config.max_attempts,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockDealService, deal};
    use crate::types::Checkpoint;
    use std::time::Duration;
    use tokio::time::Instant;

    fn waiter() -> MaterializationWaiter {
        MaterializationWaiter::new(MaterializationConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_queries_and_sixty_seconds() {
        let service = MockDealService::new(vec![]);
        let start = Instant::now();

        let err = waiter().wait(&service, "baga1").await.unwrap_err();

        assert!(matches!(
            err,
            Error::NotMaterialized { ref piece_cid, attempts: 3 } if piece_cid == "baga1"
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(10 + 20 + 30));
        assert_eq!(service.searches_for("baga1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_as_soon_as_deal_is_ready() {
        let service = MockDealService::new(vec![]);
        service.reveal_after(2, deal("u1", "baga1", Checkpoint::Accepted, ""));
        let start = Instant::now();

        let ready = waiter().wait(&service, "baga1").await.unwrap();

        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "u1");
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert_eq!(service.searches_for("baga1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deals_not_yet_accepted_are_not_ready() {
        let service = MockDealService::new(vec![deal(
            "u1",
            "baga1",
            Checkpoint::Transferred,
            "",
        )]);

        let err = waiter().wait(&service, "baga1").await.unwrap_err();
        assert!(matches!(err, Error::NotMaterialized { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn query_error_ends_the_wait() {
        let service = MockDealService::new(vec![]);
        service.fail_queries(true);

        let err = waiter().wait(&service, "baga1").await.unwrap_err();
        assert!(matches!(err, Error::DealService(_)));
        assert_eq!(service.queries().len(), 1);
    }
}
