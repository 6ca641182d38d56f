//! Import ledger operations.

use crate::config::Mode;
use crate::types::{DealStats, DealStatus, ImportAttemptResult, ImportedDeal, StatusTotals};
use crate::{Error, Result};
use chrono::{TimeZone, Utc};
use sqlx::FromRow;

use super::{Database, ImportedDealRow};

#[derive(Debug, FromRow)]
struct StatsRow {
    total_count: i64,
    total_bytes: i64,
    pending_count: i64,
    pending_bytes: i64,
    success_count: i64,
    success_bytes: i64,
    failed_count: i64,
    failed_bytes: i64,
    first_import: Option<i64>,
    last_import: Option<i64>,
}

fn totals(count: i64, bytes: i64) -> StatusTotals {
    StatusTotals {
        count: count.max(0) as u64,
        bytes: bytes.max(0) as u64,
    }
}

fn timestamp(secs: Option<i64>) -> Option<chrono::DateTime<Utc>> {
    secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
}

impl Database {
    /// Record an import attempt
    ///
    /// Accepted imports start out `PENDING`; anything else is stored as
    /// `FAILED` straight away. Returns the new row ID.
    pub async fn insert_deal(&self, attempt: &ImportAttemptResult, mode: Mode) -> Result<i64> {
        let state = if attempt.success {
            DealStatus::Pending
        } else {
            DealStatus::Failed
        };
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO imported_deals (
                deal_uuid, piece_cid, state, mode, size_bytes, message, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&attempt.deal_id)
        .bind(&attempt.piece_cid)
        .bind(state.as_str())
        .bind(mode.as_str())
        .bind(attempt.size_bytes as i64)
        .bind(&attempt.message)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.last_insert_rowid())
    }

    /// Get a ledger row by ID
    pub async fn get_deal(&self, id: i64) -> Result<Option<ImportedDeal>> {
        let row = sqlx::query_as::<_, ImportedDealRow>(
            r#"
            SELECT id, deal_uuid, piece_cid, state, mode, size_bytes, message, created_at
            FROM imported_deals
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(row.map(ImportedDeal::from))
    }

    /// All rows still waiting on the deal service, oldest first
    pub async fn pending_deals(&self) -> Result<Vec<ImportedDeal>> {
        let rows = sqlx::query_as::<_, ImportedDealRow>(
            r#"
            SELECT id, deal_uuid, piece_cid, state, mode, size_bytes, message, created_at
            FROM imported_deals
            WHERE state = 'PENDING'
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(ImportedDeal::from).collect())
    }

    /// Most recent rows, optionally restricted to one status
    pub async fn list_deals(
        &self,
        status: Option<DealStatus>,
        limit: usize,
    ) -> Result<Vec<ImportedDeal>> {
        let query = if let Some(status) = status {
            sqlx::query_as::<_, ImportedDealRow>(
                r#"
                SELECT id, deal_uuid, piece_cid, state, mode, size_bytes, message, created_at
                FROM imported_deals
                WHERE state = ?
                ORDER BY id DESC
                LIMIT ?
                "#,
            )
            .bind(status.as_str())
            .bind(limit as i64)
        } else {
            sqlx::query_as::<_, ImportedDealRow>(
                r#"
                SELECT id, deal_uuid, piece_cid, state, mode, size_bytes, message, created_at
                FROM imported_deals
                ORDER BY id DESC
                LIMIT ?
                "#,
            )
            .bind(limit as i64)
        };

        let rows = query.fetch_all(&self.pool).await.map_err(Error::Sqlx)?;
        Ok(rows.into_iter().map(ImportedDeal::from).collect())
    }

    /// Move a `PENDING` row to a terminal status
    ///
    /// Rows that are already terminal are left untouched. Returns whether
    /// the row changed.
    pub async fn update_deal_status(&self, id: i64, status: DealStatus) -> Result<bool> {
        if !status.is_terminal() {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE imported_deals
            SET state = ?
            WHERE id = ? AND state = 'PENDING'
            "#,
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// Count and byte totals per status, plus first and last attempt times
    pub async fn get_deal_stats(&self) -> Result<DealStats> {
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                COUNT(*) AS total_count,
                COALESCE(SUM(size_bytes), 0) AS total_bytes,
                COALESCE(SUM(CASE WHEN state = 'PENDING' THEN 1 ELSE 0 END), 0) AS pending_count,
                COALESCE(SUM(CASE WHEN state = 'PENDING' THEN size_bytes ELSE 0 END), 0) AS pending_bytes,
                COALESCE(SUM(CASE WHEN state = 'SUCCESS' THEN 1 ELSE 0 END), 0) AS success_count,
                COALESCE(SUM(CASE WHEN state = 'SUCCESS' THEN size_bytes ELSE 0 END), 0) AS success_bytes,
                COALESCE(SUM(CASE WHEN state = 'FAILED' THEN 1 ELSE 0 END), 0) AS failed_count,
                COALESCE(SUM(CASE WHEN state = 'FAILED' THEN size_bytes ELSE 0 END), 0) AS failed_bytes,
                MIN(created_at) AS first_import,
                MAX(created_at) AS last_import
            FROM imported_deals
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(DealStats {
            total: totals(row.total_count, row.total_bytes),
            pending: totals(row.pending_count, row.pending_bytes),
            success: totals(row.success_count, row.success_bytes),
            failure: totals(row.failed_count, row.failed_bytes),
            first_import: timestamp(row.first_import),
            last_import: timestamp(row.last_import),
        })
    }
}
