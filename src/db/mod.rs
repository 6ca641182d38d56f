//! Database layer for deal-importer
//!
//! Handles SQLite persistence for the import ledger: one row per import
//! attempt, advanced from `PENDING` to a terminal state by the reconciler.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`deals`] - Import ledger inserts, status transitions and statistics

use crate::types::{DealStatus, ImportedDeal};
use chrono::{TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod deals;
mod migrations;

/// Import ledger record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct ImportedDealRow {
    /// Unique database ID
    pub id: i64,
    /// Deal UUID as a string; empty when no deal was obtained
    pub deal_uuid: String,
    /// Piece CID of the imported CAR file
    pub piece_cid: String,
    /// Ledger state (PENDING, SUCCESS, FAILED)
    pub state: String,
    /// Mode the attempt was made in
    pub mode: String,
    /// CAR file size in bytes
    pub size_bytes: i64,
    /// Deal service message at import time
    pub message: String,
    /// Unix timestamp when the attempt was recorded
    pub created_at: i64,
}

impl From<ImportedDealRow> for ImportedDeal {
    fn from(row: ImportedDealRow) -> Self {
        ImportedDeal {
            id: row.id,
            deal_uuid: row.deal_uuid,
            piece_cid: row.piece_cid,
            status: DealStatus::from_db(&row.state),
            mode: row.mode,
            size_bytes: row.size_bytes.max(0) as u64,
            message: row.message,
            created_at: Utc
                .timestamp_opt(row.created_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

/// Database handle for deal-importer
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
