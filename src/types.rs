//! Core types for deal-importer

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::utils::height_to_unix;

/// Coarse lifecycle stage of a deal as reported by the deal service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Checkpoint {
    /// Proposal accepted, waiting for data
    Accepted,
    /// Data transferred
    Transferred,
    /// Deal published on chain
    Published,
    /// Publish message confirmed
    PublishConfirmed,
    /// Piece added to a sector
    AddedPiece,
    /// Indexed and announced to the network
    IndexedAndAnnounced,
    /// Deal finished (proving, expired or failed)
    Complete,
    /// Any checkpoint this build does not know about
    #[serde(other)]
    Unknown,
}

impl Checkpoint {
    /// Name used in deal service filters
    pub fn as_str(&self) -> &'static str {
        match self {
            Checkpoint::Accepted => "Accepted",
            Checkpoint::Transferred => "Transferred",
            Checkpoint::Published => "Published",
            Checkpoint::PublishConfirmed => "PublishConfirmed",
            Checkpoint::AddedPiece => "AddedPiece",
            Checkpoint::IndexedAndAnnounced => "IndexedAndAnnounced",
            Checkpoint::Complete => "Complete",
            Checkpoint::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chain epoch as returned by the deal service (`{"n": "1234"}`)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEpoch {
    /// Epoch height, encoded as a decimal string
    #[serde(rename = "n", default)]
    pub height: String,
}

impl ChainEpoch {
    /// Wrap a height
    pub fn new(height: i64) -> Self {
        Self {
            height: height.to_string(),
        }
    }

    /// Wall-clock time of this epoch, or `None` if the height is not a
    /// number or lies outside the representable range
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let height: i64 = self.height.trim().parse().ok()?;
        Utc.timestamp_opt(height_to_unix(height)?, 0).single()
    }
}

/// A deal as seen through the deal service's query API
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DealRecord {
    /// Deal UUID, as a string
    #[serde(rename = "ID")]
    pub id: String,

    /// Progress message, e.g. "Sealer: Proving"
    #[serde(default)]
    pub message: String,

    /// Piece CID
    #[serde(default)]
    pub piece_cid: String,

    /// Whether the data is supplied out of band
    #[serde(default)]
    pub is_offline: bool,

    /// Client (requester) address
    #[serde(default)]
    pub client_address: String,

    /// Lifecycle checkpoint
    pub checkpoint: Checkpoint,

    /// Deal start epoch
    #[serde(default)]
    pub start_epoch: ChainEpoch,

    /// Where the deal service staged the data; empty until imported
    #[serde(default)]
    pub inbound_file_path: String,

    /// Error text, empty when healthy
    #[serde(default)]
    pub err: String,
}

impl DealRecord {
    /// Accepted, offline deals are waiting for their data
    pub fn is_ready_for_import(&self) -> bool {
        self.checkpoint == Checkpoint::Accepted && self.is_offline
    }
}

/// Outcome of a single import attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportAttemptResult {
    /// Whether the deal service accepted the import
    pub success: bool,
    /// Deal UUID; empty when no deal was ever obtained
    pub deal_id: String,
    /// Piece CID of the CAR file
    pub piece_cid: String,
    /// Size of the CAR file in bytes
    pub size_bytes: u64,
    /// Deal service message or error text
    pub message: String,
}

impl ImportAttemptResult {
    /// An import the deal service accepted
    pub fn succeeded(deal_id: impl Into<String>, piece_cid: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            success: true,
            deal_id: deal_id.into(),
            piece_cid: piece_cid.into(),
            size_bytes,
            message: String::new(),
        }
    }

    /// An import that was rejected or could not be made
    pub fn failed(
        deal_id: impl Into<String>,
        piece_cid: impl Into<String>,
        size_bytes: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            deal_id: deal_id.into(),
            piece_cid: piece_cid.into(),
            size_bytes,
            message: message.into(),
        }
    }
}

/// Status of a row in the import ledger
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum DealStatus {
    /// Handed to the deal service, not yet sealed
    Pending,
    /// Deal reached proving
    Success,
    /// Import failed or the deal errored out
    Failed,
}

impl DealStatus {
    /// Column value in the ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Pending => "PENDING",
            DealStatus::Success => "SUCCESS",
            DealStatus::Failed => "FAILED",
        }
    }

    /// Parse a column value; unknown values are treated as failed
    pub fn from_db(value: &str) -> Self {
        match value {
            "PENDING" => DealStatus::Pending,
            "SUCCESS" => DealStatus::Success,
            _ => DealStatus::Failed,
        }
    }

    /// Terminal rows never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DealStatus::Pending)
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row of the import ledger
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ImportedDeal {
    /// Ledger row ID
    pub id: i64,
    /// Deal UUID
    pub deal_uuid: String,
    /// Piece CID
    pub piece_cid: String,
    /// Current status
    pub status: DealStatus,
    /// Mode the import was made in
    pub mode: String,
    /// CAR file size in bytes
    pub size_bytes: u64,
    /// Deal service message at import time
    pub message: String,
    /// When the attempt was recorded
    pub created_at: DateTime<Utc>,
}

/// Count and total bytes for one group of ledger rows
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusTotals {
    /// Number of rows
    pub count: u64,
    /// Sum of `size_bytes`
    pub bytes: u64,
}

/// Aggregate view of the ledger
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DealStats {
    /// All rows
    pub total: StatusTotals,
    /// Rows still pending
    pub pending: StatusTotals,
    /// Rows that reached proving
    pub success: StatusTotals,
    /// Rows that failed
    pub failure: StatusTotals,
    /// Earliest recorded attempt
    pub first_import: Option<DateTime<Utc>>,
    /// Most recent recorded attempt
    pub last_import: Option<DateTime<Utc>>,
}
