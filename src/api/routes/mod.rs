//! Route handlers for the REST API
//!
//! - [`system`] - Health and OpenAPI
//! - [`stats`] - Ledger totals
//! - [`deals`] - Individual import attempts

use serde::{Deserialize, Serialize};

mod deals;
mod stats;
mod system;

pub use deals::*;
pub use stats::*;
pub use system::*;

/// Query parameters for GET /deals
#[derive(Debug, Default, Deserialize, Serialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DealsQuery {
    /// Only rows with this status: PENDING, SUCCESS or FAILED
    pub status: Option<String>,
    /// Maximum number of rows to return (default: 50, max: 1000)
    pub limit: Option<i64>,
}
