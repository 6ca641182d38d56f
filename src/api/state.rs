//! Application state for the API server

use crate::Config;
use crate::db::Database;
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned per request; both fields are `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// The deal ledger
    pub db: Arc<Database>,

    /// Daemon configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(db: Arc<Database>, config: Arc<Config>) -> Self {
        Self { db, config }
    }
}
