//! Handing a CAR file to the deal service

use crate::deal_service::{DealService, ImportOutcome};
use crate::types::ImportAttemptResult;
use crate::utils;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Issues offline imports, optionally via a staging directory
///
/// When a staging directory is set the file is copied there first and the
/// deal service is told to delete its copy once imported. The original is
/// only removed, after a successful import, when `delete_after_import` is
/// also set.
#[derive(Clone, Debug, Default)]
pub struct ImportExecutor {
    staging_dir: Option<PathBuf>,
    delete_after_import: bool,
}

impl ImportExecutor {
    /// Executor with the given staging policy
    pub fn new(staging_dir: Option<PathBuf>, delete_after_import: bool) -> Self {
        Self {
            staging_dir,
            delete_after_import,
        }
    }

    /// Import `source` for `deal_id`
    ///
    /// Never fails; every problem is reported through the returned result.
    pub async fn execute(
        &self,
        service: &dyn DealService,
        source: &Path,
        piece_cid: &str,
        deal_id: Uuid,
    ) -> ImportAttemptResult {
        let deal = deal_id.to_string();
        let size_bytes = match utils::file_size(source).await {
            Ok(size) => size,
            Err(e) => {
                error!(path = %source.display(), error = %e, "Cannot read CAR file");
                return ImportAttemptResult::failed(deal, piece_cid, 0, e.to_string());
            }
        };

        let (import_path, staged) = match &self.staging_dir {
            Some(dir) => {
                let target = dir.join(format!("{piece_cid}.{}", crate::catalog::CAR_EXTENSION));
                info!(
                    from = %source.display(),
                    to = %target.display(),
                    "Copying CAR file to staging"
                );
                if let Err(e) = tokio::fs::copy(source, &target).await {
                    error!(path = %target.display(), error = %e, "Failed to stage CAR file");
                    return ImportAttemptResult::failed(
                        deal,
                        piece_cid,
                        size_bytes,
                        format!("staging copy failed: {e}"),
                    );
                }
                (target, true)
            }
            None => (source.to_path_buf(), false),
        };

        let delete_imported_copy = self.delete_after_import || staged;
        info!(
            deal_id = %deal,
            piece_cid = %piece_cid,
            path = %import_path.display(),
            size = %utils::bytes_to_readable(size_bytes),
            "Importing offline deal"
        );

        match service
            .import_offline_deal(deal_id, &import_path, delete_imported_copy)
            .await
        {
            Ok(ImportOutcome::Accepted) => {
                info!(deal_id = %deal, piece_cid = %piece_cid, "Import accepted");
                if staged && self.delete_after_import {
                    if let Err(e) = tokio::fs::remove_file(source).await {
                        warn!(path = %source.display(), error = %e, "Failed to delete source CAR file");
                    }
                }
                ImportAttemptResult::succeeded(deal, piece_cid, size_bytes)
            }
            Ok(ImportOutcome::Rejected(reason)) => {
                error!(deal_id = %deal, piece_cid = %piece_cid, reason = %reason, "Import rejected");
                ImportAttemptResult::failed(deal, piece_cid, size_bytes, reason)
            }
            Err(e) => {
                error!(deal_id = %deal, piece_cid = %piece_cid, error = %e, "Import failed");
                ImportAttemptResult::failed(deal, piece_cid, size_bytes, e.to_string())
            }
        }
    }
}
