//! Utility functions for chain time, file sizes and CAR file names

use crate::error::Result;
use std::path::Path;

/// Unix timestamp of Filecoin mainnet epoch 0
pub const FILECOIN_GENESIS_UNIX: i64 = 1_598_306_400;

/// Seconds per chain epoch
pub const EPOCH_DURATION_SECS: i64 = 30;

/// Convert a chain height to a unix timestamp, or `None` if it overflows
pub fn height_to_unix(height: i64) -> Option<i64> {
    height
        .checked_mul(EPOCH_DURATION_SECS)?
        .checked_add(FILECOIN_GENESIS_UNIX)
}

/// Convert a unix timestamp to the chain height it falls in
pub fn unix_to_height(unix: i64) -> i64 {
    (unix - FILECOIN_GENESIS_UNIX).div_euclid(EPOCH_DURATION_SECS)
}

/// Format a byte count with binary units, one decimal place (e.g. "1.5 GiB")
pub fn bytes_to_readable(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const SUFFIXES: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    if bytes < UNIT {
        return format!("{bytes} B");
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < SUFFIXES.len() - 1 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    format!("{:.1} {}", bytes as f64 / div as f64, SUFFIXES[exp])
}

/// File name without its extension; for a CAR file this is its piece CID
pub fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

/// Size of a file in bytes
pub async fn file_size(path: &Path) -> Result<u64> {
    let meta = tokio::fs::metadata(path).await?;
    Ok(meta.len())
}

/// Whether `path` exists and is a regular file
pub async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
