//! Same-process record of piece CIDs already examined

use std::collections::HashSet;

/// Piece CIDs the selector has already looked at in this process
///
/// A CID is marked before any eligibility check runs, so it is never
/// examined twice, whether or not it was imported. Nothing is persisted;
/// a restart starts from an empty ledger.
#[derive(Clone, Debug, Default)]
pub struct AttemptLedger {
    attempted: HashSet<String>,
}

impl AttemptLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a CID; returns `false` if it was already recorded
    pub fn mark(&mut self, piece_cid: &str) -> bool {
        if self.attempted.contains(piece_cid) {
            return false;
        }
        self.attempted.insert(piece_cid.to_string())
    }

    /// Whether the CID has been recorded
    pub fn contains(&self, piece_cid: &str) -> bool {
        self.attempted.contains(piece_cid)
    }

    /// Number of recorded CIDs
    pub fn len(&self) -> usize {
        self.attempted.len()
    }

    /// Whether nothing has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.attempted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_is_one_shot() {
        let mut ledger = AttemptLedger::new();
        assert!(ledger.is_empty());

        assert!(ledger.mark("baga1"));
        assert!(!ledger.mark("baga1"));
        assert!(ledger.contains("baga1"));
        assert!(!ledger.contains("baga2"));
        assert_eq!(ledger.len(), 1);
    }
}
