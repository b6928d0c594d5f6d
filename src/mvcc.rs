// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeSet;
use std::sync::Arc;

/// Transaction id. Opaque to the storage engine apart from its total
/// order; supplied by the caller's transaction manager.
pub type TxId = u64;

/// A snapshot of committed transactions. The rowset layer only ever asks
/// whether a txid is committed; it does not interpret txids further.
///
/// An iterator parameterized by a snapshot reflects exactly the txids the
/// snapshot admits, not whatever happens to be committed by wall-clock
/// time.
#[derive(Debug, Clone, Default)]
pub struct MvccSnapshot {
    /// `None` admits every transaction.
    committed: Option<Arc<BTreeSet<TxId>>>,
}

impl MvccSnapshot {
    /// A snapshot admitting all transactions, committed or not. Used by
    /// `debug_dump`.
    pub fn all_committed() -> Self {
        Self { committed: None }
    }

    /// A snapshot admitting no transactions.
    pub fn empty() -> Self {
        Self::from_committed([])
    }

    pub fn from_committed(txids: impl IntoIterator<Item = TxId>) -> Self {
        Self {
            committed: Some(Arc::new(txids.into_iter().collect())),
        }
    }

    pub fn is_committed(&self, txid: TxId) -> bool {
        match &self.committed {
            None => true,
            Some(set) => set.contains(&txid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_membership() {
        let snap = MvccSnapshot::from_committed([3, 5]);
        assert!(snap.is_committed(3));
        assert!(!snap.is_committed(4));
        assert!(MvccSnapshot::all_committed().is_committed(42));
        assert!(!MvccSnapshot::empty().is_committed(42));
    }
}
