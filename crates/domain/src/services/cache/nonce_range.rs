use std::collections::HashMap;

use alloy_primitives::Address;
use parking_lot::RwLock;

use crate::model::{BlockNumber, NonceRange};

/// Compresses point nonce observations into closed block intervals sharing
/// one nonce value, so blocks inside a known window answer without an RPC
/// call.
///
/// Ranges for an account are kept sorted by `min` after every insert.
#[derive(Debug, Default)]
pub struct NonceRangeIndex {
    ranges: RwLock<HashMap<Address, Vec<NonceRange>>>,
}

impl NonceRangeIndex {
    /// Folds a point observation in: extends the range already carrying
    /// `nonce`, or opens a singleton range for it.
    pub fn observe(&self, account: Address, block: BlockNumber, nonce: u64) {
        let mut ranges = self.ranges.write();
        let entries = ranges.entry(account).or_default();
        match entries.iter_mut().find(|range| range.nonce == nonce) {
            Some(range) => {
                range.min = range.min.min(block);
                range.max = range.max.max(block);
            }
            None => entries.push(NonceRange::point(nonce, block)),
        }
        entries.sort_by_key(|range| range.min);
    }

    /// Returns the nonce of the first range (by `min`) ending at or after
    /// `block`, provided that range also starts at or before it. Blocks below
    /// the lowest known range are unbounded and yield `None`.
    pub fn find(&self, account: &Address, block: BlockNumber) -> Option<u64> {
        let ranges = self.ranges.read();
        let range = ranges.get(account)?.iter().find(|range| range.max >= block)?;
        (range.min <= block).then_some(range.nonce)
    }

    pub fn ranges(&self, account: &Address) -> Vec<NonceRange> {
        self.ranges
            .read()
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.ranges.write().clear();
    }
}
