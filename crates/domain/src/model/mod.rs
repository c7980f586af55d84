//! Block, header and transfer types shared by the discovery core and the
//! monitor binary.

use std::fmt;

use alloy_primitives::{Address, B256, U256};

/// Height of a block on the canonical chain.
pub type BlockNumber = u64;

/// Candidate interval of blocks whose endpoints are compared during
/// bisection. Both endpoints are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRange {
    pub from: BlockNumber,
    pub to: BlockNumber,
}

impl BlockRange {
    pub const fn new(from: BlockNumber, to: BlockNumber) -> Self {
        Self { from, to }
    }

    /// Number of block transitions covered by the range (`to - from`).
    pub fn len(&self) -> u64 {
        self.to.saturating_sub(self.from)
    }

    /// A range with no transition left to inspect.
    pub fn is_degenerate(&self) -> bool {
        self.from >= self.to
    }

    /// Whether the range spans exactly one block transition, i.e. a change
    /// detected across it pins the transfer to `to`.
    pub fn is_single_step(&self) -> bool {
        self.to.checked_sub(self.from) == Some(1)
    }

    pub fn midpoint(&self) -> BlockNumber {
        self.from + (self.to - self.from) / 2
    }

    /// Splits the range at its midpoint into `[from, mid]` and `[mid, to]`.
    pub fn split(&self) -> (BlockRange, BlockRange) {
        let mid = self.midpoint();
        (BlockRange::new(self.from, mid), BlockRange::new(mid, self.to))
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Header fields returned by `HeaderByNumber`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: BlockNumber,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
}

/// A block identified as containing a transfer for the indexed account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveredHeader {
    pub number: BlockNumber,
    pub hash: B256,
    pub timestamp: u64,
}

impl From<BlockHeader> for DiscoveredHeader {
    fn from(header: BlockHeader) -> Self {
        Self {
            number: header.number,
            hash: header.hash,
            timestamp: header.timestamp,
        }
    }
}

/// Closed interval `[min, max]` over which an account's nonce is known to be
/// constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceRange {
    pub nonce: u64,
    pub min: BlockNumber,
    pub max: BlockNumber,
}

impl NonceRange {
    pub fn point(nonce: u64, block: BlockNumber) -> Self {
        Self {
            nonce,
            min: block,
            max: block,
        }
    }

    pub fn contains(&self, block: BlockNumber) -> bool {
        self.min <= block && block <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Eth,
    Erc20,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Eth => "eth",
            TransferKind::Erc20 => "erc20",
        }
    }
}

/// Transfer record materialized for a discovered block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub id: B256,
    pub kind: TransferKind,
    pub address: Address,
    pub block_number: BlockNumber,
    pub block_hash: B256,
    pub timestamp: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_shares_the_midpoint() {
        let range = BlockRange::new(10, 21);
        assert_eq!(range.midpoint(), 15);
        let (low, high) = range.split();
        assert_eq!(low, BlockRange::new(10, 15));
        assert_eq!(high, BlockRange::new(15, 21));
    }

    #[test]
    fn single_step_and_degenerate_ranges() {
        assert!(BlockRange::new(4, 5).is_single_step());
        assert!(!BlockRange::new(4, 6).is_single_step());
        assert!(BlockRange::new(7, 7).is_degenerate());
        assert!(BlockRange::new(8, 7).is_degenerate());
        assert_eq!(BlockRange::new(8, 7).len(), 0);
    }

    #[test]
    fn nonce_range_bounds_are_inclusive() {
        let range = NonceRange {
            nonce: 3,
            min: 10,
            max: 20,
        };
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(9));
        assert!(!range.contains(21));
    }
}
