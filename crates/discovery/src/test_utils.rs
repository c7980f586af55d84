//! In-memory chain used by discovery tests.

use std::{
    collections::HashSet,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use eth_history_domain::{BalanceNonceSource, BlockHeader, BlockNumber, SourceError, SourceResult};
use parking_lot::Mutex;

/// Chain with a single account history, built from `(block, balance,
/// nonce_delta)` changes: from `block` onwards the balance equals `balance`
/// and the nonce has grown by `nonce_delta`. Before the first change both
/// are zero.
pub struct MockChain {
    head: BlockNumber,
    states: Vec<(BlockNumber, U256, u64)>,
    fail_at: Option<BlockNumber>,
    delay: Option<Duration>,
    queried: Mutex<HashSet<BlockNumber>>,
    balance_calls: AtomicUsize,
    nonce_calls: AtomicUsize,
    header_calls: AtomicUsize,
}

impl MockChain {
    pub fn from_changes(head: BlockNumber, changes: &[(BlockNumber, u64, u64)]) -> Self {
        let mut nonce = 0;
        let mut states: Vec<_> = changes
            .iter()
            .map(|&(block, balance, nonce_delta)| {
                nonce += nonce_delta;
                (block, U256::from(balance), nonce)
            })
            .collect();
        states.sort_by_key(|(block, _, _)| *block);

        Self {
            head,
            states,
            fail_at: None,
            delay: None,
            queried: Mutex::new(HashSet::new()),
            balance_calls: AtomicUsize::new(0),
            nonce_calls: AtomicUsize::new(0),
            header_calls: AtomicUsize::new(0),
        }
    }

    /// Every read touching `block` fails with a transport error.
    pub fn failing_at(mut self, block: BlockNumber) -> Self {
        self.fail_at = Some(block);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn block_hash(block: BlockNumber) -> B256 {
        B256::left_padding_from(&block.to_be_bytes())
    }

    pub fn head(&self) -> BlockNumber {
        self.head
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    pub fn nonce_calls(&self) -> usize {
        self.nonce_calls.load(Ordering::SeqCst)
    }

    pub fn header_calls(&self) -> usize {
        self.header_calls.load(Ordering::SeqCst)
    }

    /// Whether a balance or nonce read ever hit `block`.
    pub fn was_queried(&self, block: BlockNumber) -> bool {
        self.queried.lock().contains(&block)
    }

    fn state_at(&self, block: BlockNumber) -> (U256, u64) {
        self.states
            .iter()
            .take_while(|(changed_at, _, _)| *changed_at <= block)
            .last()
            .map(|&(_, balance, nonce)| (balance, nonce))
            .unwrap_or((U256::ZERO, 0))
    }

    async fn read(&self, block: BlockNumber) -> SourceResult<(U256, u64)> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_at == Some(block) {
            return Err(SourceError::transport(format!("block {block} unavailable")));
        }
        if block > self.head {
            return Err(SourceError::NotFound(block));
        }
        self.queried.lock().insert(block);
        Ok(self.state_at(block))
    }
}

#[async_trait]
impl BalanceNonceSource for MockChain {
    async fn balance_at(&self, _account: Address, block: BlockNumber) -> SourceResult<U256> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.read(block).await.map(|(balance, _)| balance)
    }

    async fn nonce_at(&self, _account: Address, block: BlockNumber) -> SourceResult<u64> {
        self.nonce_calls.fetch_add(1, Ordering::SeqCst);
        self.read(block).await.map(|(_, nonce)| nonce)
    }

    async fn header_by_number(&self, block: BlockNumber) -> SourceResult<BlockHeader> {
        self.header_calls.fetch_add(1, Ordering::SeqCst);
        if block > self.head {
            return Err(SourceError::NotFound(block));
        }
        Ok(BlockHeader {
            number: block,
            hash: Self::block_hash(block),
            parent_hash: Self::block_hash(block.saturating_sub(1)),
            timestamp: 1_700_000_000 + block * 12,
        })
    }
}
