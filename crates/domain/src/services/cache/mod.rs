//! Two-tier balance/nonce cache: an exact point memo per `(account, block)`
//! plus a nonce range index that interpolates inside windows of constant
//! nonce.
//!
//! Locks are never held across a source call: a miss is fetched first and
//! inserted afterwards, so concurrent misses on the same key may both reach
//! the source.

mod nonce_range;
mod point;

use std::time::Duration;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use metrics::counter;
use tracing::trace;

use crate::model::{BlockNumber, NonceRange};
use crate::source::{BalanceNonceSource, SourceResult};

pub use nonce_range::NonceRangeIndex;
pub use point::{MapPointStore, PointStore, TtlPointStore};

/// Cache abstraction shared by concurrent discovery tasks and by callers
/// priming or flushing state between runs.
#[async_trait]
pub trait BalanceCacher: Send + Sync {
    fn balance(&self, account: &Address, block: BlockNumber) -> Option<U256>;

    fn add_balance(&self, account: Address, block: BlockNumber, balance: U256);

    fn nonce(&self, account: &Address, block: BlockNumber) -> Option<u64>;

    /// Records a point nonce and folds it into the nonce range index.
    fn add_nonce(&self, account: Address, block: BlockNumber, nonce: u64);

    fn find_nonce_in_range(&self, account: &Address, block: BlockNumber) -> Option<u64>;

    /// Keeps only the lowest and highest block per account and drops every
    /// nonce range.
    fn clear(&self);

    /// Cached-or-live balance; a miss is fetched from `source` and stored
    /// before returning.
    async fn balance_at(
        &self,
        source: &dyn BalanceNonceSource,
        account: Address,
        block: BlockNumber,
    ) -> SourceResult<U256> {
        if let Some(balance) = self.balance(&account, block) {
            counter!("discovery_cache_lookups_total", "kind" => "balance", "result" => "hit")
                .increment(1);
            return Ok(balance);
        }

        counter!("discovery_cache_lookups_total", "kind" => "balance", "result" => "miss")
            .increment(1);
        counter!("discovery_source_calls_total", "method" => "balance_at").increment(1);
        let balance = source.balance_at(account, block).await?;
        trace!(%account, block, %balance, "fetched balance");
        self.add_balance(account, block, balance);
        Ok(balance)
    }

    /// Cached-or-live nonce; consults the point memo, then the range index,
    /// then `source`.
    async fn nonce_at(
        &self,
        source: &dyn BalanceNonceSource,
        account: Address,
        block: BlockNumber,
    ) -> SourceResult<u64> {
        if let Some(nonce) = self.nonce(&account, block) {
            counter!("discovery_cache_lookups_total", "kind" => "nonce", "result" => "hit")
                .increment(1);
            return Ok(nonce);
        }

        if let Some(nonce) = self.find_nonce_in_range(&account, block) {
            counter!("discovery_cache_lookups_total", "kind" => "nonce", "result" => "range_hit")
                .increment(1);
            return Ok(nonce);
        }

        counter!("discovery_cache_lookups_total", "kind" => "nonce", "result" => "miss")
            .increment(1);
        counter!("discovery_source_calls_total", "method" => "nonce_at").increment(1);
        let nonce = source.nonce_at(account, block).await?;
        trace!(%account, block, nonce, "fetched nonce");
        self.add_nonce(account, block, nonce);
        Ok(nonce)
    }
}

/// Point stores for balances and nonces plus the nonce range index.
pub struct BalanceCache<B = MapPointStore<U256>, N = MapPointStore<u64>> {
    balances: B,
    nonces: N,
    nonce_ranges: NonceRangeIndex,
}

/// Cache whose point entries expire, for use near the chain head.
pub type TtlBalanceCache = BalanceCache<TtlPointStore<U256>, TtlPointStore<u64>>;

impl BalanceCache {
    pub fn new() -> Self {
        Self::with_stores(MapPointStore::default(), MapPointStore::default())
    }
}

impl Default for BalanceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TtlBalanceCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::with_stores(TtlPointStore::new(ttl), TtlPointStore::new(ttl))
    }
}

impl<B, N> BalanceCache<B, N>
where
    B: PointStore<U256>,
    N: PointStore<u64>,
{
    pub fn with_stores(balances: B, nonces: N) -> Self {
        Self {
            balances,
            nonces,
            nonce_ranges: NonceRangeIndex::default(),
        }
    }

    pub fn nonce_ranges(&self, account: &Address) -> Vec<NonceRange> {
        self.nonce_ranges.ranges(account)
    }

    pub fn balance_entries(&self) -> u64 {
        self.balances.entry_count()
    }

    pub fn nonce_entries(&self) -> u64 {
        self.nonces.entry_count()
    }
}

impl<B, N> BalanceCacher for BalanceCache<B, N>
where
    B: PointStore<U256>,
    N: PointStore<u64>,
{
    fn balance(&self, account: &Address, block: BlockNumber) -> Option<U256> {
        self.balances.get(account, block)
    }

    fn add_balance(&self, account: Address, block: BlockNumber, balance: U256) {
        self.balances.insert(account, block, balance);
    }

    fn nonce(&self, account: &Address, block: BlockNumber) -> Option<u64> {
        self.nonces.get(account, block)
    }

    fn add_nonce(&self, account: Address, block: BlockNumber, nonce: u64) {
        self.nonces.insert(account, block, nonce);
        self.nonce_ranges.observe(account, block, nonce);
    }

    fn find_nonce_in_range(&self, account: &Address, block: BlockNumber) -> Option<u64> {
        self.nonce_ranges.find(account, block)
    }

    fn clear(&self) {
        self.balances.retain_extremes();
        self.nonces.retain_extremes();
        self.nonce_ranges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BlockHeader;
    use crate::source::SourceError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSource {
        balance_calls: AtomicUsize,
        nonce_calls: AtomicUsize,
    }

    #[async_trait]
    impl BalanceNonceSource for CountingSource {
        async fn balance_at(&self, _account: Address, block: BlockNumber) -> SourceResult<U256> {
            self.balance_calls.fetch_add(1, Ordering::SeqCst);
            Ok(U256::from(block * 2))
        }

        async fn nonce_at(&self, _account: Address, block: BlockNumber) -> SourceResult<u64> {
            self.nonce_calls.fetch_add(1, Ordering::SeqCst);
            Ok(if block < 100 { 1 } else { 2 })
        }

        async fn header_by_number(&self, block: BlockNumber) -> SourceResult<BlockHeader> {
            Err(SourceError::NotFound(block))
        }
    }

    fn account() -> Address {
        Address::repeat_byte(0x34)
    }

    #[tokio::test]
    async fn balance_is_fetched_once_then_served_from_cache() {
        let cache = BalanceCache::new();
        let source = CountingSource::default();

        let first = cache.balance_at(&source, account(), 21).await.unwrap();
        let second = cache.balance_at(&source, account(), 21).await.unwrap();

        assert_eq!(first, U256::from(42));
        assert_eq!(first, second);
        assert_eq!(source.balance_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.balance(&account(), 21), Some(U256::from(42)));
    }

    #[tokio::test]
    async fn nonce_inside_known_window_skips_the_source() {
        let cache = BalanceCache::new();
        let source = CountingSource::default();

        cache.nonce_at(&source, account(), 10).await.unwrap();
        cache.nonce_at(&source, account(), 90).await.unwrap();
        assert_eq!(source.nonce_calls.load(Ordering::SeqCst), 2);

        for block in [11, 50, 89] {
            assert_eq!(cache.nonce_at(&source, account(), block).await.unwrap(), 1);
        }
        assert_eq!(source.nonce_calls.load(Ordering::SeqCst), 2);

        // Outside every window the source is consulted again.
        assert_eq!(cache.nonce_at(&source, account(), 150).await.unwrap(), 2);
        assert_eq!(source.nonce_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn add_nonce_feeds_the_range_index() {
        let cache = BalanceCache::new();
        cache.add_nonce(account(), 30, 7);
        cache.add_nonce(account(), 10, 7);

        assert_eq!(cache.nonce(&account(), 30), Some(7));
        assert_eq!(cache.find_nonce_in_range(&account(), 20), Some(7));
        assert_eq!(
            cache.nonce_ranges(&account()),
            vec![NonceRange {
                nonce: 7,
                min: 10,
                max: 30
            }]
        );
    }

    #[test]
    fn clear_keeps_endpoints_and_drops_ranges() {
        let cache = BalanceCache::new();
        for block in [0, 25, 50, 75, 100] {
            cache.add_balance(account(), block, U256::from(block));
            cache.add_nonce(account(), block, 3);
        }

        cache.clear();

        assert_eq!(cache.balance(&account(), 0), Some(U256::ZERO));
        assert_eq!(cache.balance(&account(), 100), Some(U256::from(100)));
        assert_eq!(cache.balance(&account(), 50), None);
        assert_eq!(cache.nonce(&account(), 0), Some(3));
        assert_eq!(cache.nonce(&account(), 100), Some(3));
        assert_eq!(cache.nonce(&account(), 25), None);
        assert_eq!(cache.balance_entries(), 2);
        assert_eq!(cache.nonce_entries(), 2);
        assert!(cache.nonce_ranges(&account()).is_empty());
        assert_eq!(cache.find_nonce_in_range(&account(), 50), None);
    }

    #[tokio::test]
    async fn ttl_cache_serves_the_same_contract() {
        let cache = TtlBalanceCache::with_ttl(TtlBalanceCache::DEFAULT_TTL);
        let source = CountingSource::default();

        cache.balance_at(&source, account(), 3).await.unwrap();
        cache.balance_at(&source, account(), 3).await.unwrap();
        cache.nonce_at(&source, account(), 5).await.unwrap();
        cache.nonce_at(&source, account(), 9).await.unwrap();
        cache.nonce_at(&source, account(), 7).await.unwrap();

        assert_eq!(source.balance_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.nonce_calls.load(Ordering::SeqCst), 2);
    }
}
