use std::sync::Arc;

use alloy_primitives::{Address, U256};
use eth_history_domain::{
    config::DiscoveryConfig, BalanceCacher, BalanceNonceSource, BlockNumber, BlockRange,
    DiscoveredHeader,
};
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bisect::{check_ranges, RangeBisector};
use crate::error::DiscoveryError;

/// Result of one discovery call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// Oldest block actually verified: `[from, high]` holds no change beyond
    /// `headers`. Equals the requested lower bound unless the fan-out cap or
    /// the level cap abandoned older ranges.
    pub from: BlockNumber,
    /// Blocks holding a balance or nonce change, in no particular order.
    pub headers: Vec<DiscoveredHeader>,
    /// Highest block at which the account was seen with zero balance and
    /// zero nonce; nothing at or below it can hold a transfer.
    pub start_block: Option<BlockNumber>,
    pub levels: u32,
}

impl Discovery {
    pub fn sorted_headers_desc(&self) -> Vec<DiscoveredHeader> {
        let mut headers = self.headers.clone();
        headers.sort_by(|a, b| b.number.cmp(&a.number));
        headers
    }
}

/// Drives the range bisector level by level over one account's block window.
pub struct BlockFinder {
    source: Arc<dyn BalanceNonceSource>,
    cache: Arc<dyn BalanceCacher>,
    config: DiscoveryConfig,
}

impl BlockFinder {
    pub fn new(
        source: Arc<dyn BalanceNonceSource>,
        cache: Arc<dyn BalanceCacher>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            source,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<dyn BalanceCacher> {
        &self.cache
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn cached_balance(&self, account: &Address, block: BlockNumber) -> Option<U256> {
        self.cache.balance(account, block)
    }

    /// Point nonce if cached, otherwise a nonce interpolated from a known
    /// constant window.
    pub fn cached_nonce(&self, account: &Address, block: BlockNumber) -> Option<u64> {
        self.cache
            .nonce(account, block)
            .or_else(|| self.cache.find_nonce_in_range(account, block))
    }

    /// Seeds the cache with state already known for `block`, typically the
    /// last block persisted by a previous run.
    pub fn prime(&self, account: Address, block: BlockNumber, balance: U256, nonce: u64) {
        self.cache.add_balance(account, block, balance);
        self.cache.add_nonce(account, block, nonce);
    }

    pub async fn find_blocks_with_transfers(
        &self,
        cancel: &CancellationToken,
        account: Address,
        low: BlockNumber,
        high: BlockNumber,
        no_limit: bool,
    ) -> Result<Discovery, DiscoveryError> {
        self.find_blocks_from_start(cancel, account, low, high, no_limit, None)
            .await
    }

    /// Like [`Self::find_blocks_with_transfers`], skipping every range that
    /// ends at or below an already known `start_block`.
    pub async fn find_blocks_from_start(
        &self,
        cancel: &CancellationToken,
        account: Address,
        low: BlockNumber,
        high: BlockNumber,
        no_limit: bool,
        start_block: Option<BlockNumber>,
    ) -> Result<Discovery, DiscoveryError> {
        info!(%account, from = low, to = high, no_limit, ?start_block, "start find blocks with transfers");

        let bisector = Arc::new(RangeBisector::new(
            self.source.clone(),
            self.cache.clone(),
            account,
        ));
        let fan_out_cap = self.config.fan_out_cap();

        let mut from = low;
        let mut start_block = start_block;
        let mut headers = Vec::new();
        let mut ranges = vec![BlockRange::new(low, high)];
        let mut lvl = 1;

        while !ranges.is_empty() && lvl <= self.config.max_levels() {
            debug!(%account, lvl, ranges = ranges.len(), "check ranges");
            counter!("discovery_levels_total").increment(1);
            histogram!("discovery_level_ranges").record(ranges.len() as f64);

            let outcome = check_ranges(
                bisector.clone(),
                ranges,
                start_block,
                self.config.thread_limit(),
                self.config.level_timeout(),
                cancel,
            )
            .await?;

            headers.extend(outcome.headers);
            start_block = outcome.start_block;
            let mut next = outcome.ranges;

            if !no_limit && next.len() > fan_out_cap {
                next.sort_by(|a, b| b.from.cmp(&a.from));
                let dropped = next.len() - fan_out_cap;
                next.truncate(fan_out_cap);
                if let Some(last) = next.last() {
                    from = last.from;
                }
                counter!("discovery_ranges_truncated_total").increment(dropped as u64);
                debug!(%account, lvl, dropped, from, "fan-out cap reached, keeping newest ranges");
            }

            ranges = next;
            lvl += 1;
        }

        // Level cap hit: only the window above every unchecked range is verified.
        if let Some(frontier) = ranges.iter().map(|range| range.to).max() {
            from = from.max(frontier);
            counter!("discovery_ranges_truncated_total").increment(ranges.len() as u64);
            debug!(%account, unchecked = ranges.len(), from, "level cap reached, abandoning ranges");
        }

        let levels = lvl - 1;
        counter!("discovery_headers_found_total").increment(headers.len() as u64);
        info!(
            %account,
            from,
            to = high,
            headers = headers.len(),
            levels,
            ?start_block,
            "end find blocks with transfers"
        );

        Ok(Discovery {
            from,
            headers,
            start_block,
            levels,
        })
    }
}
