use std::{sync::Arc, time::Duration};

use alloy_primitives::Address;
use eth_history_domain::{
    BalanceCacher, BalanceNonceSource, BlockNumber, BlockRange, DiscoveredHeader,
};
use metrics::counter;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DiscoveryError;
use crate::task_group::{TaskGroup, TaskSink};

/// Decides, for one account, whether a block range can be skipped, pins a
/// transfer to a single block, or has to be split in two.
pub struct RangeBisector {
    source: Arc<dyn BalanceNonceSource>,
    cache: Arc<dyn BalanceCacher>,
    account: Address,
}

impl RangeBisector {
    pub fn new(
        source: Arc<dyn BalanceNonceSource>,
        cache: Arc<dyn BalanceCacher>,
        account: Address,
    ) -> Self {
        Self {
            source,
            cache,
            account,
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    /// Compares the range endpoints and reports the outcome through `sink`:
    /// nothing when no balance or nonce change is possible inside it, a
    /// header when it spans a single block, otherwise its two halves.
    pub async fn check_range(
        &self,
        range: BlockRange,
        start_block: Option<BlockNumber>,
        sink: &TaskSink,
    ) -> Result<(), DiscoveryError> {
        if range.is_degenerate() {
            debug!(%range, "degenerate range, nothing to check");
            return Ok(());
        }
        if start_block.is_some_and(|start| range.to <= start) {
            debug!(%range, ?start_block, "range ends before account history starts");
            return Ok(());
        }

        let source = self.source.as_ref();
        let account = self.account;
        let low = self.cache.balance_at(source, account, range.from).await?;
        let high = self.cache.balance_at(source, account, range.to).await?;

        if low == high {
            let high_nonce = self.cache.nonce_at(source, account, range.to).await?;
            // A zero nonce at `to` rules out any older outgoing activity too.
            if high_nonce == 0 {
                if high.is_zero() {
                    debug!(%range, "zero balance and nonce, candidate start block");
                    sink.raise_start_block(range.to);
                }
                return Ok(());
            }

            let low_nonce = self.cache.nonce_at(source, account, range.from).await?;
            if low_nonce == high_nonce {
                debug!(%range, nonce = high_nonce, "balance and nonce unchanged");
                return Ok(());
            }
        }

        if range.is_single_step() {
            counter!("discovery_source_calls_total", "method" => "header_by_number").increment(1);
            let header = self.source.header_by_number(range.to).await?;
            debug!(block = header.number, hash = %header.hash, "transfer block found");
            sink.push_header(DiscoveredHeader::from(header));
            return Ok(());
        }

        let (lower, upper) = range.split();
        // Prime the shared endpoint for the next level.
        self.cache.balance_at(source, account, lower.to).await?;
        debug!(%range, mid = lower.to, "balance changed, splitting");
        sink.push_range(upper);
        sink.push_range(lower);
        Ok(())
    }
}

/// Output of one bisection level.
#[derive(Debug, Default)]
pub struct LevelOutcome {
    pub ranges: Vec<BlockRange>,
    pub headers: Vec<DiscoveredHeader>,
    pub start_block: Option<BlockNumber>,
}

/// Checks every range of one level concurrently, fail-fast. Ranges ending at
/// or below `start_block` finish without a state read.
pub async fn check_ranges(
    bisector: Arc<RangeBisector>,
    ranges: Vec<BlockRange>,
    start_block: Option<BlockNumber>,
    thread_limit: usize,
    level_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<LevelOutcome, DiscoveryError> {
    debug!(
        account = %bisector.account(),
        ranges = ranges.len(),
        ?start_block,
        "start check ranges"
    );

    let mut group = TaskGroup::with_cancellation(thread_limit, cancel);
    if let Some(block) = start_block {
        group.sink().raise_start_block(block);
    }

    for range in ranges {
        let bisector = bisector.clone();
        group.add(move |sink| async move { bisector.check_range(range, start_block, &sink).await });
    }

    let waited = tokio::select! {
        _ = cancel.cancelled() => Err(DiscoveryError::Stuck),
        waited = timeout(level_timeout, group.wait()) => waited.unwrap_or_else(|_| {
            warn!(?level_timeout, "bisection level timed out");
            Err(DiscoveryError::Stuck)
        }),
    };
    if let Err(err) = waited {
        group.cancel();
        return Err(err);
    }

    let results = group.into_results();
    debug!(
        account = %bisector.account(),
        ranges = results.ranges.len(),
        headers = results.headers.len(),
        start_block = ?results.start_block,
        "end check ranges"
    );
    Ok(LevelOutcome {
        ranges: results.ranges,
        headers: results.headers,
        start_block: results.start_block,
    })
}
