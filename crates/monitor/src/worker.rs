use std::sync::Arc;

use alloy_primitives::{Address, U256};
use metrics::gauge;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use eth_history_discovery::{BlockFinder, DiscoveryError};
use eth_history_domain::{
    config::{ConfigError, DiscoveryConfig, MonitorConfig},
    services::telemetry::TelemetryError,
    BalanceCache, BalanceCacher, BlockNumber, DiscoveredHeader, SourceError, TtlBalanceCache,
};

use crate::rpc::ChainSource;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("rpc error: {0}")]
    Source(#[from] SourceError),
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// Outcome of scanning one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountScan {
    pub account: Address,
    pub from: BlockNumber,
    pub to: BlockNumber,
    /// Newest first.
    pub headers: Vec<DiscoveredHeader>,
    pub start_block: Option<BlockNumber>,
    pub balance: Option<U256>,
    pub nonce: Option<u64>,
}

pub fn build_cache(config: &DiscoveryConfig) -> Arc<dyn BalanceCacher> {
    match config.cache_ttl() {
        Some(ttl) => Arc::new(TtlBalanceCache::with_ttl(ttl)),
        None => Arc::new(BalanceCache::new()),
    }
}

/// Scans every configured account once over `[from_block, to_block]`, where
/// an unset upper bound means the current chain head. All accounts share one
/// cache.
pub async fn run_monitor<S>(
    config: &MonitorConfig,
    discovery: DiscoveryConfig,
    source: Arc<S>,
    cancel: &CancellationToken,
) -> Result<Vec<AccountScan>, MonitorError>
where
    S: ChainSource + 'static,
{
    let to = match config.to_block() {
        Some(to) => to,
        None => source.block_number().await?,
    };
    let from = config.from_block();
    if from > to {
        warn!(from, to, "scan window is empty");
        return Ok(Vec::new());
    }

    let finder = BlockFinder::new(source, build_cache(&discovery), discovery);
    let mut scans = Vec::with_capacity(config.accounts().len());
    for &account in config.accounts() {
        let found = finder
            .find_blocks_with_transfers(cancel, account, from, to, config.no_limit())
            .await?;

        let scan = AccountScan {
            account,
            from: found.from,
            to,
            headers: found.sorted_headers_desc(),
            start_block: found.start_block,
            balance: finder.cached_balance(&account, to),
            nonce: finder.cached_nonce(&account, to),
        };
        info!(
            %account,
            from = scan.from,
            to,
            headers = scan.headers.len(),
            start_block = ?scan.start_block,
            balance = ?scan.balance,
            nonce = ?scan.nonce,
            "account scanned"
        );
        scans.push(scan);
    }

    gauge!("monitor_last_scanned_block").set(to as f64);
    Ok(scans)
}
