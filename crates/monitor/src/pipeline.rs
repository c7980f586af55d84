use std::sync::Arc;

use alloy_primitives::Address;
use eth_history_discovery::{DiscoveryError, TaskGroup};
use eth_history_domain::{DiscoveredHeader, Downloader, Transfer};
use metrics::counter;
use tracing::debug;

/// Downloads the transfers of every discovered block, one task per header,
/// and keeps those recorded for `account`. Fails on the first download error.
pub async fn load_transfers(
    downloader: Arc<dyn Downloader>,
    account: Address,
    headers: &[DiscoveredHeader],
    thread_limit: usize,
) -> Result<Vec<Transfer>, DiscoveryError> {
    let mut group = TaskGroup::new(thread_limit);
    for header in headers {
        let downloader = downloader.clone();
        let block = header.number;
        group.add(move |sink| async move {
            let transfers = downloader.transfers_by_number(block).await?;
            debug!(block, transfers = transfers.len(), "downloaded block transfers");
            sink.push(transfers.into_iter().filter(|t| t.address == account));
            Ok(())
        });
    }
    group.wait().await?;

    let mut transfers = group.into_results().transfers;
    transfers.sort_by_key(|t| t.block_number);
    counter!("monitor_transfers_loaded_total").increment(transfers.len() as u64);
    Ok(transfers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B256, U256};
    use async_trait::async_trait;
    use eth_history_domain::{BlockNumber, SourceError, SourceResult, TransferKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockDownloader {
        calls: AtomicUsize,
        fail_at: Option<BlockNumber>,
    }

    fn transfer(block: BlockNumber, address: Address) -> Transfer {
        Transfer {
            id: B256::left_padding_from(&block.to_be_bytes()),
            kind: TransferKind::Eth,
            address,
            block_number: block,
            block_hash: B256::repeat_byte(0x01),
            timestamp: block * 12,
            from: Address::repeat_byte(0x09),
            to: Some(address),
            value: U256::from(block),
        }
    }

    #[async_trait]
    impl Downloader for MockDownloader {
        async fn transfers_by_number(&self, block: BlockNumber) -> SourceResult<Vec<Transfer>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(block) {
                return Err(SourceError::Timeout);
            }
            Ok(vec![
                transfer(block, account()),
                transfer(block, Address::repeat_byte(0xee)),
            ])
        }
    }

    fn account() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn headers(blocks: &[BlockNumber]) -> Vec<DiscoveredHeader> {
        blocks
            .iter()
            .map(|&number| DiscoveredHeader {
                number,
                hash: B256::left_padding_from(&number.to_be_bytes()),
                timestamp: number * 12,
            })
            .collect()
    }

    #[tokio::test]
    async fn loads_account_transfers_for_every_header() {
        let downloader = Arc::new(MockDownloader::default());

        let transfers = load_transfers(downloader.clone(), account(), &headers(&[75, 5, 46]), 2)
            .await
            .expect("load succeeds");

        assert_eq!(downloader.calls.load(Ordering::SeqCst), 3);
        let blocks: Vec<_> = transfers.iter().map(|t| t.block_number).collect();
        assert_eq!(blocks, vec![5, 46, 75]);
        assert!(transfers.iter().all(|t| t.address == account()));
    }

    #[tokio::test]
    async fn download_failure_fails_the_batch() {
        let downloader = Arc::new(MockDownloader {
            fail_at: Some(46),
            ..MockDownloader::default()
        });

        let err = load_transfers(downloader, account(), &headers(&[5, 46, 75]), 0)
            .await
            .unwrap_err();

        assert_eq!(err, DiscoveryError::Source(SourceError::Timeout));
    }

    #[tokio::test]
    async fn no_headers_means_no_downloads() {
        let downloader = Arc::new(MockDownloader::default());
        let transfers = load_transfers(downloader.clone(), account(), &[], 4)
            .await
            .expect("load succeeds");

        assert!(transfers.is_empty());
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 0);
    }
}
