use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use thiserror::Error;

use crate::model::{BlockHeader, BlockNumber, Transfer};

/// Common result alias for chain reads.
pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("block {0} not found")]
    NotFound(BlockNumber),
}

impl SourceError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn malformed(err: impl std::fmt::Display) -> Self {
        Self::Malformed(err.to_string())
    }

    /// Network and timeout failures may succeed on a later attempt; malformed
    /// responses and missing blocks will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

/// Historical account state for a single chain.
#[async_trait]
pub trait BalanceNonceSource: Send + Sync {
    async fn balance_at(&self, account: Address, block: BlockNumber) -> SourceResult<U256>;
    async fn nonce_at(&self, account: Address, block: BlockNumber) -> SourceResult<u64>;
    async fn header_by_number(&self, block: BlockNumber) -> SourceResult<BlockHeader>;
}

/// Materializes transfer records for one block once discovery has flagged it.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn transfers_by_number(&self, block: BlockNumber) -> SourceResult<Vec<Transfer>>;
}
