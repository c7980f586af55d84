use eth_history_domain::SourceError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    /// The caller cancelled, or a level did not finish within its timeout.
    #[error("downloader stuck or cancelled")]
    Stuck,
    #[error("discovery task failed to complete: {0}")]
    TaskPanicked(String),
}

impl DiscoveryError {
    /// `true` when discovery gave up waiting rather than the chain returning
    /// an error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Stuck)
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source(err) => err.is_retryable(),
            Self::Stuck => true,
            Self::TaskPanicked(_) => false,
        }
    }
}
