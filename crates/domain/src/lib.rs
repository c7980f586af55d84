//! Domain-level building blocks shared by the discovery core and the monitor.
//!
//! Holds the block/transfer vocabulary, the chain-read traits the core
//! consumes, the two-tier balance/nonce cache and the environment-driven
//! configuration and telemetry helpers.

pub mod config;
pub mod model;
pub mod services;
pub mod source;

pub use model::*;
pub use services::cache::{BalanceCache, BalanceCacher, NonceRangeIndex, TtlBalanceCache};
pub use source::{BalanceNonceSource, Downloader, SourceError, SourceResult};
