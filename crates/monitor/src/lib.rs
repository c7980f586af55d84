//! Library entrypoint for embedding the monitor in other binaries. The
//! binary in `main.rs` wires it to one JSON-RPC endpoint from the
//! environment.

pub mod pipeline;
pub mod rpc;
pub mod worker;

pub use pipeline::load_transfers;
pub use rpc::{ChainSource, RpcBalanceSource, RpcTransferDownloader};
pub use worker::{build_cache, run_monitor, AccountScan, MonitorError};
