//! One-shot scan of the configured accounts against a JSON-RPC endpoint.

use std::{io, sync::Arc};

use eth_history_domain::config::{DiscoveryConfig, MonitorConfig};
use eth_history_domain::services::telemetry::{init_telemetry, TelemetryConfig};
use eth_history_monitor::{
    load_transfers, run_monitor, MonitorError, RpcBalanceSource, RpcTransferDownloader,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[monitor] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), MonitorError> {
    let config = MonitorConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("MONITOR");
    let _telemetry = init_telemetry(&telemetry_config)?;
    let discovery = DiscoveryConfig::from_env("DISCOVERY")?;
    let thread_limit = discovery.thread_limit();
    let source = Arc::new(RpcBalanceSource::new(config.rpc_url())?);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    let scans = run_monitor(&config, discovery, source.clone(), &cancel).await?;
    for scan in scans {
        let downloader = Arc::new(RpcTransferDownloader::new(source.clone(), scan.account));
        let transfers =
            load_transfers(downloader, scan.account, &scan.headers, thread_limit).await?;
        info!(
            account = %scan.account,
            blocks = scan.headers.len(),
            transfers = transfers.len(),
            "transfers loaded"
        );
    }
    Ok(())
}
