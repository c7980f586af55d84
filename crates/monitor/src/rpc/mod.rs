use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use eth_history_domain::{
    BalanceNonceSource, BlockHeader, BlockNumber, Downloader, SourceError, SourceResult,
    Transfer, TransferKind,
};
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::trace;

mod types;

pub use types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcBlock, RpcBlockBody, RpcTransaction};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Chain reads the monitor needs on top of historical account state.
#[async_trait]
pub trait ChainSource: BalanceNonceSource {
    async fn block_number(&self) -> SourceResult<BlockNumber>;
}

/// `BalanceNonceSource` over a single JSON-RPC endpoint.
pub struct RpcBalanceSource {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcBalanceSource {
    pub fn new(url: impl Into<String>) -> SourceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(SourceError::transport)?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<P, R>(&self, method: &'static str, params: P) -> SourceResult<Option<R>>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        trace!(method, id, "json-rpc request");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(map_transport_error)?;
        let body: JsonRpcResponse<R> = response.json().await.map_err(map_transport_error)?;

        counter!("monitor_rpc_calls_total", "method" => method).increment(1);
        match body.error {
            Some(err) => Err(SourceError::Malformed(format!(
                "{method} failed with code {}: {}",
                err.code, err.message
            ))),
            None => Ok(body.result),
        }
    }

    async fn call_required<P, R>(&self, method: &'static str, params: P) -> SourceResult<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        self.call(method, params)
            .await?
            .ok_or_else(|| SourceError::malformed(format!("{method} returned null")))
    }

    /// Block with full transaction bodies.
    pub async fn block_body(&self, block: BlockNumber) -> SourceResult<RpcBlockBody> {
        self.call("eth_getBlockByNumber", json!([to_quantity(block), true]))
            .await?
            .ok_or(SourceError::NotFound(block))
    }
}

#[async_trait]
impl BalanceNonceSource for RpcBalanceSource {
    async fn balance_at(&self, account: Address, block: BlockNumber) -> SourceResult<U256> {
        let raw: String = self
            .call_required("eth_getBalance", json!([account, to_quantity(block)]))
            .await?;
        parse_u256(&raw)
    }

    async fn nonce_at(&self, account: Address, block: BlockNumber) -> SourceResult<u64> {
        let raw: String = self
            .call_required("eth_getTransactionCount", json!([account, to_quantity(block)]))
            .await?;
        parse_u64(&raw)
    }

    async fn header_by_number(&self, block: BlockNumber) -> SourceResult<BlockHeader> {
        let raw: RpcBlock = self
            .call("eth_getBlockByNumber", json!([to_quantity(block), false]))
            .await?
            .ok_or(SourceError::NotFound(block))?;
        convert_block(raw)
    }
}

#[async_trait]
impl ChainSource for RpcBalanceSource {
    async fn block_number(&self) -> SourceResult<BlockNumber> {
        let raw: String = self.call_required("eth_blockNumber", json!([])).await?;
        parse_u64(&raw)
    }
}

/// Native-currency transfers of one account, read from full block bodies.
/// Value moved by internal calls is not visible here.
pub struct RpcTransferDownloader {
    source: Arc<RpcBalanceSource>,
    account: Address,
}

impl RpcTransferDownloader {
    pub fn new(source: Arc<RpcBalanceSource>, account: Address) -> Self {
        Self { source, account }
    }
}

#[async_trait]
impl Downloader for RpcTransferDownloader {
    async fn transfers_by_number(&self, block: BlockNumber) -> SourceResult<Vec<Transfer>> {
        let body = self.source.block_body(block).await?;
        convert_body(block, body, self.account)
    }
}

fn map_transport_error(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout
    } else if err.is_decode() {
        SourceError::malformed(err)
    } else {
        SourceError::transport(err)
    }
}

fn to_quantity(value: u64) -> String {
    format!("{value:#x}")
}

fn hex_digits(raw: &str) -> SourceResult<&str> {
    raw.strip_prefix("0x")
        .filter(|digits| !digits.is_empty())
        .ok_or_else(|| SourceError::malformed(format!("invalid quantity `{raw}`")))
}

fn parse_u64(raw: &str) -> SourceResult<u64> {
    u64::from_str_radix(hex_digits(raw)?, 16)
        .map_err(|err| SourceError::malformed(format!("invalid quantity `{raw}`: {err}")))
}

fn parse_u256(raw: &str) -> SourceResult<U256> {
    U256::from_str_radix(hex_digits(raw)?, 16)
        .map_err(|err| SourceError::malformed(format!("invalid quantity `{raw}`: {err}")))
}

fn convert_block(raw: RpcBlock) -> SourceResult<BlockHeader> {
    Ok(BlockHeader {
        number: parse_u64(&raw.number)?,
        hash: raw.hash,
        parent_hash: raw.parent_hash,
        timestamp: parse_u64(&raw.timestamp)?,
    })
}

fn convert_body(
    block: BlockNumber,
    body: RpcBlockBody,
    account: Address,
) -> SourceResult<Vec<Transfer>> {
    let timestamp = parse_u64(&body.timestamp)?;
    let mut transfers = Vec::new();
    for tx in body.transactions {
        if tx.from != account && tx.to != Some(account) {
            continue;
        }
        transfers.push(Transfer {
            id: tx.hash,
            kind: TransferKind::Eth,
            address: account,
            block_number: block,
            block_hash: body.hash,
            timestamp,
            from: tx.from,
            to: tx.to,
            value: parse_u256(&tx.value)?,
        });
    }
    Ok(transfers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    #[test]
    fn quantities_round_trip_through_hex() {
        assert_eq!(to_quantity(0), "0x0");
        assert_eq!(to_quantity(255), "0xff");
        assert_eq!(parse_u64("0x1b4").unwrap(), 436);
        assert_eq!(
            parse_u256("0xde0b6b3a7640000").unwrap(),
            U256::from(1_000_000_000_000_000_000u64)
        );
        assert!(matches!(parse_u64("0x"), Err(SourceError::Malformed(_))));
        assert!(matches!(parse_u64("12"), Err(SourceError::Malformed(_))));
    }

    #[test]
    fn converts_rpc_block_into_header() {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "number": "0x1b4",
                "hash": format!("0x{}", "11".repeat(32)),
                "parentHash": format!("0x{}", "22".repeat(32)),
                "timestamp": "0x55ba467c",
                "miner": "0x0000000000000000000000000000000000000000"
            }
        });

        let response: JsonRpcResponse<RpcBlock> =
            serde_json::from_value(payload).expect("response decodes");
        let header = convert_block(response.result.expect("block present")).expect("converts");

        assert_eq!(header.number, 436);
        assert_eq!(header.hash, B256::repeat_byte(0x11));
        assert_eq!(header.parent_hash, B256::repeat_byte(0x22));
        assert_eq!(header.timestamp, 0x55ba467c);
    }

    #[test]
    fn null_result_and_error_object_decode() {
        let missing: JsonRpcResponse<RpcBlock> =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 3, "result": null}))
                .expect("decodes");
        assert!(missing.result.is_none());
        assert!(missing.error.is_none());

        let failed: JsonRpcResponse<String> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "error": {"code": -32000, "message": "header not found"}
        }))
        .expect("decodes");
        let error = failed.error.expect("error present");
        assert_eq!(error.code, -32000);
        assert_eq!(error.message, "header not found");
    }

    #[test]
    fn body_keeps_only_transactions_touching_the_account() {
        let account = Address::repeat_byte(0xaa);
        let other = Address::repeat_byte(0xbb);
        let body = RpcBlockBody {
            hash: B256::repeat_byte(0x01),
            timestamp: "0x10".to_string(),
            transactions: vec![
                RpcTransaction {
                    hash: B256::repeat_byte(0x02),
                    from: account,
                    to: Some(other),
                    value: "0x5".to_string(),
                },
                RpcTransaction {
                    hash: B256::repeat_byte(0x03),
                    from: other,
                    to: None,
                    value: "0x0".to_string(),
                },
                RpcTransaction {
                    hash: B256::repeat_byte(0x04),
                    from: other,
                    to: Some(account),
                    value: "0x7".to_string(),
                },
            ],
        };

        let transfers = convert_body(9, body, account).expect("converts");

        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].id, B256::repeat_byte(0x02));
        assert_eq!(transfers[0].value, U256::from(5));
        assert_eq!(transfers[1].from, other);
        assert!(transfers.iter().all(|t| t.block_number == 9 && t.timestamp == 16));
        assert!(transfers.iter().all(|t| t.address == account));
    }

    #[test]
    fn request_serializes_as_json_rpc_two() {
        let request = JsonRpcRequest::new(7, "eth_blockNumber", json!([]));
        let value = serde_json::to_value(&request).expect("serializes");
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 7, "method": "eth_blockNumber", "params": []})
        );
    }
}
