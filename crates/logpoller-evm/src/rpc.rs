//! JSON-RPC chain data source.
//!
//! Speaks plain HTTP JSON-RPC 2.0 to an EVM node: `eth_getBlockByNumber`,
//! `eth_getBlockByHash` and `eth_getLogs`. Every transport failure, node error
//! or malformed payload becomes [`LogPollerError::TransientSource`]; a `null`
//! block result becomes [`LogPollerError::NotFound`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use logpoller_core::error::{LogPollerError, Result};
use logpoller_core::source::ChainDataSource;
use logpoller_core::types::{ChainId, Header, Log, LogFilter};

// ─── Wire types ──────────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value, or the node's error as a source failure.
    pub fn into_result(self, method: &str) -> Result<Value> {
        match self.error {
            Some(err) => Err(LogPollerError::TransientSource(format!("{method}: {err}"))),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Block header fields as returned by `eth_getBlockBy*`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: Option<String>,
    hash: Option<String>,
    parent_hash: String,
    timestamp: String,
}

/// A log as returned by `eth_getLogs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: Option<String>,
    block_hash: Option<String>,
    transaction_hash: Option<String>,
    log_index: Option<String>,
    #[serde(default)]
    removed: bool,
}

// ─── Strict hex decoding ─────────────────────────────────────────────────────

fn malformed(field: &str, value: &str) -> LogPollerError {
    LogPollerError::TransientSource(format!("malformed {field} in response: {value:?}"))
}

fn hex_body<'a>(field: &str, s: &'a str) -> Result<&'a str> {
    s.strip_prefix("0x").ok_or_else(|| malformed(field, s))
}

/// Parse a JSON-RPC quantity (`0x`-prefixed, hex digits only, no overflow).
pub fn parse_quantity(field: &str, s: &str) -> Result<u64> {
    let digits = hex_body(field, s)?;
    if digits.is_empty() || digits.len() > 16 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(malformed(field, s));
    }
    u64::from_str_radix(digits, 16).map_err(|_| malformed(field, s))
}

fn parse_b256(field: &str, s: &str) -> Result<B256> {
    let digits = hex_body(field, s)?;
    if digits.len() != 64 {
        return Err(malformed(field, s));
    }
    digits.parse().map_err(|_| malformed(field, s))
}

fn parse_address(s: &str) -> Result<Address> {
    let digits = hex_body("address", s)?;
    if digits.len() != 40 {
        return Err(malformed("address", s));
    }
    digits.parse().map_err(|_| malformed("address", s))
}

fn parse_data(s: &str) -> Result<Bytes> {
    hex_body("data", s)?;
    s.parse().map_err(|_| malformed("data", s))
}

fn required<'a>(field: &str, v: &'a Option<String>) -> Result<&'a str> {
    v.as_deref()
        .ok_or_else(|| LogPollerError::TransientSource(format!("missing {field} in response")))
}

/// Convert an `eth_getBlockBy*` result. `null` means the node does not know the block.
pub fn header_from_value(v: Value) -> Result<Header> {
    if v.is_null() {
        return Err(LogPollerError::NotFound);
    }
    let raw: RpcBlock = serde_json::from_value(v).map_err(LogPollerError::source)?;
    Ok(Header {
        number: parse_quantity("number", required("number", &raw.number)?)?,
        hash: parse_b256("hash", required("hash", &raw.hash)?)?,
        parent_hash: parse_b256("parentHash", &raw.parent_hash)?,
        timestamp: parse_quantity("timestamp", &raw.timestamp)?,
    })
}

/// Convert an `eth_getLogs` result, dropping logs flagged as removed.
///
/// Anonymous events (no topics) are kept with a zero event signature.
pub fn logs_from_value(chain_id: ChainId, v: Value) -> Result<Vec<Log>> {
    let raw: Vec<RpcLog> = serde_json::from_value(v).map_err(LogPollerError::source)?;
    let observed_at = Utc::now();

    raw.into_iter()
        .filter(|l| !l.removed)
        .map(|l| {
            let topics = l
                .topics
                .iter()
                .map(|t| parse_b256("topic", t))
                .collect::<Result<Vec<_>>>()?;
            Ok(Log {
                chain_id,
                block_hash: parse_b256("blockHash", required("blockHash", &l.block_hash)?)?,
                block_number: parse_quantity("blockNumber", required("blockNumber", &l.block_number)?)?,
                log_index: parse_quantity("logIndex", required("logIndex", &l.log_index)?)?,
                address: parse_address(&l.address)?,
                event_sig: topics.first().copied().unwrap_or(B256::ZERO),
                topics,
                tx_hash: parse_b256(
                    "transactionHash",
                    required("transactionHash", &l.transaction_hash)?,
                )?,
                data: parse_data(&l.data)?,
                observed_at,
            })
        })
        .collect()
}

fn quantity(n: u64) -> Value {
    Value::String(format!("0x{n:x}"))
}

/// The `eth_getLogs` filter object for `[from, to]`.
pub fn logs_filter(from: u64, to: u64, filter: &LogFilter) -> Value {
    let mut obj = json!({
        "fromBlock": quantity(from),
        "toBlock": quantity(to),
    });
    if !filter.addresses.is_empty() {
        obj["address"] = json!(filter.addresses);
    }
    if !filter.event_sigs.is_empty() {
        obj["topics"] = json!([filter.event_sigs]);
    }
    obj
}

// ─── JsonRpcSource ───────────────────────────────────────────────────────────

/// [`ChainDataSource`] backed by an HTTP JSON-RPC endpoint.
pub struct JsonRpcSource {
    url: String,
    chain_id: ChainId,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcSource {
    /// Create a source for `url`. Logs it returns are stamped with `chain_id`.
    pub fn new(url: impl Into<String>, chain_id: ChainId, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LogPollerError::Config(format!("http client: {e}")))?;

        Ok(Self {
            url: url.into(),
            chain_id,
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| LogPollerError::TransientSource(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(LogPollerError::TransientSource(format!(
                "{method}: HTTP {status}: {body}"
            )));
        }

        let body = resp
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| LogPollerError::TransientSource(format!("{method}: {e}")))?;

        tracing::trace!(method, url = %self.url, "rpc call ok");
        body.into_result(method)
    }
}

#[async_trait]
impl ChainDataSource for JsonRpcSource {
    async fn latest_header(&self) -> Result<Header> {
        let v = self
            .call("eth_getBlockByNumber", vec![json!("latest"), json!(false)])
            .await?;
        header_from_value(v).map_err(|e| match e {
            LogPollerError::NotFound => {
                LogPollerError::TransientSource("node returned no latest block".into())
            }
            other => other,
        })
    }

    async fn header_by_number(&self, number: u64) -> Result<Header> {
        let v = self
            .call("eth_getBlockByNumber", vec![quantity(number), json!(false)])
            .await?;
        header_from_value(v)
    }

    async fn header_by_hash(&self, hash: B256) -> Result<Header> {
        let v = self
            .call("eth_getBlockByHash", vec![json!(hash), json!(false)])
            .await?;
        header_from_value(v)
    }

    async fn logs_in_range(&self, from: u64, to: u64, filter: &LogFilter) -> Result<Vec<Log>> {
        let v = self
            .call("eth_getLogs", vec![logs_filter(from, to, filter)])
            .await?;
        logs_from_value(self.chain_id, v)
    }
}
