//! Column encoding shared by the SQL backends.
//!
//! Hashes and addresses are stored as raw fixed-width bytes, topics as the
//! concatenation of their 32-byte values, timestamps as unix milliseconds.

use alloy_primitives::{Address, Bytes, B256};
use chrono::{DateTime, Utc};

use logpoller_core::error::{LogPollerError, Result};
use logpoller_core::types::{Block, ChainId, Log};

/// Column list for `logs`, in the order [`RawLog`] is read.
pub(crate) const LOG_COLUMNS: &str =
    "block_hash, block_number, log_index, address, event_sig, topics, tx_hash, data, created_at";

/// Heights and counts are `BIGINT`; values past `i64::MAX` clamp.
pub(crate) fn sql_int(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn encode_topics(topics: &[B256]) -> Vec<u8> {
    topics.iter().flat_map(|t| t.as_slice()).copied().collect()
}

pub(crate) fn decode_topics(raw: &[u8]) -> Result<Vec<B256>> {
    let chunks = raw.chunks_exact(32);
    if !chunks.remainder().is_empty() {
        return Err(LogPollerError::Storage(format!(
            "topics column is {} bytes, not a multiple of 32",
            raw.len()
        )));
    }
    Ok(chunks.map(B256::from_slice).collect())
}

fn b256(column: &str, raw: &[u8]) -> Result<B256> {
    B256::try_from(raw).map_err(|_| {
        LogPollerError::Storage(format!("{column}: expected 32 bytes, got {}", raw.len()))
    })
}

fn address(raw: &[u8]) -> Result<Address> {
    Address::try_from(raw)
        .map_err(|_| LogPollerError::Storage(format!("address: expected 20 bytes, got {}", raw.len())))
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| LogPollerError::Storage(format!("created_at out of range: {ms}")))
}

/// One `log_poller_blocks` row as read from the driver.
pub(crate) struct RawBlock {
    pub block_number: i64,
    pub block_hash: Vec<u8>,
    pub created_at: i64,
}

impl RawBlock {
    pub(crate) fn into_block(self, chain_id: ChainId) -> Result<Block> {
        Ok(Block {
            chain_id,
            number: self.block_number as u64,
            hash: b256("block_hash", &self.block_hash)?,
            observed_at: timestamp(self.created_at)?,
        })
    }
}

/// One `logs` row as read from the driver.
pub(crate) struct RawLog {
    pub block_hash: Vec<u8>,
    pub block_number: i64,
    pub log_index: i64,
    pub address: Vec<u8>,
    pub event_sig: Vec<u8>,
    pub topics: Vec<u8>,
    pub tx_hash: Vec<u8>,
    pub data: Vec<u8>,
    pub created_at: i64,
}

impl RawLog {
    pub(crate) fn into_log(self, chain_id: ChainId) -> Result<Log> {
        Ok(Log {
            chain_id,
            block_hash: b256("block_hash", &self.block_hash)?,
            block_number: self.block_number as u64,
            log_index: self.log_index as u64,
            address: address(&self.address)?,
            event_sig: b256("event_sig", &self.event_sig)?,
            topics: decode_topics(&self.topics)?,
            tx_hash: b256("tx_hash", &self.tx_hash)?,
            data: Bytes::from(self.data),
            observed_at: timestamp(self.created_at)?,
        })
    }
}
