//! The chain data source contract.
//!
//! The poller treats a source as an untrusted, possibly-reorganizing view of
//! the chain. Implementations: `JsonRpcSource` in `logpoller-evm`, plus the
//! scripted mock used by its tests.

use alloy_primitives::B256;
use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Header, Log, LogFilter};

#[async_trait]
pub trait ChainDataSource: Send + Sync {
    /// The source's current head.
    async fn latest_header(&self) -> Result<Header>;

    /// Header at `number`. `NotFound` if the source does not know that height.
    async fn header_by_number(&self, number: u64) -> Result<Header>;

    /// Header with `hash`. `NotFound` if the source does not know that block.
    async fn header_by_hash(&self, hash: B256) -> Result<Header>;

    /// Logs in `[from, to]` matching `filter`, already stamped with the
    /// source's chain id. Logs flagged as removed are never returned.
    async fn logs_in_range(&self, from: u64, to: u64, filter: &LogFilter) -> Result<Vec<Log>>;
}
