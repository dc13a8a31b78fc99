//! The block/log store contract.
//!
//! A store handle is bound to one [`ChainId`] at construction; every operation
//! is implicitly scoped to it. Backends live in `logpoller-storage`.

use alloy_primitives::{Address, B256};
use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Block, ChainId, Log};

/// Everything one poll cycle writes, applied as a single transaction.
///
/// Order of application: unwind, prune, insert blocks, insert logs.
#[derive(Debug, Clone, Default)]
pub struct ChainUpdate {
    /// Delete every block and log strictly above this height (reorg unwind).
    pub unwind_above: Option<u64>,
    /// Delete every block and log at or below this height (retention).
    pub prune_through: Option<u64>,
    /// New canonical blocks as `(hash, number)`, ascending.
    pub blocks: Vec<(B256, u64)>,
    pub logs: Vec<Log>,
}

impl ChainUpdate {
    pub fn is_empty(&self) -> bool {
        self.unwind_above.is_none()
            && self.prune_through.is_none()
            && self.blocks.is_empty()
            && self.logs.is_empty()
    }
}

/// Chain-scoped durable storage for canonical blocks and their logs.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// The chain this handle reads and writes.
    fn chain_id(&self) -> ChainId;

    /// Append a canonical block. Fails with `Storage` if the height is occupied.
    async fn insert_block(&self, hash: B256, number: u64) -> Result<()>;

    async fn select_block_by_hash(&self, hash: B256) -> Result<Block>;

    async fn select_block_by_number(&self, number: u64) -> Result<Block>;

    /// The stored block with the greatest number. `NotFound` on an empty chain.
    async fn select_latest_block(&self) -> Result<Block>;

    /// Delete blocks in `[from, to]` together with every log at those heights.
    async fn delete_range_blocks(&self, from: u64, to: u64) -> Result<()>;

    /// Append logs atomically: all rows land or none do.
    async fn insert_logs(&self, logs: &[Log]) -> Result<()>;

    /// Logs with `block_number` in `[from, to]`, ordered by `(block_number, log_index)`.
    async fn select_logs_by_block_range(&self, from: u64, to: u64) -> Result<Vec<Log>>;

    async fn select_logs_by_block_range_filter(
        &self,
        from: u64,
        to: u64,
        address: Address,
        event_sig: B256,
    ) -> Result<Vec<Log>>;

    /// Latest matching log at least `confs` blocks below the stored tip.
    ///
    /// `NotFound` if no block is stored or nothing satisfies the bound.
    async fn select_latest_log_event_sig_with_confs(
        &self,
        event_sig: B256,
        address: Address,
        confs: u64,
    ) -> Result<Log>;

    /// One row per observed `(address, event_sig)` pair: its latest log at or
    /// after `start_block`, ties broken by the greatest log index.
    async fn latest_log_event_sigs_addrs(
        &self,
        start_block: u64,
        addresses: &[Address],
        event_sigs: &[B256],
    ) -> Result<Vec<Log>>;

    /// Apply a whole cycle's writes atomically.
    async fn apply(&self, update: ChainUpdate) -> Result<()>;
}
