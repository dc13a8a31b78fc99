//! In-memory storage backend.
//!
//! Stores canonical blocks and their logs in RAM, partitioned by chain behind
//! one shared lock. Useful for testing and short-lived pollers that don't need
//! persistence.
//!
//! Multi-row writes stage their changes on a copy of the written chain's rows
//! and swap it in under the write lock, so a failed write leaves nothing behind
//! and readers only ever observe the state before or after it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use logpoller_core::error::{LogPollerError, Result};
use logpoller_core::store::{ChainUpdate, LogStore};
use logpoller_core::types::{Block, ChainId, Log};

use crate::check_chain;

/// Rows of one chain.
#[derive(Debug, Clone, Default)]
struct ChainTables {
    blocks: BTreeMap<u64, Block>,
    /// Keyed by scan order: `(block_number, log_index, block_hash)`.
    logs: BTreeMap<(u64, u64, B256), Log>,
    /// Uniqueness of `(block_hash, log_index)`.
    log_keys: HashSet<(B256, u64)>,
}

impl ChainTables {
    fn insert_block(&mut self, chain_id: ChainId, hash: B256, number: u64) -> Result<()> {
        if self.blocks.contains_key(&number) {
            return Err(LogPollerError::Storage(format!(
                "block {number} already stored for chain {chain_id}"
            )));
        }
        self.blocks.insert(
            number,
            Block {
                chain_id,
                number,
                hash,
                observed_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn insert_log(&mut self, log: &Log) -> Result<()> {
        if !self.log_keys.insert((log.block_hash, log.log_index)) {
            return Err(LogPollerError::Storage(format!(
                "log {}:{} already stored for chain {}",
                log.block_hash, log.log_index, log.chain_id
            )));
        }
        let mut log = log.clone();
        log.observed_at = Utc::now();
        self.logs
            .insert((log.block_number, log.log_index, log.block_hash), log);
        Ok(())
    }

    /// Remove blocks and logs whose height satisfies `doomed`.
    fn delete_where(&mut self, doomed: impl Fn(u64) -> bool) {
        self.blocks.retain(|number, _| !doomed(*number));
        let log_keys = &mut self.log_keys;
        self.logs.retain(|(number, index, hash), _| {
            let keep = !doomed(*number);
            if !keep {
                log_keys.remove(&(*hash, *index));
            }
            keep
        });
    }

    fn logs(&self) -> impl Iterator<Item = &Log> {
        self.logs.values()
    }

    fn latest_block(&self) -> Option<&Block> {
        self.blocks.values().next_back()
    }
}

type Tables = HashMap<ChainId, ChainTables>;

/// In-memory block/log store bound to one chain.
///
/// Cloning (or [`InMemoryStore::with_chain`]) shares the underlying tables.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    chain_id: ChainId,
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            tables: Arc::default(),
        }
    }

    /// A handle for another chain over the same tables.
    pub fn with_chain(&self, chain_id: ChainId) -> Self {
        Self {
            chain_id,
            tables: Arc::clone(&self.tables),
        }
    }

    /// Number of blocks stored for this chain.
    pub fn block_count(&self) -> Result<usize> {
        self.view(|chain| chain.blocks.len())
    }

    /// Number of logs stored for this chain.
    pub fn log_count(&self) -> Result<usize> {
        self.view(|chain| chain.logs.len())
    }

    /// Run `f` over this chain's rows under the read lock.
    fn view<T>(&self, f: impl FnOnce(&ChainTables) -> T) -> Result<T> {
        let tables = self.read()?;
        let empty = ChainTables::default();
        Ok(f(tables.get(&self.chain_id).unwrap_or(&empty)))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| LogPollerError::Storage("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| LogPollerError::Storage("in-memory store lock poisoned".into()))
    }

    /// Run `f` against a copy of this chain's rows and publish it only on
    /// success. Other chains' rows are neither copied nor touched.
    fn transaction(&self, f: impl FnOnce(&mut ChainTables) -> Result<()>) -> Result<()> {
        let mut tables = self.write()?;
        let mut staged = tables.get(&self.chain_id).cloned().unwrap_or_default();
        f(&mut staged)?;
        tables.insert(self.chain_id, staged);
        Ok(())
    }
}

#[async_trait]
impl LogStore for InMemoryStore {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn insert_block(&self, hash: B256, number: u64) -> Result<()> {
        self.write()?
            .entry(self.chain_id)
            .or_default()
            .insert_block(self.chain_id, hash, number)?;
        debug!(chain_id = %self.chain_id, number, %hash, "block stored");
        Ok(())
    }

    async fn select_block_by_hash(&self, hash: B256) -> Result<Block> {
        self.view(|chain| {
            chain
                .blocks
                .values()
                .find(|block| block.hash == hash)
                .cloned()
        })?
        .ok_or(LogPollerError::NotFound)
    }

    async fn select_block_by_number(&self, number: u64) -> Result<Block> {
        self.view(|chain| chain.blocks.get(&number).cloned())?
            .ok_or(LogPollerError::NotFound)
    }

    async fn select_latest_block(&self) -> Result<Block> {
        self.view(|chain| chain.latest_block().cloned())?
            .ok_or(LogPollerError::NotFound)
    }

    async fn delete_range_blocks(&self, from: u64, to: u64) -> Result<()> {
        if from > to {
            return Ok(());
        }
        if let Some(chain) = self.write()?.get_mut(&self.chain_id) {
            chain.delete_where(|n| (from..=to).contains(&n));
        }
        debug!(chain_id = %self.chain_id, from, to, "block range deleted");
        Ok(())
    }

    async fn insert_logs(&self, logs: &[Log]) -> Result<()> {
        check_chain(self.chain_id, logs)?;
        self.transaction(|chain| logs.iter().try_for_each(|log| chain.insert_log(log)))?;
        debug!(chain_id = %self.chain_id, count = logs.len(), "logs stored");
        Ok(())
    }

    async fn select_logs_by_block_range(&self, from: u64, to: u64) -> Result<Vec<Log>> {
        self.view(|chain| {
            chain
                .logs()
                .filter(|l| (from..=to).contains(&l.block_number))
                .cloned()
                .collect()
        })
    }

    async fn select_logs_by_block_range_filter(
        &self,
        from: u64,
        to: u64,
        address: Address,
        event_sig: B256,
    ) -> Result<Vec<Log>> {
        self.view(|chain| {
            chain
                .logs()
                .filter(|l| (from..=to).contains(&l.block_number))
                .filter(|l| l.address == address && l.event_sig == event_sig)
                .cloned()
                .collect()
        })
    }

    async fn select_latest_log_event_sig_with_confs(
        &self,
        event_sig: B256,
        address: Address,
        confs: u64,
    ) -> Result<Log> {
        self.view(|chain| {
            let bound = chain.latest_block()?.number.checked_sub(confs)?;
            // Scan order is ascending, so the last match is the latest.
            chain
                .logs()
                .filter(|l| l.block_number <= bound)
                .filter(|l| l.address == address && l.event_sig == event_sig)
                .last()
                .cloned()
        })?
        .ok_or(LogPollerError::NotFound)
    }

    async fn latest_log_event_sigs_addrs(
        &self,
        start_block: u64,
        addresses: &[Address],
        event_sigs: &[B256],
    ) -> Result<Vec<Log>> {
        self.view(|chain| {
            let mut latest: HashMap<(Address, B256), &Log> = HashMap::new();
            for log in chain
                .logs()
                .filter(|l| l.block_number >= start_block)
                .filter(|l| addresses.contains(&l.address) && event_sigs.contains(&l.event_sig))
            {
                // Ascending scan: later entries win.
                latest.insert((log.address, log.event_sig), log);
            }

            let mut out: Vec<Log> = latest.into_values().cloned().collect();
            out.sort_by_key(Log::position);
            out
        })
    }

    async fn apply(&self, update: ChainUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        check_chain(self.chain_id, &update.logs)?;
        let chain_id = self.chain_id;
        self.transaction(|chain| {
            if let Some(ancestor) = update.unwind_above {
                chain.delete_where(|n| n > ancestor);
            }
            if let Some(floor) = update.prune_through {
                chain.delete_where(|n| n <= floor);
            }
            for (hash, number) in &update.blocks {
                chain.insert_block(chain_id, *hash, *number)?;
            }
            update.logs.iter().try_for_each(|log| chain.insert_log(log))
        })?;
        debug!(
            chain_id = %chain_id,
            unwind_above = ?update.unwind_above,
            prune_through = ?update.prune_through,
            blocks = update.blocks.len(),
            logs = update.logs.len(),
            "chain update applied"
        );
        Ok(())
    }
}
