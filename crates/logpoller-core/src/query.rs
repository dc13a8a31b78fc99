//! Read-side façade for job pipelines.
//!
//! These are the only entry points job-triggering logic uses. Both are
//! read-only, and "not confirmed yet" comes back as `Ok(None)` rather than an
//! error. Confirmation depth is measured against the tip stored *now*; callers
//! must re-query after every poll cycle instead of caching answers.

use std::sync::Arc;

use alloy_primitives::{Address, B256};

use crate::confirmations;
use crate::error::{OptionalExt, Result};
use crate::store::LogStore;
use crate::types::{ChainId, Log};

pub struct LogQuery<S: LogStore + ?Sized> {
    store: Arc<S>,
}

impl<S: LogStore + ?Sized> Clone for LogQuery<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LogStore + ?Sized> LogQuery<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn chain_id(&self) -> ChainId {
        self.store.chain_id()
    }

    /// Latest `event_sig` log from `address` with at least `confs` confirmations.
    pub async fn latest_confirmed(
        &self,
        event_sig: B256,
        address: Address,
        confs: u64,
    ) -> Result<Option<Log>> {
        self.store
            .select_latest_log_event_sig_with_confs(event_sig, address, confs)
            .await
            .optional()
    }

    /// Latest occurrence of every observed `(address, topic)` pair since `start_block`.
    pub async fn latest_per_address_topic_pair(
        &self,
        start_block: u64,
        addresses: &[Address],
        topics: &[B256],
    ) -> Result<Vec<Log>> {
        self.store
            .latest_log_event_sigs_addrs(start_block, addresses, topics)
            .await
    }

    /// Confirmations `block_number` currently has under the stored tip.
    ///
    /// `None` if nothing is stored yet or the block is above the tip.
    pub async fn confirmations(&self, block_number: u64) -> Result<Option<u64>> {
        let Some(latest) = self.store.select_latest_block().await.optional()? else {
            return Ok(None);
        };
        Ok(confirmations::confirmations(latest.number, block_number))
    }
}
