//! Poller configuration and runtime state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LogPollerError, Result};
use crate::types::{ChainId, LogFilter};

/// Upper bound on `max_blocks_per_cycle`. One cycle holds every header it
/// fetches in memory before writing.
pub const MAX_BLOCKS_PER_CYCLE: u64 = 10_000;

/// Configuration for one chain's log poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Chain this poller writes under.
    pub chain_id: ChainId,
    /// First block to index on an empty store. `None` = start at the current head.
    pub start_block: Option<u64>,
    /// Tick interval between poll cycles (milliseconds).
    pub poll_interval_ms: u64,
    /// How far below the stored tip the ancestor search may walk before giving up.
    pub max_reorg_depth: u64,
    /// Largest confirmation depth any consumer will ask for.
    pub max_confirmation_depth: u64,
    /// Keep only this many blocks below the tip. `None` = keep everything.
    pub retention_depth: Option<u64>,
    /// Upper bound on blocks written by one cycle.
    pub max_blocks_per_cycle: u64,
    /// Blocks per `eth_getLogs` call.
    pub log_batch_size: u64,
    /// Addresses / event signatures to index.
    pub filter: LogFilter,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            chain_id: ChainId(1),
            start_block: None,
            poll_interval_ms: 2000,
            max_reorg_depth: 64,
            max_confirmation_depth: 12,
            retention_depth: None,
            max_blocks_per_cycle: 128,
            log_batch_size: 1000,
            filter: LogFilter::default(),
        }
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(LogPollerError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.max_reorg_depth == 0 {
            return Err(LogPollerError::Config("max_reorg_depth must be > 0".into()));
        }
        if self.max_blocks_per_cycle == 0 || self.max_blocks_per_cycle > MAX_BLOCKS_PER_CYCLE {
            return Err(LogPollerError::Config(format!(
                "max_blocks_per_cycle must be between 1 and {MAX_BLOCKS_PER_CYCLE}"
            )));
        }
        if self.log_batch_size == 0 {
            return Err(LogPollerError::Config("log_batch_size must be > 0".into()));
        }
        if let Some(retention) = self.retention_depth {
            let floor = self.max_confirmation_depth.max(self.max_reorg_depth);
            if retention <= floor {
                return Err(LogPollerError::Config(format!(
                    "retention_depth ({retention}) must exceed both max_confirmation_depth ({}) and max_reorg_depth ({})",
                    self.max_confirmation_depth, self.max_reorg_depth
                )));
            }
        }
        Ok(())
    }

    /// Highest height retention may delete once the tip is at `tip`.
    pub fn prune_through(&self, tip: u64) -> Option<u64> {
        let retention = self.retention_depth?;
        tip.checked_sub(retention)
    }
}

/// Where the reconciliation loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollerState {
    /// Waiting for the next tick.
    Idle,
    /// Comparing the stored tip with the source and advancing.
    Polling,
    /// Walking back to a common ancestor and rebuilding the tail.
    Reconciling,
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Polling => write!(f, "polling"),
            Self::Reconciling => write!(f, "reconciling"),
        }
    }
}
