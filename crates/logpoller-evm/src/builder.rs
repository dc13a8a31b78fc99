//! Fluent builder API for creating log pollers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use alloy_primitives::address;
//! use logpoller_core::types::{ChainId, LogFilter};
//! use logpoller_evm::{JsonRpcSource, LogPollerBuilder};
//! use logpoller_storage::InMemoryStore;
//!
//! # fn main() -> logpoller_core::Result<()> {
//! let store = Arc::new(InMemoryStore::new(ChainId(1)));
//! let source = Arc::new(JsonRpcSource::new("http://localhost:8545", ChainId(1), Duration::from_secs(10))?);
//!
//! let _poller = LogPollerBuilder::new()
//!     .chain_id(1)
//!     .start_block(19_000_000)
//!     .max_reorg_depth(64)
//!     .filter(LogFilter::address(address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")))
//!     .build(store, source)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use logpoller_core::config::PollerConfig;
use logpoller_core::error::Result;
use logpoller_core::source::ChainDataSource;
use logpoller_core::store::LogStore;
use logpoller_core::types::{ChainId, LogFilter};

use crate::poller::LogPoller;

/// Fluent builder for `PollerConfig` and `LogPoller`.
#[derive(Debug, Default)]
pub struct LogPollerBuilder {
    config: PollerConfig,
}

impl LogPollerBuilder {
    pub fn new() -> Self {
        Self {
            config: PollerConfig::default(),
        }
    }

    /// Start from an existing config, e.g. one read from a file.
    pub fn from_config(config: PollerConfig) -> Self {
        Self { config }
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.config.chain_id = ChainId(chain_id);
        self
    }

    /// First block to index when the store is empty.
    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = Some(block);
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Deepest reorg the poller will follow before refusing.
    pub fn max_reorg_depth(mut self, depth: u64) -> Self {
        self.config.max_reorg_depth = depth;
        self
    }

    pub fn max_confirmation_depth(mut self, depth: u64) -> Self {
        self.config.max_confirmation_depth = depth;
        self
    }

    /// Keep only `depth` blocks below the tip.
    pub fn retention_depth(mut self, depth: u64) -> Self {
        self.config.retention_depth = Some(depth);
        self
    }

    pub fn max_blocks_per_cycle(mut self, n: u64) -> Self {
        self.config.max_blocks_per_cycle = n;
        self
    }

    /// Set the number of blocks per `eth_getLogs` batch.
    pub fn log_batch_size(mut self, size: u64) -> Self {
        self.config.log_batch_size = size;
        self
    }

    /// Replace the address/event filter.
    pub fn filter(mut self, filter: LogFilter) -> Self {
        self.config.filter = filter;
        self
    }

    /// Build the `PollerConfig` without validating it.
    pub fn build_config(self) -> PollerConfig {
        self.config
    }

    /// Validate the config and bind it to a store and source.
    pub fn build<S, D>(self, store: Arc<S>, source: Arc<D>) -> Result<LogPoller<S, D>>
    where
        S: LogStore + ?Sized,
        D: ChainDataSource + ?Sized,
    {
        LogPoller::new(self.config, store, source)
    }
}
