//! logpoller-storage: block/log store backends for the log poller.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - `sqlite`: SQLite via `sqlx` (embedded, single-file persistence)
//! - `postgres`: PostgreSQL via `sqlx` (shared production database)
//!
//! Every backend hands out chain-scoped handles: one physical database serves
//! any number of chains, and `with_chain` derives a handle for another one.

pub mod memory;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
mod rows;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(test)]
pub(crate) mod conformance;

pub use memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresOptions, PostgresStore};

use logpoller_core::error::{LogPollerError, Result};
use logpoller_core::types::{ChainId, Log};

/// Every log written through a handle must belong to that handle's chain.
pub(crate) fn check_chain(chain_id: ChainId, logs: &[Log]) -> Result<()> {
    match logs.iter().find(|l| l.chain_id != chain_id) {
        Some(foreign) => Err(LogPollerError::Storage(format!(
            "log {}:{} belongs to chain {}, store is bound to chain {chain_id}",
            foreign.block_hash, foreign.log_index, foreign.chain_id
        ))),
        None => Ok(()),
    }
}
