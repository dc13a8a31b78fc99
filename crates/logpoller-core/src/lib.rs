//! logpoller-core: foundation for the reorg-safe EVM log poller.
//!
//! # Architecture
//!
//! ```text
//! LogPollerBuilder → LogPoller (reconciliation loop, one per chain)
//!                        ├── ChainDataSource  (JSON-RPC node / test mock)
//!                        ├── find_common_ancestor (bounded reorg walk-back)
//!                        ├── ChainUpdate      (one atomic write per cycle)
//!                        └── LogStore backend (memory / SQLite / Postgres)
//!
//! LogQuery (read-only, confirmation-gated) ← JobSpec::log_trigger()
//! ```

pub mod config;
pub mod confirmations;
pub mod error;
pub mod jobs;
pub mod query;
pub mod reorg;
pub mod source;
pub mod store;
pub mod types;

pub use config::{PollerConfig, PollerState};
pub use error::{LogPollerError, OptionalExt, Result};
pub use jobs::{JobSpec, LogTrigger};
pub use query::LogQuery;
pub use reorg::{find_common_ancestor, ReorgEvent, ReorgKind};
pub use source::ChainDataSource;
pub use store::{ChainUpdate, LogStore};
pub use types::{Block, ChainId, Header, Log, LogFilter};
