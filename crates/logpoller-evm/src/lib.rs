//! logpoller-evm: JSON-RPC chain data source and the per-chain reconciliation loop.
//!
//! ```text
//! JsonRpcSource ──► LogPoller::poll_once ──► LogStore::apply
//!   (reqwest)        (reorg walk-back,          (one transaction)
//!                     header linkage)
//! ```

pub mod builder;
pub mod poller;
pub mod rpc;

#[cfg(test)]
mod mock;

pub use builder::LogPollerBuilder;
pub use poller::{CycleOutcome, LogPoller};
pub use rpc::JsonRpcSource;
