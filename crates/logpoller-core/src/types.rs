//! Shared types for the log poller.

use std::fmt;

use alloy_primitives::{Address, Bytes, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── ChainId ──────────────────────────────────────────────────────────────────

/// Numeric EVM chain identifier. Every stored row is scoped by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl ChainId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A block header the indexer currently believes is canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub chain_id: ChainId,
    pub number: u64,
    pub hash: B256,
    /// When this row was written.
    pub observed_at: DateTime<Utc>,
}

// ─── Log ──────────────────────────────────────────────────────────────────────

/// One event log emitted inside a canonical block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub chain_id: ChainId,
    pub block_hash: B256,
    pub block_number: u64,
    /// Position of the log within its block.
    pub log_index: u64,
    pub address: Address,
    /// topic0, the event signature hash.
    pub event_sig: B256,
    /// All topics, topic0 included.
    pub topics: Vec<B256>,
    pub tx_hash: B256,
    pub data: Bytes,
    /// When this row was written. Stores overwrite it on insert.
    pub observed_at: DateTime<Utc>,
}

impl Log {
    /// Ordering key for range scans.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

// ─── Header ───────────────────────────────────────────────────────────────────

/// A block header as reported by a chain data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
}

impl Header {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &Header) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }

    /// Returns `true` if `self` sits directly on top of the stored block `parent`.
    pub fn extends_block(&self, parent: &Block) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}

// ─── LogFilter ────────────────────────────────────────────────────────────────

/// Which logs to index. An empty list matches everything on that dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    #[serde(default)]
    pub addresses: Vec<Address>,
    #[serde(default)]
    pub event_sigs: Vec<B256>,
}

impl LogFilter {
    /// Create a filter for a single contract address.
    pub fn address(addr: Address) -> Self {
        Self {
            addresses: vec![addr],
            ..Default::default()
        }
    }

    /// Add a topic0 (event signature) to the filter.
    pub fn event_sig(mut self, sig: B256) -> Self {
        if !self.event_sigs.contains(&sig) {
            self.event_sigs.push(sig);
        }
        self
    }

    pub fn matches_address(&self, address: &Address) -> bool {
        self.addresses.is_empty() || self.addresses.contains(address)
    }

    pub fn matches_event_sig(&self, sig: &B256) -> bool {
        self.event_sigs.is_empty() || self.event_sigs.contains(sig)
    }

    pub fn matches(&self, log: &Log) -> bool {
        self.matches_address(&log.address) && self.matches_event_sig(&log.event_sig)
    }

    /// Union of two filters.
    ///
    /// A side that matches everything on a dimension keeps matching everything.
    pub fn merge(&mut self, other: &LogFilter) {
        if self.addresses.is_empty() || other.addresses.is_empty() {
            self.addresses.clear();
        } else {
            for addr in &other.addresses {
                if !self.addresses.contains(addr) {
                    self.addresses.push(*addr);
                }
            }
        }

        if self.event_sigs.is_empty() || other.event_sigs.is_empty() {
            self.event_sigs.clear();
        } else {
            for sig in &other.event_sigs {
                if !self.event_sigs.contains(sig) {
                    self.event_sigs.push(*sig);
                }
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
