//! Scripted in-memory chain for the poller tests.
//!
//! Block hashes encode `(fork, number)`, so after [`MockChain::reorg`] every
//! replaced height gets a hash that differs from the one stored earlier.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use chrono::Utc;

use logpoller_core::error::{LogPollerError, Result};
use logpoller_core::source::ChainDataSource;
use logpoller_core::types::{ChainId, Header, Log, LogFilter};

#[derive(Default)]
struct Inner {
    canonical: Vec<Header>,
    by_hash: HashMap<B256, Header>,
    logs: HashMap<B256, Vec<Log>>,
    fork: u64,
    lag: Option<u64>,
    failing: bool,
    bad_parent_at: Option<u64>,
}

fn hash_for(fork: u64, number: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&(fork + 1).to_be_bytes());
    bytes[24..].copy_from_slice(&number.to_be_bytes());
    B256::from(bytes)
}

impl Inner {
    fn push(&mut self) {
        let number = self.canonical.len() as u64;
        let header = Header {
            number,
            hash: hash_for(self.fork, number),
            parent_hash: self.canonical.last().map_or(B256::ZERO, |h| h.hash),
            timestamp: 1_700_000_000 + number * 12,
        };
        self.by_hash.insert(header.hash, header.clone());
        self.canonical.push(header);
    }

    fn head(&self) -> u64 {
        let tip = self.canonical.len() as u64 - 1;
        self.lag.map_or(tip, |lag| lag.min(tip))
    }

    fn check(&self) -> Result<()> {
        if self.failing {
            Err(LogPollerError::TransientSource("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

pub(crate) struct MockChain {
    chain_id: ChainId,
    inner: Mutex<Inner>,
}

impl MockChain {
    /// A chain with blocks `0..=height`.
    pub(crate) fn new(chain_id: ChainId, height: u64) -> Self {
        let mut inner = Inner::default();
        for _ in 0..=height {
            inner.push();
        }
        Self {
            chain_id,
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub(crate) fn height(&self) -> u64 {
        self.lock().canonical.len() as u64 - 1
    }

    pub(crate) fn hash_at(&self, number: u64) -> B256 {
        self.lock().canonical[number as usize].hash
    }

    pub(crate) fn mine(&self, blocks: u64) {
        let mut inner = self.lock();
        for _ in 0..blocks {
            inner.push();
        }
    }

    /// Replace the top `depth` blocks with `new_len` blocks on a fresh fork.
    pub(crate) fn reorg(&self, depth: u64, new_len: u64) {
        let mut inner = self.lock();
        inner.fork += 1;
        let keep = inner.canonical.len() - depth as usize;
        inner.canonical.truncate(keep);
        for _ in 0..new_len {
            inner.push();
        }
    }

    /// Emit a log in the current canonical block at `number`.
    pub(crate) fn emit(&self, number: u64, address: Address, event_sig: B256) -> Log {
        let mut inner = self.lock();
        let block_hash = inner.canonical[number as usize].hash;
        let in_block = inner.logs.entry(block_hash).or_default();
        let log = Log {
            chain_id: self.chain_id,
            block_hash,
            block_number: number,
            log_index: in_block.len() as u64,
            address,
            event_sig,
            topics: vec![event_sig],
            tx_hash: B256::with_last_byte(number as u8),
            data: Bytes::new(),
            observed_at: Utc::now(),
        };
        in_block.push(log.clone());
        log
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Report `head` as the latest block and pretend not to know anything above it.
    pub(crate) fn set_lag(&self, head: Option<u64>) {
        self.lock().lag = head;
    }

    /// Serve the header at `number` with a parent hash that links to nothing.
    pub(crate) fn corrupt_parent_at(&self, number: Option<u64>) {
        self.lock().bad_parent_at = number;
    }
}

#[async_trait]
impl ChainDataSource for MockChain {
    async fn latest_header(&self) -> Result<Header> {
        let inner = self.lock();
        inner.check()?;
        Ok(inner.canonical[inner.head() as usize].clone())
    }

    async fn header_by_number(&self, number: u64) -> Result<Header> {
        let inner = self.lock();
        inner.check()?;
        if number > inner.head() {
            return Err(LogPollerError::NotFound);
        }
        let mut header = inner.canonical[number as usize].clone();
        if inner.bad_parent_at == Some(number) {
            header.parent_hash = B256::repeat_byte(0xde);
        }
        Ok(header)
    }

    async fn header_by_hash(&self, hash: B256) -> Result<Header> {
        let inner = self.lock();
        inner.check()?;
        inner.by_hash.get(&hash).cloned().ok_or(LogPollerError::NotFound)
    }

    async fn logs_in_range(&self, from: u64, to: u64, filter: &LogFilter) -> Result<Vec<Log>> {
        let inner = self.lock();
        inner.check()?;
        let to = to.min(inner.head());
        let mut out = Vec::new();
        for number in from..=to {
            let hash = inner.canonical[number as usize].hash;
            if let Some(logs) = inner.logs.get(&hash) {
                out.extend(logs.iter().filter(|l| filter.matches(l)).cloned());
            }
        }
        Ok(out)
    }
}
