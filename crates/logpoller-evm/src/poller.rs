//! The reconciliation loop: keeps one chain's store equal to a bounded,
//! reorg-corrected prefix of the source's canonical chain.
//!
//! # One cycle
//! 1. Read the source head and the stored tip.
//! 2. If the stored tip's hash still matches the source, continue from
//!    `tip + 1`. Otherwise walk back to the common ancestor (bounded by
//!    `max_reorg_depth`) and rebuild from `ancestor + 1`. A source head below
//!    the stored tip is compared at the head's height instead, so a switch to
//!    a shorter fork unwinds too.
//! 3. Fetch headers for at most `max_blocks_per_cycle` heights, checking that
//!    each links to its predecessor, then fetch their logs in
//!    `log_batch_size` chunks.
//! 4. Unwind, prune and insert as one [`ChainUpdate`].
//!
//! Any failure before step 4 leaves the store untouched; a failure inside it
//! rolls back. Either way the next tick starts over from whatever is stored.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use logpoller_core::config::{PollerConfig, PollerState};
use logpoller_core::error::{LogPollerError, OptionalExt, Result};
use logpoller_core::query::LogQuery;
use logpoller_core::reorg::{find_common_ancestor, ReorgEvent};
use logpoller_core::source::ChainDataSource;
use logpoller_core::store::{ChainUpdate, LogStore};
use logpoller_core::types::{Block, ChainId, Header, Log, LogFilter};

/// What one poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing new on the source.
    Idle,
    /// The source's head is below the stored tip on the same chain; nothing
    /// was written.
    SourceBehind,
    /// Blocks `from..=to` were appended.
    Advanced { from: u64, to: u64 },
    /// Everything above `ancestor` was replaced; `dropped` stored blocks went
    /// away and the new tip is `to`.
    Reorged { ancestor: u64, dropped: u64, to: u64 },
}

/// Where a cycle starts writing, and what the first new header must link to.
struct Plan {
    from: u64,
    parent: Option<Block>,
    reorg: Option<(ReorgEvent, u64)>,
}

/// Reconciliation loop for one chain.
pub struct LogPoller<S: LogStore + ?Sized, D: ChainDataSource + ?Sized> {
    config: PollerConfig,
    store: Arc<S>,
    source: Arc<D>,
    filter: Arc<RwLock<LogFilter>>,
    state: RwLock<PollerState>,
}

impl<S: LogStore + ?Sized, D: ChainDataSource + ?Sized> LogPoller<S, D> {
    /// Validates `config` and checks that `store` is bound to `config.chain_id`.
    pub fn new(config: PollerConfig, store: Arc<S>, source: Arc<D>) -> Result<Self> {
        config.validate()?;
        if store.chain_id() != config.chain_id {
            return Err(LogPollerError::Config(format!(
                "store is bound to chain {}, poller configured for chain {}",
                store.chain_id(),
                config.chain_id
            )));
        }
        Ok(Self {
            filter: Arc::new(RwLock::new(config.filter.clone())),
            config,
            store,
            source,
            state: RwLock::new(PollerState::Idle),
        })
    }

    pub fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn state(&self) -> PollerState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: PollerState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Widen the indexed set. Applies from the next fetched range onwards.
    pub fn register_filter(&self, filter: &LogFilter) {
        self.filter
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(filter);
        tracing::info!(
            chain_id = %self.config.chain_id,
            addresses = filter.addresses.len(),
            event_sigs = filter.event_sigs.len(),
            "filter registered"
        );
    }

    /// The filter currently used for `eth_getLogs`.
    pub fn filter(&self) -> LogFilter {
        self.filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read-only confirmation queries over this poller's store.
    pub fn query(&self) -> LogQuery<S> {
        LogQuery::new(Arc::clone(&self.store))
    }

    /// Run one reconciliation cycle.
    pub async fn poll_once(&self) -> Result<CycleOutcome> {
        self.set_state(PollerState::Polling);
        let outcome = self.cycle().await;
        self.set_state(PollerState::Idle);
        outcome
    }

    /// Poll every `poll_interval` until `shutdown` flips to `true`.
    ///
    /// Cycles never overlap and a running cycle is never interrupted; shutdown
    /// is only observed between cycles. Failures are logged and retried on the
    /// next tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let chain_id = self.config.chain_id;
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            chain_id = %chain_id,
            poll_interval_ms = self.config.poll_interval_ms,
            "log poller started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once().await {
                Ok(CycleOutcome::Idle) => {}
                Ok(outcome) => tracing::debug!(chain_id = %chain_id, ?outcome, "poll cycle done"),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(chain_id = %chain_id, error = %e, "poll cycle failed, retrying next tick")
                }
                Err(e) => tracing::error!(chain_id = %chain_id, error = %e, "poll cycle failed"),
            }
        }

        tracing::info!(chain_id = %chain_id, "log poller stopped");
    }

    async fn cycle(&self) -> Result<CycleOutcome> {
        let head = self.source.latest_header().await?;

        let plan = match self.store.select_latest_block().await.optional()? {
            None => Plan {
                from: self.config.start_block.unwrap_or(head.number),
                parent: None,
                reorg: None,
            },
            Some(tip) => match self.plan_from_tip(&head, tip).await? {
                Some(plan) => plan,
                None => return Ok(CycleOutcome::SourceBehind),
            },
        };

        if plan.from > head.number {
            return Ok(CycleOutcome::Idle);
        }

        let span = self.config.max_blocks_per_cycle - 1;
        let to = head.number.min(plan.from.saturating_add(span));
        let headers = self.fetch_headers(plan.from, to, plan.parent.as_ref()).await?;
        let logs = self.fetch_logs(plan.from, to, &headers).await?;

        let prune_through = self.config.prune_through(to);
        let floor = prune_through.map_or(0, |p| p + 1);
        let update = ChainUpdate {
            unwind_above: plan.reorg.as_ref().map(|(event, _)| event.ancestor),
            prune_through,
            blocks: headers
                .iter()
                .filter(|h| h.number >= floor)
                .map(|h| (h.hash, h.number))
                .collect(),
            logs: logs.into_iter().filter(|l| l.block_number >= floor).collect(),
        };
        let log_count = update.logs.len();
        self.store.apply(update).await?;

        let outcome = match plan.reorg {
            Some((event, stored_tip)) => CycleOutcome::Reorged {
                ancestor: event.ancestor,
                dropped: stored_tip - event.ancestor,
                to,
            },
            None => CycleOutcome::Advanced { from: plan.from, to },
        };
        tracing::info!(
            chain_id = %self.config.chain_id,
            from = plan.from,
            to,
            logs = log_count,
            head = head.number,
            "chain advanced"
        );
        Ok(outcome)
    }

    /// Decide where to continue from a non-empty store. `None` when the source
    /// is behind the stored tip on the same chain.
    async fn plan_from_tip(&self, head: &Header, tip: Block) -> Result<Option<Plan>> {
        let chain_id = self.config.chain_id;

        if head.number < tip.number {
            // Below the stored tip, the source's head is only a lag if it is
            // still one of our blocks. Otherwise it moved to a shorter fork.
            let Some(stored) = self.store.select_block_by_number(head.number).await.optional()? else {
                tracing::warn!(
                    chain_id = %chain_id,
                    head = head.number,
                    tip = tip.number,
                    "source head below stored history"
                );
                return Ok(None);
            };
            if stored.hash == head.hash {
                tracing::debug!(
                    chain_id = %chain_id,
                    head = head.number,
                    tip = tip.number,
                    "source lagging behind stored tip"
                );
                return Ok(None);
            }
            return self.reconcile(head.number, tip).await.map(Some);
        }

        let Some(remote) = self.source.header_by_number(tip.number).await.optional()? else {
            return Ok(None);
        };

        if remote.hash == tip.hash {
            return Ok(Some(Plan {
                from: tip.number + 1,
                parent: Some(tip),
                reorg: None,
            }));
        }

        self.reconcile(tip.number, tip).await.map(Some)
    }

    /// Walk back from `divergent`, where stored and source hashes disagree, and
    /// plan a rebuild from the common ancestor.
    async fn reconcile(&self, divergent: u64, tip: Block) -> Result<Plan> {
        self.set_state(PollerState::Reconciling);
        let event = find_common_ancestor(
            self.store.as_ref(),
            self.source.as_ref(),
            divergent,
            self.config.max_reorg_depth,
        )
        .await?;
        let ancestor = self.store.select_block_by_number(event.ancestor).await?;

        Ok(Plan {
            from: event.ancestor + 1,
            parent: Some(ancestor),
            reorg: Some((event, tip.number)),
        })
    }

    /// Headers for `from..=to`, each linked to its predecessor.
    async fn fetch_headers(&self, from: u64, to: u64, parent: Option<&Block>) -> Result<Vec<Header>> {
        let mut headers: Vec<Header> = Vec::with_capacity((to - from + 1) as usize);

        for number in from..=to {
            let header = match self.source.header_by_number(number).await {
                Ok(h) => h,
                Err(LogPollerError::NotFound) => {
                    return Err(LogPollerError::TransientSource(format!(
                        "source lost block {number} below its own head"
                    )))
                }
                Err(e) => return Err(e),
            };

            let linked = match headers.last() {
                Some(prev) => header.extends(prev),
                None => parent.map_or(header.number == number, |p| header.extends_block(p)),
            };
            if !linked || header.number != number {
                return Err(LogPollerError::TransientSource(format!(
                    "source reorganized mid-cycle: block {number} ({}) does not extend its parent",
                    header.hash
                )));
            }
            headers.push(header);
        }
        Ok(headers)
    }

    /// Logs for `from..=to` under the current filter, checked against `headers`.
    async fn fetch_logs(&self, from: u64, to: u64, headers: &[Header]) -> Result<Vec<Log>> {
        let filter = self.filter();
        let batch = self.config.log_batch_size;
        let mut logs = Vec::new();

        let mut start = from;
        while start <= to {
            let end = start.saturating_add(batch - 1).min(to);
            logs.extend(self.source.logs_in_range(start, end, &filter).await?);
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }

        for log in &logs {
            let expected = log
                .block_number
                .checked_sub(from)
                .and_then(|i| headers.get(i as usize));
            match expected {
                Some(h) if h.hash == log.block_hash => {}
                _ => {
                    return Err(LogPollerError::TransientSource(format!(
                        "log {}:{} at block {} is not on the fetched chain",
                        log.block_hash, log.log_index, log.block_number
                    )))
                }
            }
            if log.chain_id != self.config.chain_id {
                return Err(LogPollerError::TransientSource(format!(
                    "source returned a log for chain {}, expected {}",
                    log.chain_id, self.config.chain_id
                )));
            }
        }

        logs.sort_by_key(Log::position);
        Ok(logs)
    }
}
