//! Behaviour every [`LogStore`] backend must share.
//!
//! Each backend's test module builds its own handles and calls these. Stores
//! passed in must start empty; `other` is a handle for a second chain over the
//! same database.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256};
use chrono::Utc;

use logpoller_core::error::LogPollerError;
use logpoller_core::query::LogQuery;
use logpoller_core::store::{ChainUpdate, LogStore};
use logpoller_core::types::{ChainId, Log};

pub(crate) fn h(n: u64) -> B256 {
    B256::left_padding_from(&n.to_be_bytes())
}

pub(crate) fn log(
    chain_id: ChainId,
    block_hash: B256,
    block_number: u64,
    log_index: u64,
    address: Address,
    event_sig: B256,
) -> Log {
    Log {
        chain_id,
        block_hash,
        block_number,
        log_index,
        address,
        event_sig,
        topics: vec![event_sig, B256::with_last_byte(0xee)],
        tx_hash: B256::repeat_byte(0x11),
        data: Bytes::from_static(b"hello"),
        observed_at: Utc::now(),
    }
}

/// Blocks `from..=to` with hashes `h(n)`.
async fn chain_of<S: LogStore + ?Sized>(store: &S, from: u64, to: u64) {
    for n in from..=to {
        store.insert_block(h(n), n).await.unwrap();
    }
}

pub(crate) async fn block_round_trip<S: LogStore + ?Sized>(store: &S) {
    assert!(store.select_latest_block().await.unwrap_err().is_not_found());

    store.insert_block(h(10), 10).await.unwrap();
    let block = store.select_block_by_hash(h(10)).await.unwrap();
    assert_eq!(block.number, 10);
    assert_eq!(block.hash, h(10));
    assert_eq!(block.chain_id, store.chain_id());

    assert_eq!(store.select_block_by_number(10).await.unwrap().hash, h(10));
    assert_eq!(store.select_latest_block().await.unwrap().number, 10);

    assert!(store.select_block_by_hash(h(99)).await.unwrap_err().is_not_found());
    assert!(store.select_block_by_number(11).await.unwrap_err().is_not_found());
}

/// Hashes are not unique across heights; heights are.
pub(crate) async fn same_hash_at_two_heights<S: LogStore + ?Sized>(store: &S) {
    let hash = B256::repeat_byte(0x42);
    store.insert_block(hash, 10).await.unwrap();
    store.insert_block(hash, 20).await.unwrap();
    assert_eq!(store.select_latest_block().await.unwrap().number, 20);

    let err = store.insert_block(h(7), 20).await.unwrap_err();
    assert!(matches!(err, LogPollerError::Storage(_)));
    assert_eq!(store.select_block_by_number(20).await.unwrap().hash, hash);
}

pub(crate) async fn chain_isolation<S: LogStore + ?Sized>(a: &S, b: &S) {
    let addr = Address::with_last_byte(1);
    let sig = B256::with_last_byte(2);

    // Identical hashes and heights on both chains.
    chain_of(a, 1, 3).await;
    chain_of(b, 1, 3).await;
    a.insert_logs(&[log(a.chain_id(), h(2), 2, 0, addr, sig)])
        .await
        .unwrap();
    b.insert_logs(&[log(b.chain_id(), h(2), 2, 0, addr, sig)])
        .await
        .unwrap();

    a.delete_range_blocks(2, 3).await.unwrap();

    assert_eq!(a.select_latest_block().await.unwrap().number, 1);
    assert_eq!(b.select_latest_block().await.unwrap().number, 3);
    assert!(a.select_block_by_hash(h(3)).await.unwrap_err().is_not_found());
    assert_eq!(b.select_block_by_hash(h(3)).await.unwrap().chain_id, b.chain_id());

    assert!(a.select_logs_by_block_range(0, 10).await.unwrap().is_empty());
    let logs = b.select_logs_by_block_range(0, 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].chain_id, b.chain_id());

    // A handle never writes another chain's rows.
    let err = a
        .insert_logs(&[log(b.chain_id(), h(1), 1, 5, addr, sig)])
        .await
        .unwrap_err();
    assert!(matches!(err, LogPollerError::Storage(_)));
    assert_eq!(b.select_logs_by_block_range(0, 10).await.unwrap().len(), 1);
}

pub(crate) async fn delete_range_precision<S: LogStore + ?Sized>(store: &S) {
    let chain = store.chain_id();
    let addr = Address::with_last_byte(1);
    let sig = B256::with_last_byte(2);
    chain_of(store, 10, 12).await;
    store
        .insert_logs(&[
            log(chain, h(10), 10, 0, addr, sig),
            log(chain, h(11), 11, 0, addr, sig),
            log(chain, h(11), 11, 1, addr, sig),
            log(chain, h(12), 12, 0, addr, sig),
        ])
        .await
        .unwrap();

    store.delete_range_blocks(11, 11).await.unwrap();

    assert!(store.select_block_by_number(10).await.is_ok());
    assert!(store.select_block_by_number(11).await.unwrap_err().is_not_found());
    assert!(store.select_block_by_number(12).await.is_ok());
    let heights: Vec<u64> = store
        .select_logs_by_block_range(0, 100)
        .await
        .unwrap()
        .iter()
        .map(|l| l.block_number)
        .collect();
    assert_eq!(heights, vec![10, 12]);

    // Empty, repeated and inverted ranges are harmless.
    store.delete_range_blocks(11, 11).await.unwrap();
    store.delete_range_blocks(50, 60).await.unwrap();
    store.delete_range_blocks(12, 10).await.unwrap();
    assert_eq!(store.select_latest_block().await.unwrap().number, 12);
}

pub(crate) async fn insert_logs_is_atomic<S: LogStore + ?Sized>(store: &S) {
    let chain = store.chain_id();
    let addr = Address::with_last_byte(1);
    let sig = B256::with_last_byte(2);
    chain_of(store, 1, 1).await;

    // The duplicate `(block_hash, log_index)` fails the whole batch.
    let err = store
        .insert_logs(&[
            log(chain, h(1), 1, 0, addr, sig),
            log(chain, h(1), 1, 1, addr, sig),
            log(chain, h(1), 1, 0, addr, sig),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, LogPollerError::Storage(_)));
    assert!(store.select_logs_by_block_range(0, 10).await.unwrap().is_empty());

    store.insert_logs(&[]).await.unwrap();
}

pub(crate) async fn range_scans<S: LogStore + ?Sized>(store: &S) {
    let chain = store.chain_id();
    let a1 = Address::with_last_byte(1);
    let a2 = Address::with_last_byte(2);
    let s1 = B256::with_last_byte(0x51);
    let s2 = B256::with_last_byte(0x52);
    chain_of(store, 1, 5).await;

    // Inserted out of order on purpose.
    store
        .insert_logs(&[
            log(chain, h(4), 4, 1, a1, s1),
            log(chain, h(2), 2, 3, a2, s1),
            log(chain, h(4), 4, 0, a1, s2),
            log(chain, h(2), 2, 0, a1, s1),
            log(chain, h(5), 5, 0, a1, s1),
        ])
        .await
        .unwrap();

    let positions: Vec<(u64, u64)> = store
        .select_logs_by_block_range(2, 4)
        .await
        .unwrap()
        .iter()
        .map(Log::position)
        .collect();
    assert_eq!(positions, vec![(2, 0), (2, 3), (4, 0), (4, 1)]);

    let filtered = store
        .select_logs_by_block_range_filter(1, 5, a1, s1)
        .await
        .unwrap();
    let positions: Vec<(u64, u64)> = filtered.iter().map(Log::position).collect();
    assert_eq!(positions, vec![(2, 0), (4, 1), (5, 0)]);

    // Stored content survives the round trip.
    let first = &filtered[0];
    assert_eq!(first.block_hash, h(2));
    assert_eq!(first.topics, vec![s1, B256::with_last_byte(0xee)]);
    assert_eq!(first.tx_hash, B256::repeat_byte(0x11));
    assert_eq!(first.data, Bytes::from_static(b"hello"));

    assert!(store.select_logs_by_block_range(6, 9).await.unwrap().is_empty());
}

pub(crate) async fn confirmation_gating<S: LogStore + ?Sized>(store: &S, empty: &S) {
    let chain = store.chain_id();
    let addr = Address::with_last_byte(1);
    let sig = B256::with_last_byte(2);

    assert!(empty
        .select_latest_log_event_sig_with_confs(sig, addr, 0)
        .await
        .unwrap_err()
        .is_not_found());

    chain_of(store, 1, 12).await;
    store
        .insert_logs(&[
            log(chain, h(10), 10, 0, addr, sig),
            log(chain, h(10), 10, 1, addr, sig),
            log(chain, h(12), 12, 0, addr, B256::with_last_byte(3)),
        ])
        .await
        .unwrap();

    let found = store
        .select_latest_log_event_sig_with_confs(sig, addr, 2)
        .await
        .unwrap();
    assert_eq!(found.position(), (10, 1));

    assert_eq!(
        store
            .select_latest_log_event_sig_with_confs(sig, addr, 0)
            .await
            .unwrap()
            .position(),
        (10, 1)
    );

    for confs in [3, 12, 13, u64::MAX] {
        let err = store
            .select_latest_log_event_sig_with_confs(sig, addr, confs)
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "confs {confs}");
    }

    // Other chains see nothing.
    assert!(empty
        .select_latest_log_event_sig_with_confs(sig, addr, 0)
        .await
        .unwrap_err()
        .is_not_found());
}

pub(crate) async fn group_latest_cardinality<S: LogStore + ?Sized>(store: &S) {
    let chain = store.chain_id();
    let a1 = Address::with_last_byte(1);
    let a2 = Address::with_last_byte(2);
    let s1 = B256::with_last_byte(0x51);
    let s2 = B256::with_last_byte(0x52);
    chain_of(store, 1, 20).await;
    store
        .insert_logs(&[
            log(chain, h(1), 1, 0, a1, s1),
            log(chain, h(5), 5, 0, a1, s1),
            log(chain, h(5), 5, 1, a1, s1),
            log(chain, h(2), 2, 0, a1, s2),
            log(chain, h(8), 8, 0, a2, s1),
            log(chain, h(11), 11, 2, a2, s2),
            log(chain, h(3), 3, 0, a2, s2),
            // Outside the requested address set.
            log(chain, h(15), 15, 0, Address::with_last_byte(9), s1),
        ])
        .await
        .unwrap();

    let rows = store
        .latest_log_event_sigs_addrs(0, &[a1, a2], &[s1, s2])
        .await
        .unwrap();
    let got: Vec<(Address, B256, u64, u64)> = rows
        .iter()
        .map(|l| (l.address, l.event_sig, l.block_number, l.log_index))
        .collect();
    assert_eq!(
        got,
        vec![
            (a1, s2, 2, 0),
            (a1, s1, 5, 1),
            (a2, s1, 8, 0),
            (a2, s2, 11, 2),
        ]
    );

    let rows = store
        .latest_log_event_sigs_addrs(0, &[a1], &[s1])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].position(), (5, 1));

    // start_block is inclusive and drops pairs with no occurrence since.
    let rows = store
        .latest_log_event_sigs_addrs(8, &[a1, a2], &[s1, s2])
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    assert!(store
        .latest_log_event_sigs_addrs(0, &[], &[s1])
        .await
        .unwrap()
        .is_empty());
    assert!(store
        .latest_log_event_sigs_addrs(0, &[a1], &[])
        .await
        .unwrap()
        .is_empty());
    assert!(store
        .latest_log_event_sigs_addrs(21, &[a1, a2], &[s1, s2])
        .await
        .unwrap()
        .is_empty());
}

pub(crate) async fn apply_is_atomic<S: LogStore + ?Sized>(store: &S) {
    let chain = store.chain_id();
    let addr = Address::with_last_byte(1);
    let sig = B256::with_last_byte(2);
    chain_of(store, 1, 5).await;
    store
        .insert_logs(&[
            log(chain, h(4), 4, 0, addr, sig),
            log(chain, h(5), 5, 0, addr, sig),
        ])
        .await
        .unwrap();

    // Reorg above 3 onto a fork, pruning 1.
    let fork = |n: u64| B256::left_padding_from(&(n + 1000).to_be_bytes());
    store
        .apply(ChainUpdate {
            unwind_above: Some(3),
            prune_through: Some(1),
            blocks: vec![(fork(4), 4), (fork(5), 5), (fork(6), 6)],
            logs: vec![log(chain, fork(6), 6, 0, addr, sig)],
        })
        .await
        .unwrap();

    assert!(store.select_block_by_number(1).await.unwrap_err().is_not_found());
    assert_eq!(store.select_block_by_number(3).await.unwrap().hash, h(3));
    assert_eq!(store.select_block_by_number(4).await.unwrap().hash, fork(4));
    assert_eq!(store.select_latest_block().await.unwrap().hash, fork(6));
    let logs = store.select_logs_by_block_range(0, 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].block_hash, fork(6));

    // Height 6 is occupied and nothing unwinds it: the whole update fails,
    // including the prune that came before the conflicting insert.
    let err = store
        .apply(ChainUpdate {
            unwind_above: None,
            prune_through: Some(3),
            blocks: vec![(fork(7), 7), (h(6), 6)],
            logs: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LogPollerError::Storage(_)));
    assert_eq!(store.select_block_by_number(2).await.unwrap().hash, h(2));
    assert!(store.select_block_by_number(7).await.unwrap_err().is_not_found());
    assert_eq!(store.select_latest_block().await.unwrap().hash, fork(6));

    store.apply(ChainUpdate::default()).await.unwrap();
}

pub(crate) async fn query_facade<S: LogStore + ?Sized>(store: Arc<S>) {
    let chain = store.chain_id();
    let addr = Address::with_last_byte(1);
    let sig = B256::with_last_byte(2);
    let query = LogQuery::new(Arc::clone(&store));

    assert_eq!(query.chain_id(), chain);
    assert_eq!(query.latest_confirmed(sig, addr, 0).await.unwrap(), None);
    assert_eq!(query.confirmations(1).await.unwrap(), None);

    chain_of(store.as_ref(), 1, 12).await;
    store
        .insert_logs(&[log(chain, h(10), 10, 0, addr, sig)])
        .await
        .unwrap();

    let hit = query.latest_confirmed(sig, addr, 2).await.unwrap().unwrap();
    assert_eq!(hit.block_number, 10);
    assert_eq!(query.latest_confirmed(sig, addr, 3).await.unwrap(), None);

    assert_eq!(query.confirmations(10).await.unwrap(), Some(2));
    assert_eq!(query.confirmations(12).await.unwrap(), Some(0));
    assert_eq!(query.confirmations(13).await.unwrap(), None);

    let pairs = query
        .latest_per_address_topic_pair(0, &[addr], &[sig])
        .await
        .unwrap();
    assert_eq!(pairs.len(), 1);

    // The answer tracks the tip as it moves.
    store.insert_block(h(13), 13).await.unwrap();
    assert!(query.latest_confirmed(sig, addr, 3).await.unwrap().is_some());
}

/// A reader running alongside unwind+rebuild cycles sees each cycle whole:
/// every height once, and the rebuilt tail from a single fork.
pub(crate) async fn readers_see_whole_cycles<S: LogStore + 'static>(store: Arc<S>) {
    let chain = store.chain_id();
    let addr = Address::with_last_byte(1);
    let sig = B256::with_last_byte(2);
    // Round 0 is the original chain; later rounds replace heights 16..=20.
    let hash = |round: u64, n: u64| {
        if n <= 15 {
            h(n)
        } else {
            B256::left_padding_from(&(round * 1000 + n).to_be_bytes())
        }
    };
    let round_of = |log: &Log| {
        let value = u64::from_be_bytes(log.block_hash[24..].try_into().unwrap());
        (value - log.block_number) / 1000
    };
    let cycle = move |round: u64, from: u64| ChainUpdate {
        unwind_above: from.checked_sub(1),
        prune_through: None,
        blocks: (from..=20).map(|n| (hash(round, n), n)).collect(),
        logs: (from..=20)
            .map(|n| log(chain, hash(round, n), n, 0, addr, sig))
            .collect(),
    };

    store.apply(cycle(0, 0)).await.unwrap();

    let writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for round in 1..=40 {
                store.apply(cycle(round, 16)).await.unwrap();
            }
        })
    };

    let mut reads = 0;
    loop {
        let done = writer.is_finished();

        let logs = store.select_logs_by_block_range(0, 100).await.unwrap();
        let heights: Vec<u64> = logs.iter().map(|l| l.block_number).collect();
        assert_eq!(heights, (0..=20).collect::<Vec<_>>(), "gap or duplicate height");
        let tail = round_of(&logs[16]);
        assert!(
            logs[16..].iter().all(|l| round_of(l) == tail),
            "tail mixes forks"
        );
        assert_eq!(store.select_latest_block().await.unwrap().number, 20);
        reads += 1;

        if done {
            break;
        }
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();

    assert!(reads > 0);
    let logs = store.select_logs_by_block_range(16, 20).await.unwrap();
    assert!(logs.iter().all(|l| round_of(l) == 40));
}
