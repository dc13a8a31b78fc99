//! SQLite storage backend for the log poller.
//!
//! Persists canonical blocks and their logs to a single SQLite file shared by
//! every chain. Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use logpoller_core::types::ChainId;
//! use logpoller_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let mainnet = SqliteStore::open("./logpoller.db", ChainId(1)).await?;
//! let polygon = mainnet.with_chain(ChainId(137));
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory(ChainId(1)).await?;
//! # Ok(())
//! # }
//! ```

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use logpoller_core::error::{LogPollerError, Result};
use logpoller_core::store::{ChainUpdate, LogStore};
use logpoller_core::types::{Block, ChainId, Log};

use crate::check_chain;
use crate::rows::{encode_topics, now_millis, sql_int, RawBlock, RawLog, LOG_COLUMNS};

/// SQLite-backed block/log store bound to one chain.
///
/// Cheaply cloneable; clones and [`SqliteStore::with_chain`] handles share the
/// connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    chain_id: ChainId,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./logpoller.db"`) or a full
    /// SQLite URL (`"sqlite:./logpoller.db?mode=rwc"`).
    pub async fn open(path: &str, chain_id: ChainId) -> Result<Self> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(LogPollerError::storage)?;

        // WAL lets readers proceed while a cycle writes
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await
            .map_err(LogPollerError::storage)?;

        let store = Self { pool, chain_id };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection to `:memory:` is its own database, so the pool is
    /// pinned to a single connection that never expires. All data is lost when
    /// the pool is dropped. Ideal for tests.
    pub async fn in_memory(chain_id: ChainId) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(LogPollerError::storage)?;

        let store = Self { pool, chain_id };
        store.init_schema().await?;
        Ok(store)
    }

    /// A handle for another chain over the same database.
    pub fn with_chain(&self, chain_id: ChainId) -> Self {
        Self {
            pool: self.pool.clone(),
            chain_id,
        }
    }

    fn chain(&self) -> i64 {
        sql_int(self.chain_id.as_u64())
    }

    /// Create tables and indexes if they don't already exist.
    async fn init_schema(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS log_poller_blocks (
                evm_chain_id INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_hash   BLOB    NOT NULL,
                created_at   INTEGER NOT NULL,
                PRIMARY KEY (evm_chain_id, block_number)
            );",
            "CREATE INDEX IF NOT EXISTS idx_log_poller_blocks_hash
             ON log_poller_blocks (evm_chain_id, block_hash);",
            "CREATE TABLE IF NOT EXISTS logs (
                evm_chain_id INTEGER NOT NULL,
                block_hash   BLOB    NOT NULL,
                block_number INTEGER NOT NULL,
                log_index    INTEGER NOT NULL,
                address      BLOB    NOT NULL,
                event_sig    BLOB    NOT NULL,
                topics       BLOB    NOT NULL,
                tx_hash      BLOB    NOT NULL,
                data         BLOB    NOT NULL,
                created_at   INTEGER NOT NULL,
                PRIMARY KEY (evm_chain_id, block_hash, log_index)
            );",
            "CREATE INDEX IF NOT EXISTS idx_logs_block
             ON logs (evm_chain_id, block_number);",
            "CREATE INDEX IF NOT EXISTS idx_logs_address_sig
             ON logs (evm_chain_id, address, event_sig, block_number);",
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(LogPollerError::storage)?;
        }
        Ok(())
    }
}

// ─── Statement helpers ───────────────────────────────────────────────────────
//
// Shared by the single-statement operations and `apply`, which runs them all
// on one transaction.

async fn insert_block_row(
    conn: &mut SqliteConnection,
    chain: i64,
    hash: B256,
    number: u64,
    now: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO log_poller_blocks (evm_chain_id, block_number, block_hash, created_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(chain)
    .bind(sql_int(number))
    .bind(hash.as_slice())
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(LogPollerError::storage)?;
    Ok(())
}

async fn insert_log_row(conn: &mut SqliteConnection, chain: i64, log: &Log, now: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO logs (evm_chain_id, block_hash, block_number, log_index, address,
                           event_sig, topics, tx_hash, data, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(chain)
    .bind(log.block_hash.as_slice())
    .bind(sql_int(log.block_number))
    .bind(sql_int(log.log_index))
    .bind(log.address.as_slice())
    .bind(log.event_sig.as_slice())
    .bind(encode_topics(&log.topics))
    .bind(log.tx_hash.as_slice())
    .bind(&log.data[..])
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(LogPollerError::storage)?;
    Ok(())
}

/// Delete blocks and logs with `from <= block_number <= to`.
async fn delete_heights(conn: &mut SqliteConnection, chain: i64, from: i64, to: i64) -> Result<()> {
    sqlx::query("DELETE FROM logs WHERE evm_chain_id = ? AND block_number BETWEEN ? AND ?")
        .bind(chain)
        .bind(from)
        .bind(to)
        .execute(&mut *conn)
        .await
        .map_err(LogPollerError::storage)?;

    sqlx::query(
        "DELETE FROM log_poller_blocks WHERE evm_chain_id = ? AND block_number BETWEEN ? AND ?",
    )
    .bind(chain)
    .bind(from)
    .bind(to)
    .execute(&mut *conn)
    .await
    .map_err(LogPollerError::storage)?;
    Ok(())
}

fn block_from_row(chain_id: ChainId, row: &SqliteRow) -> Result<Block> {
    RawBlock {
        block_number: row.try_get("block_number").map_err(LogPollerError::storage)?,
        block_hash: row.try_get("block_hash").map_err(LogPollerError::storage)?,
        created_at: row.try_get("created_at").map_err(LogPollerError::storage)?,
    }
    .into_block(chain_id)
}

fn log_from_row(chain_id: ChainId, row: &SqliteRow) -> Result<Log> {
    RawLog {
        block_hash: row.try_get("block_hash").map_err(LogPollerError::storage)?,
        block_number: row.try_get("block_number").map_err(LogPollerError::storage)?,
        log_index: row.try_get("log_index").map_err(LogPollerError::storage)?,
        address: row.try_get("address").map_err(LogPollerError::storage)?,
        event_sig: row.try_get("event_sig").map_err(LogPollerError::storage)?,
        topics: row.try_get("topics").map_err(LogPollerError::storage)?,
        tx_hash: row.try_get("tx_hash").map_err(LogPollerError::storage)?,
        data: row.try_get("data").map_err(LogPollerError::storage)?,
        created_at: row.try_get("created_at").map_err(LogPollerError::storage)?,
    }
    .into_log(chain_id)
}

// ─── LogStore impl ───────────────────────────────────────────────────────────

#[async_trait]
impl LogStore for SqliteStore {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn insert_block(&self, hash: B256, number: u64) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(LogPollerError::storage)?;
        insert_block_row(&mut conn, self.chain(), hash, number, now_millis()).await?;
        debug!(chain_id = %self.chain_id, number, %hash, "block stored");
        Ok(())
    }

    async fn select_block_by_hash(&self, hash: B256) -> Result<Block> {
        let row = sqlx::query(
            "SELECT block_number, block_hash, created_at FROM log_poller_blocks
             WHERE evm_chain_id = ? AND block_hash = ?
             ORDER BY block_number DESC LIMIT 1",
        )
        .bind(self.chain())
        .bind(hash.as_slice())
        .fetch_optional(&self.pool)
        .await
        .map_err(LogPollerError::storage)?
        .ok_or(LogPollerError::NotFound)?;

        block_from_row(self.chain_id, &row)
    }

    async fn select_block_by_number(&self, number: u64) -> Result<Block> {
        let row = sqlx::query(
            "SELECT block_number, block_hash, created_at FROM log_poller_blocks
             WHERE evm_chain_id = ? AND block_number = ?",
        )
        .bind(self.chain())
        .bind(sql_int(number))
        .fetch_optional(&self.pool)
        .await
        .map_err(LogPollerError::storage)?
        .ok_or(LogPollerError::NotFound)?;

        block_from_row(self.chain_id, &row)
    }

    async fn select_latest_block(&self) -> Result<Block> {
        let row = sqlx::query(
            "SELECT block_number, block_hash, created_at FROM log_poller_blocks
             WHERE evm_chain_id = ?
             ORDER BY block_number DESC LIMIT 1",
        )
        .bind(self.chain())
        .fetch_optional(&self.pool)
        .await
        .map_err(LogPollerError::storage)?
        .ok_or(LogPollerError::NotFound)?;

        block_from_row(self.chain_id, &row)
    }

    async fn delete_range_blocks(&self, from: u64, to: u64) -> Result<()> {
        if from > to {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(LogPollerError::storage)?;
        delete_heights(&mut tx, self.chain(), sql_int(from), sql_int(to)).await?;
        tx.commit().await.map_err(LogPollerError::storage)?;

        debug!(chain_id = %self.chain_id, from, to, "block range deleted");
        Ok(())
    }

    async fn insert_logs(&self, logs: &[Log]) -> Result<()> {
        check_chain(self.chain_id, logs)?;
        if logs.is_empty() {
            return Ok(());
        }

        let now = now_millis();
        let mut tx = self.pool.begin().await.map_err(LogPollerError::storage)?;
        for log in logs {
            insert_log_row(&mut tx, self.chain(), log, now).await?;
        }
        tx.commit().await.map_err(LogPollerError::storage)?;

        debug!(chain_id = %self.chain_id, count = logs.len(), "logs stored");
        Ok(())
    }

    async fn select_logs_by_block_range(&self, from: u64, to: u64) -> Result<Vec<Log>> {
        let rows = sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM logs
             WHERE evm_chain_id = ? AND block_number >= ? AND block_number <= ?
             ORDER BY block_number, log_index"
        ))
        .bind(self.chain())
        .bind(sql_int(from))
        .bind(sql_int(to))
        .fetch_all(&self.pool)
        .await
        .map_err(LogPollerError::storage)?;

        rows.iter().map(|r| log_from_row(self.chain_id, r)).collect()
    }

    async fn select_logs_by_block_range_filter(
        &self,
        from: u64,
        to: u64,
        address: Address,
        event_sig: B256,
    ) -> Result<Vec<Log>> {
        let rows = sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM logs
             WHERE evm_chain_id = ? AND block_number >= ? AND block_number <= ?
               AND address = ? AND event_sig = ?
             ORDER BY block_number, log_index"
        ))
        .bind(self.chain())
        .bind(sql_int(from))
        .bind(sql_int(to))
        .bind(address.as_slice())
        .bind(event_sig.as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(LogPollerError::storage)?;

        rows.iter().map(|r| log_from_row(self.chain_id, r)).collect()
    }

    async fn select_latest_log_event_sig_with_confs(
        &self,
        event_sig: B256,
        address: Address,
        confs: u64,
    ) -> Result<Log> {
        // One statement, so the tip and the log come from the same snapshot.
        // An empty chain makes the bound NULL and matches nothing.
        let row = sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM logs
             WHERE evm_chain_id = ? AND address = ? AND event_sig = ?
               AND block_number <= (
                   SELECT MAX(block_number) FROM log_poller_blocks WHERE evm_chain_id = ?
               ) - ?
             ORDER BY block_number DESC, log_index DESC
             LIMIT 1"
        ))
        .bind(self.chain())
        .bind(address.as_slice())
        .bind(event_sig.as_slice())
        .bind(self.chain())
        .bind(sql_int(confs))
        .fetch_optional(&self.pool)
        .await
        .map_err(LogPollerError::storage)?
        .ok_or(LogPollerError::NotFound)?;

        log_from_row(self.chain_id, &row)
    }

    async fn latest_log_event_sigs_addrs(
        &self,
        start_block: u64,
        addresses: &[Address],
        event_sigs: &[B256],
    ) -> Result<Vec<Log>> {
        if addresses.is_empty() || event_sigs.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {LOG_COLUMNS} FROM (
                 SELECT {LOG_COLUMNS}, ROW_NUMBER() OVER (
                     PARTITION BY address, event_sig
                     ORDER BY block_number DESC, log_index DESC
                 ) AS rn
                 FROM logs WHERE evm_chain_id = "
        ));
        qb.push_bind(self.chain());
        qb.push(" AND block_number >= ");
        qb.push_bind(sql_int(start_block));
        qb.push(" AND address IN (");
        let mut list = qb.separated(", ");
        for address in addresses {
            list.push_bind(address.as_slice().to_vec());
        }
        qb.push(") AND event_sig IN (");
        let mut list = qb.separated(", ");
        for sig in event_sigs {
            list.push_bind(sig.as_slice().to_vec());
        }
        qb.push(")) AS latest WHERE rn = 1 ORDER BY block_number, log_index");

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(LogPollerError::storage)?;

        rows.iter().map(|r| log_from_row(self.chain_id, r)).collect()
    }

    async fn apply(&self, update: ChainUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        check_chain(self.chain_id, &update.logs)?;

        let chain = self.chain();
        let now = now_millis();
        let mut tx = self.pool.begin().await.map_err(LogPollerError::storage)?;

        if let Some(ancestor) = update.unwind_above {
            delete_heights(&mut tx, chain, sql_int(ancestor).saturating_add(1), i64::MAX).await?;
        }
        if let Some(floor) = update.prune_through {
            delete_heights(&mut tx, chain, 0, sql_int(floor)).await?;
        }
        for (hash, number) in &update.blocks {
            insert_block_row(&mut tx, chain, *hash, *number, now).await?;
        }
        for log in &update.logs {
            insert_log_row(&mut tx, chain, log, now).await?;
        }

        // Dropping `tx` on an early return above rolls everything back.
        tx.commit().await.map_err(LogPollerError::storage)?;

        debug!(
            chain_id = %self.chain_id,
            unwind_above = ?update.unwind_above,
            prune_through = ?update.prune_through,
            blocks = update.blocks.len(),
            logs = update.logs.len(),
            "chain update applied"
        );
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
