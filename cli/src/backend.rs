//! Picks a store backend from a database URL.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use logpoller_core::store::LogStore;
use logpoller_core::types::ChainId;
use logpoller_storage::{InMemoryStore, PostgresStore, SqliteStore};

/// One database shared by every chain's store handle.
#[derive(Clone)]
pub enum Backend {
    Memory(InMemoryStore),
    Sqlite(SqliteStore),
    Postgres(PostgresStore),
}

#[derive(Debug, PartialEq, Eq)]
enum Kind {
    Memory,
    Sqlite,
    Postgres,
}

fn kind_of(url: &str) -> Kind {
    if url == "memory" {
        Kind::Memory
    } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Kind::Postgres
    } else {
        Kind::Sqlite
    }
}

/// Reject `memory` where the caller needs rows written by an earlier process.
pub fn ensure_persistent(url: &str) -> Result<()> {
    if kind_of(url) == Kind::Memory {
        bail!("`memory` holds nothing outside a running poller; pass a SQLite path or postgres:// URL");
    }
    Ok(())
}

impl Backend {
    /// `memory`, `postgres://…`, or anything else as a SQLite path/URL.
    ///
    /// `chain` only scopes the handle kept here; use [`Backend::for_chain`]
    /// for per-chain stores.
    pub async fn open(url: &str, chain: ChainId) -> Result<Self> {
        let backend = match kind_of(url) {
            Kind::Memory => Self::Memory(InMemoryStore::new(chain)),
            Kind::Postgres => Self::Postgres(
                PostgresStore::connect(url, chain)
                    .await
                    .context("connecting to PostgreSQL")?,
            ),
            Kind::Sqlite => Self::Sqlite(
                SqliteStore::open(url, chain)
                    .await
                    .with_context(|| format!("opening SQLite database {url}"))?,
            ),
        };
        tracing::debug!(backend = backend.name(), "store opened");
        Ok(backend)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Sqlite(_) => "sqlite",
            Self::Postgres(_) => "postgres",
        }
    }

    /// A store handle scoped to `chain_id`.
    pub fn for_chain(&self, chain_id: ChainId) -> Arc<dyn LogStore> {
        match self {
            Self::Memory(s) => Arc::new(s.with_chain(chain_id)),
            Self::Sqlite(s) => Arc::new(s.with_chain(chain_id)),
            Self::Postgres(s) => Arc::new(s.with_chain(chain_id)),
        }
    }
}
