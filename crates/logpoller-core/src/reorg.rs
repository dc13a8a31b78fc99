//! Reorg detection: locating the common ancestor of the stored chain and the
//! source's chain.
//!
//! The search walks down from the divergent height one block at a time,
//! comparing the source's hash with the stored hash. It never guesses: if no
//! agreement is found within `max_depth` blocks, or the walk runs off the
//! bottom of stored history, the cycle fails with
//! [`LogPollerError::ReconciliationDepthExceeded`] and nothing is written.

use crate::error::{LogPollerError, Result};
use crate::source::ChainDataSource;
use crate::store::LogStore;

/// Describes a detected chain reorganization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgEvent {
    /// Height where stored and source hashes first disagreed.
    pub detected_at: u64,
    /// Highest height where both agree. Everything above it is dropped.
    pub ancestor: u64,
    /// Number of stored blocks rolled back (`detected_at - ancestor`).
    pub depth: u64,
}

impl ReorgEvent {
    pub fn kind(&self) -> ReorgKind {
        if self.depth <= 3 {
            ReorgKind::Short
        } else {
            ReorgKind::Deep
        }
    }
}

/// Classification of a reorg by depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorgKind {
    /// 1–3 blocks, routine on most chains.
    Short,
    Deep,
}

impl std::fmt::Display for ReorgKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Short => write!(f, "short reorg"),
            Self::Deep => write!(f, "deep reorg"),
        }
    }
}

/// Walk back from `divergent` (whose hashes already disagree) to the highest
/// height where `store` and `source` agree.
///
/// At most `max_depth` heights below `divergent` are examined.
pub async fn find_common_ancestor<S, D>(
    store: &S,
    source: &D,
    divergent: u64,
    max_depth: u64,
) -> Result<ReorgEvent>
where
    S: LogStore + ?Sized,
    D: ChainDataSource + ?Sized,
{
    for step in 1..=max_depth {
        let Some(height) = divergent.checked_sub(step) else {
            break;
        };

        let stored = match store.select_block_by_number(height).await {
            Ok(block) => block,
            // Below the oldest stored block there is nothing left to compare.
            Err(LogPollerError::NotFound) => break,
            Err(e) => return Err(e),
        };

        let remote = match source.header_by_number(height).await {
            Ok(header) => header,
            Err(LogPollerError::NotFound) => {
                return Err(LogPollerError::TransientSource(format!(
                    "source does not know height {height} below its own head"
                )))
            }
            Err(e) => return Err(e),
        };

        if remote.hash == stored.hash {
            let event = ReorgEvent {
                detected_at: divergent,
                ancestor: height,
                depth: divergent - height,
            };
            tracing::warn!(
                chain_id = %store.chain_id(),
                depth = event.depth,
                ancestor = event.ancestor,
                reorg_type = %event.kind(),
                "Reorg detected"
            );
            return Ok(event);
        }

        tracing::debug!(height, "hash mismatch, walking back");
    }

    tracing::error!(
        chain_id = %store.chain_id(),
        divergent,
        max_depth,
        "No common ancestor within max reorg depth"
    );
    Err(LogPollerError::ReconciliationDepthExceeded {
        tip: divergent,
        max_depth,
    })
}
