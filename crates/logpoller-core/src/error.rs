//! Error types for the log poller.

use thiserror::Error;

/// Errors that can occur while indexing or querying.
///
/// Every variant except [`LogPollerError::Config`] is scoped to a single poll
/// cycle: the loop reports it and tries again on the next tick.
#[derive(Debug, Error)]
pub enum LogPollerError {
    /// No row matched. Routine, e.g. an empty chain or an unmet confirmation bound.
    #[error("not found")]
    NotFound,

    /// Network, timeout or malformed response from the chain data source.
    #[error("chain data source error: {0}")]
    TransientSource(String),

    #[error("no common ancestor within {max_depth} blocks below stored tip {tip}")]
    ReconciliationDepthExceeded { tip: u64, max_depth: u64 },

    /// Constraint violation or transaction failure. The whole cycle is rolled back.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LogPollerError {
    /// Returns `true` for the routine "no matching row" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns `true` if the failure heals by retrying on a later tick.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }

    pub fn storage(e: impl std::fmt::Display) -> Self {
        Self::Storage(e.to_string())
    }

    pub fn source(e: impl std::fmt::Display) -> Self {
        Self::TransientSource(e.to_string())
    }
}

/// Convenience alias used across the workspace.
pub type Result<T, E = LogPollerError> = std::result::Result<T, E>;

/// Maps `NotFound` to `None`, leaving other errors intact.
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(LogPollerError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
