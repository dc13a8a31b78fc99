//! Confirmation-depth arithmetic.
//!
//! Depth is always measured against the current stored tip, so every answer
//! here is only valid until the tip moves.

/// Highest block number that has at least `confs` confirmations under `latest`.
///
/// `None` when the chain is not yet `confs` blocks tall.
pub fn confirmed_tip(latest: u64, confs: u64) -> Option<u64> {
    latest.checked_sub(confs)
}

/// Number of blocks stacked on top of `block` (0 for the tip itself).
///
/// `None` if `block` is above `latest`.
pub fn confirmations(latest: u64, block: u64) -> Option<u64> {
    latest.checked_sub(block)
}

/// Returns `true` if `block` has at least `confs` confirmations under `latest`.
pub fn is_confirmed(block: u64, latest: u64, confs: u64) -> bool {
    confirmations(latest, block).is_some_and(|c| c >= confs)
}
