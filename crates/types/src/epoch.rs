//! Epoch arithmetic
//!
//! The protocol runs on fixed weekly epochs. Lock expiries are rounded down
//! to epoch boundaries so every lock in the system decays to zero exactly at
//! an epoch start.

use crate::scalars::{Epoch, Timestamp};

/// Epoch duration in seconds (7 days)
pub const EPOCH_SECS: u64 = 7 * 24 * 60 * 60;

/// Maximum lock duration in seconds (182 days, 26 epochs)
pub const MAX_LOCK_SECS: u64 = 182 * 24 * 60 * 60;

/// Compute the epoch number containing a timestamp.
/// Epoch 0 starts at genesis (t = 0).
#[inline]
pub const fn epoch_from_timestamp(t: Timestamp) -> Epoch {
    t / EPOCH_SECS
}

/// Start timestamp (inclusive) of an epoch
#[inline]
pub const fn epoch_start(epoch: Epoch) -> Timestamp {
    epoch.saturating_mul(EPOCH_SECS)
}

/// End timestamp (exclusive) of an epoch
#[inline]
pub const fn epoch_end(epoch: Epoch) -> Timestamp {
    epoch.saturating_add(1).saturating_mul(EPOCH_SECS)
}

/// Round a timestamp down to its epoch boundary
#[inline]
pub const fn round_down_to_epoch(t: Timestamp) -> Timestamp {
    (t / EPOCH_SECS) * EPOCH_SECS
}
