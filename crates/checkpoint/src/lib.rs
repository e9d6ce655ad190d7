//! Checkpoint ledger
//!
//! Maintains, per entity, an append-only sequence of `(timestamp, amount)`
//! pairs. A checkpoint represents "balance from this time onward", not a
//! point sample: querying far past the last checkpoint returns the last
//! amount, querying before the first returns zero.
//!
//! Writing at the last checkpoint's timestamp overwrites it in place, so a
//! batch of same-instant mutations never grows the sequence.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vetoken_types::{Timestamp, TokenAmount};

/// A single timestamped balance snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub timestamp: Timestamp,
    pub amount: TokenAmount,
}

/// Per-entity checkpoint sequences with binary-search historical lookup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointLedger {
    entries: HashMap<u64, Vec<Checkpoint>>,
}

impl CheckpointLedger {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Record `amount` for `entity` as of `timestamp`.
    ///
    /// Overwrites the last checkpoint when the timestamp does not advance
    /// past it, appends otherwise; the sequence stays strictly ordered even
    /// if a caller's clock regresses. Returns the checkpoint count for the
    /// entity.
    pub fn write(&mut self, entity: u64, timestamp: Timestamp, amount: TokenAmount) -> usize {
        let seq = self.entries.entry(entity).or_default();
        match seq.last_mut() {
            Some(last) if last.timestamp >= timestamp => {
                last.amount = amount;
            }
            _ => seq.push(Checkpoint { timestamp, amount }),
        }
        seq.len()
    }

    /// Index of the latest checkpoint with `checkpoint.timestamp <= timestamp`,
    /// or None if the entity has no checkpoint that early.
    pub fn index_at(&self, entity: u64, timestamp: Timestamp) -> Option<usize> {
        let seq = self.entries.get(&entity)?;
        // partition_point yields the count of checkpoints at or before `timestamp`
        let count = seq.partition_point(|c| c.timestamp <= timestamp);
        count.checked_sub(1)
    }

    /// Amount for `entity` as of `timestamp` (0 when no data that early)
    pub fn amount_at(&self, entity: u64, timestamp: Timestamp) -> TokenAmount {
        match self.index_at(entity, timestamp) {
            Some(idx) => self.entries[&entity][idx].amount,
            None => 0,
        }
    }

    /// Latest checkpoint for an entity, if any
    pub fn latest(&self, entity: u64) -> Option<Checkpoint> {
        self.entries.get(&entity).and_then(|seq| seq.last().copied())
    }

    /// Latest recorded amount for an entity (0 when never written)
    pub fn latest_amount(&self, entity: u64) -> TokenAmount {
        self.latest(entity).map(|c| c.amount).unwrap_or(0)
    }

    /// Number of checkpoints recorded for an entity
    pub fn len(&self, entity: u64) -> usize {
        self.entries.get(&entity).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, entity: u64) -> bool {
        self.len(entity) == 0
    }
}
