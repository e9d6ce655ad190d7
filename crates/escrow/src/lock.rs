//! Lock records and decay math
//!
//! A lock's voting power decays linearly from its principal down to zero at
//! `end`, or stays pinned at the principal while the lock is permanent.
//! Attached locks hold no power of their own; it lives in the managed NFT.

use serde::{Deserialize, Serialize};
use vetoken_types::{mul_div_u128, Address, LockId, Timestamp, TokenAmount, MAX_LOCK_SECS};

/// A veNFT escrow position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub id: LockId,
    pub owner: Address,
    /// Locked principal; zero while attached (principal sits in the managed NFT)
    pub amount: TokenAmount,
    /// Expiry timestamp rounded down to an epoch boundary; zero when permanent
    pub end: Timestamp,
    pub is_permanent: bool,
    /// True only for the special strategy-owned aggregate locks
    pub is_managed: bool,
    /// Managed NFT this lock is delegated to, if any
    pub attached_to: Option<LockId>,
    /// True iff the lock currently contributes to some pool's epoch weight
    pub is_voted: bool,
    pub created_at: Timestamp,
    /// Timestamp of the last ownership transfer; used to suppress same-instant
    /// double voting across a transfer
    pub last_transfer_at: Timestamp,
}

impl Lock {
    pub fn is_attached(&self) -> bool {
        self.attached_to.is_some()
    }

    /// Whether the lock has decayed to zero and can be withdrawn
    pub fn is_expired(&self, now: Timestamp) -> bool {
        !self.is_permanent && !self.is_attached() && now >= self.end
    }

    /// Voting power at `now`, ignoring the same-instant transfer rule.
    ///
    /// Permanent locks count their full principal; attached locks count zero;
    /// everything else decays linearly to zero at `end`.
    pub fn voting_power(&self, now: Timestamp) -> TokenAmount {
        if self.is_attached() {
            return 0;
        }
        if self.is_permanent {
            return self.amount;
        }
        if now >= self.end {
            return 0;
        }
        let remaining = (self.end - now) as u128;
        mul_div_u128(self.amount, remaining, MAX_LOCK_SECS as u128).unwrap_or(0)
    }

    /// Voting power at `now`, returning zero when the lock changed hands at
    /// this exact instant. Outside that window it agrees with `voting_power`.
    pub fn voting_power_checked_transfer(&self, now: Timestamp) -> TokenAmount {
        if self.last_transfer_at == now && self.created_at != now {
            return 0;
        }
        self.voting_power(now)
    }
}
