//! Deposit boost collaborator
//!
//! An optional collaborator that tops up deposits from its own token account,
//! e.g. an incentive program matching a fraction of every new deposit.

use vetoken_types::{Address, LockId, TokenAmount};

/// Source of deposit top-ups.
pub trait BoostSource: Send + Sync {
    /// Extra amount to add on top of `deposit` for this lock.
    fn boost_amount(&self, lock_id: LockId, deposit: TokenAmount) -> TokenAmount;

    /// Account the top-up is paid from.
    fn boost_account(&self) -> Address;
}

/// Flat basis-point boost paid from a fixed account.
#[derive(Debug, Clone)]
pub struct BpsBoost {
    pub bps: u16,
    pub account: Address,
}

impl BoostSource for BpsBoost {
    fn boost_amount(&self, _lock_id: LockId, deposit: TokenAmount) -> TokenAmount {
        deposit.saturating_mul(self.bps as u128) / 10_000
    }

    fn boost_account(&self) -> Address {
        self.account
    }
}
