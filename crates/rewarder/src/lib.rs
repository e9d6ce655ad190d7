//! Delegated strategy rewarder
//!
//! Tracks each attached lock's share of a managed NFT's compounding rewards.
//! Balances and the aggregate supply are checkpointed, so a reward notified
//! for an epoch is split pro-rata over the balances that were in place during
//! that epoch, not over present-time balances.
//!
//! Integer division truncates; the residual dust stays in the strategy's pool
//! and is claimable by no one individually.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};
use vetoken_checkpoint::CheckpointLedger;
use vetoken_types::{epoch_end, epoch_from_timestamp, mul_div_u128, Epoch, LockId, Timestamp, TokenAmount};

/// Entity key for the aggregate supply checkpoints
const TOTAL_ENTITY: u64 = 0;

/// Errors from reward accounting.
#[derive(Error, Debug)]
pub enum RewarderError {
    #[error("lock {lock_id} has balance {balance}, cannot withdraw {requested}")]
    InsufficientBalance {
        lock_id: LockId,
        balance: TokenAmount,
        requested: TokenAmount,
    },

    #[error("amount must be greater than zero")]
    ZeroAmount,
}

/// Checkpoint-backed reward ledger for one managed NFT's strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualRewarder {
    balances: CheckpointLedger,
    total_supply: CheckpointLedger,
    /// Reward notified per epoch, distributed pro-rata over that epoch's balances
    rewards_per_epoch: BTreeMap<Epoch, TokenAmount>,
    /// Last epoch settled per lock, inclusive
    harvested_through: BTreeMap<LockId, Epoch>,
    total_notified: TokenAmount,
    total_harvested: TokenAmount,
}

impl VirtualRewarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a deposit for a lock, growing both the lock's balance and the
    /// aggregate supply as of `now`.
    pub fn deposit(
        &mut self,
        lock_id: LockId,
        amount: TokenAmount,
        now: Timestamp,
    ) -> Result<(), RewarderError> {
        if amount == 0 {
            return Err(RewarderError::ZeroAmount);
        }
        let balance = self.balances.latest_amount(lock_id);
        let total = self.total_supply.latest_amount(TOTAL_ENTITY);
        self.balances
            .write(lock_id, now, balance.saturating_add(amount));
        self.total_supply
            .write(TOTAL_ENTITY, now, total.saturating_add(amount));
        debug!(lock_id, amount, "rewarder deposit");
        Ok(())
    }

    /// Withdraw a lock's recorded balance, settling its pending harvest
    /// first. Returns the harvested reward amount.
    pub fn withdraw(
        &mut self,
        lock_id: LockId,
        amount: TokenAmount,
        now: Timestamp,
    ) -> Result<TokenAmount, RewarderError> {
        let balance = self.balances.latest_amount(lock_id);
        if amount > balance {
            return Err(RewarderError::InsufficientBalance {
                lock_id,
                balance,
                requested: amount,
            });
        }
        let harvested = self.harvest(lock_id, now);
        let total = self.total_supply.latest_amount(TOTAL_ENTITY);
        self.balances.write(lock_id, now, balance - amount);
        self.total_supply
            .write(TOTAL_ENTITY, now, total.saturating_sub(amount));
        debug!(lock_id, amount, harvested, "rewarder withdraw");
        Ok(harvested)
    }

    /// Record a reward total for an epoch. Multiple notifications within one
    /// epoch accumulate.
    pub fn notify_reward(&mut self, amount: TokenAmount, epoch: Epoch) {
        if amount == 0 {
            return;
        }
        let slot = self.rewards_per_epoch.entry(epoch).or_insert(0);
        *slot = slot.saturating_add(amount);
        self.total_notified = self.total_notified.saturating_add(amount);
        info!(epoch, amount, "strategy reward notified");
    }

    /// Settle the lock's share of every completed epoch's reward since its
    /// last harvest, and advance its accrual pointer. The epoch containing
    /// `now` is still accruing and stays pending until it ends.
    pub fn harvest(&mut self, lock_id: LockId, now: Timestamp) -> TokenAmount {
        let current = epoch_from_timestamp(now);
        let harvested = self.pending(lock_id, now);
        if current > 0 {
            self.harvested_through.insert(lock_id, current - 1);
        }
        if harvested > 0 {
            self.total_harvested = self.total_harvested.saturating_add(harvested);
            info!(lock_id, harvested, "rewarder harvest settled");
        }
        harvested
    }

    /// Reward the lock would harvest at `now`, without settling. Covers
    /// completed epochs only; the running epoch's balances can still move.
    pub fn pending(&self, lock_id: LockId, now: Timestamp) -> TokenAmount {
        let current = epoch_from_timestamp(now);
        let from = self.harvested_through.get(&lock_id).map(|&e| e + 1).unwrap_or(0);
        if from >= current {
            // No completed epoch to settle
            return 0;
        }
        let mut sum: TokenAmount = 0;
        for (&epoch, &reward) in self.rewards_per_epoch.range(from..current) {
            // Balance in an epoch is the state at the epoch's final instant
            let sample = epoch_end(epoch) - 1;
            let balance = self.balances.amount_at(lock_id, sample);
            if balance == 0 {
                continue;
            }
            let total = self.total_supply.amount_at(TOTAL_ENTITY, sample);
            if let Some(share) = mul_div_u128(reward, balance, total) {
                sum = sum.saturating_add(share);
            }
        }
        sum
    }

    /// Present recorded balance for a lock
    pub fn balance_of(&self, lock_id: LockId) -> TokenAmount {
        self.balances.latest_amount(lock_id)
    }

    /// Recorded balance as of a past timestamp
    pub fn balance_at(&self, lock_id: LockId, at: Timestamp) -> TokenAmount {
        self.balances.amount_at(lock_id, at)
    }

    /// Aggregate supply as of a past timestamp
    pub fn total_supply_at(&self, at: Timestamp) -> TokenAmount {
        self.total_supply.amount_at(TOTAL_ENTITY, at)
    }

    pub fn total_supply(&self) -> TokenAmount {
        self.total_supply.latest_amount(TOTAL_ENTITY)
    }

    /// Notified minus harvested; the unharvestable part of this is dust
    pub fn undistributed(&self) -> TokenAmount {
        self.total_notified.saturating_sub(self.total_harvested)
    }
}
