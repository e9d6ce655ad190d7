//! Epoch voting engine
//!
//! Owns the per-epoch weight accumulators and orchestrates the escrow ledger
//! and the per-managed-NFT rewarders. All weight mutation is delta-applied
//! against the live accumulators; `distribute_all` seals an epoch by handing
//! an immutable snapshot to the minter.
//!
//! The distribution window is a cooperative soft-lock: every gated call
//! checks the clock first and rejects with `DistributionWindow`, leaving no
//! side effects.

use crate::collaborators::{EmissionSink, GaugeRegistry, Strategy};
use crate::errors::{Result, VoterError};
use crate::split::split_by_weights;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};
use vetoken_escrow::{EscrowError, VotingEscrow};
use vetoken_rewarder::VirtualRewarder;
use vetoken_types::{
    epoch_end, epoch_from_timestamp, short_id, Address, Epoch, LockId, PoolId, ProtocolEvent,
    Timestamp, TokenAmount,
};

/// Default soft-lock duration before each epoch boundary (one hour)
pub const DEFAULT_WINDOW_SECS: u64 = 60 * 60;

/// The epoch voting engine.
pub struct Voter {
    escrow: VotingEscrow,
    gauges: Box<dyn GaugeRegistry>,
    minter: Box<dyn EmissionSink>,
    /// One rewarder per managed NFT
    rewarders: HashMap<LockId, VirtualRewarder>,
    /// Optional strategy hooks per managed NFT
    strategies: HashMap<LockId, Box<dyn Strategy>>,

    /// (epoch, pool) -> accumulated weight
    weights: HashMap<Epoch, HashMap<PoolId, TokenAmount>>,
    /// epoch -> sum of all pool weights
    totals: HashMap<Epoch, TokenAmount>,
    /// lock -> current pool selection with absolute per-pool amounts
    pool_votes: HashMap<LockId, Vec<(PoolId, TokenAmount)>>,
    last_voted_epoch: HashMap<LockId, Epoch>,
    /// Sealed per-epoch weight history, as handed to the minter
    snapshots: BTreeMap<Epoch, Vec<(PoolId, TokenAmount)>>,

    /// Callers exempt from the distribution window
    whitelist: HashSet<Address>,
    window_secs: u64,

    events: Vec<ProtocolEvent>,
}

impl Voter {
    pub fn new(
        escrow: VotingEscrow,
        gauges: Box<dyn GaugeRegistry>,
        minter: Box<dyn EmissionSink>,
    ) -> Self {
        Self {
            escrow,
            gauges,
            minter,
            rewarders: HashMap::new(),
            strategies: HashMap::new(),
            weights: HashMap::new(),
            totals: HashMap::new(),
            pool_votes: HashMap::new(),
            last_voted_epoch: HashMap::new(),
            snapshots: BTreeMap::new(),
            whitelist: HashSet::new(),
            window_secs: DEFAULT_WINDOW_SECS,
            events: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Voting
    // -------------------------------------------------------------------------

    /// Cast the lock's full voting power across `pools`, proportionally to
    /// the relative `weights`. Any prior contribution is reset first, from
    /// whichever epoch it sits in.
    pub fn vote(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        pools: &[PoolId],
        weights: &[u128],
        now: Timestamp,
    ) -> Result<()> {
        self.escrow.check_authorized(caller, lock_id)?;
        self.check_window(caller, now)?;
        let lock = self.escrow.lock(lock_id)?;
        if lock.is_attached() {
            return Err(EscrowError::TokenAttached(lock_id).into());
        }
        if lock.is_managed && self.escrow.registry().is_disabled(lock_id) {
            return Err(EscrowError::DisabledManagedNft(lock_id).into());
        }
        if pools.is_empty() {
            return Err(VoterError::InvalidVoteSelection("empty pool selection"));
        }
        if pools.len() != weights.len() {
            return Err(VoterError::InvalidVoteSelection(
                "pools and weights differ in length",
            ));
        }
        if weights.iter().any(|&w| w == 0) {
            return Err(VoterError::InvalidVoteSelection("zero vote weight"));
        }
        let distinct: HashSet<&PoolId> = pools.iter().collect();
        if distinct.len() != pools.len() {
            return Err(VoterError::InvalidVoteSelection("duplicate pool"));
        }
        for pool in pools {
            if !self.gauges.pool_exists(pool) {
                return Err(VoterError::PoolNotRegistered(*pool));
            }
            if !self.gauges.is_gauge_alive(pool) {
                return Err(VoterError::GaugeKilled(*pool));
            }
        }

        // Power is snapshotted exactly once; the split sums back to it
        let power = self.escrow.balance_of_nft(lock_id, now)?;
        self.internal_reset(caller, lock_id, now);
        let shares = split_by_weights(power, weights);
        self.apply_vote(caller, lock_id, pools, &shares, power, now)
    }

    /// Zero the lock's contribution in whichever epoch it last voted.
    /// Safe to call with no prior vote; a zero reset is still announced.
    pub fn reset(&mut self, caller: &Address, lock_id: LockId, now: Timestamp) -> Result<()> {
        self.escrow.check_authorized(caller, lock_id)?;
        self.check_window(caller, now)?;
        self.internal_reset(caller, lock_id, now);
        self.escrow.set_voted(lock_id, false)?;
        Ok(())
    }

    /// Re-apply the lock's present voting power to its existing pool
    /// selection. Callable by anyone (keepers re-sync stale votes); a lock
    /// without a selection is left untouched.
    pub fn poke(&mut self, caller: &Address, lock_id: LockId, now: Timestamp) -> Result<()> {
        self.check_window(caller, now)?;
        let lock = self.escrow.lock(lock_id)?;
        if lock.is_attached() {
            return Err(EscrowError::TokenAttached(lock_id).into());
        }
        let stored = match self.pool_votes.get(&lock_id) {
            Some(stored) if !stored.is_empty() => stored.clone(),
            _ => return Ok(()),
        };
        let pools: Vec<PoolId> = stored.iter().map(|(p, _)| *p).collect();
        let old_amounts: Vec<u128> = stored.iter().map(|(_, a)| *a).collect();

        let power = self.escrow.balance_of_nft(lock_id, now)?;
        self.internal_reset(caller, lock_id, now);
        let shares = split_by_weights(power, &old_amounts);
        self.apply_vote(caller, lock_id, &pools, &shares, power, now)
    }

    // -------------------------------------------------------------------------
    // Managed NFTs
    // -------------------------------------------------------------------------

    /// Mint a managed NFT for a strategy and set up its rewarder.
    pub fn create_managed_nft(&mut self, strategy: &Address, now: Timestamp) -> Result<LockId> {
        let managed_id = self.escrow.create_managed_lock(strategy, now)?;
        self.rewarders.insert(managed_id, VirtualRewarder::new());
        self.drain_escrow_events();
        Ok(managed_id)
    }

    /// Install the strategy's engine-side hooks for a managed NFT.
    pub fn register_strategy(&mut self, managed_id: LockId, strategy: Box<dyn Strategy>) {
        self.strategies.insert(managed_id, strategy);
    }

    /// Delegate a lock to a managed NFT. If the strategy already voted this
    /// epoch the new power is folded into its existing selection, additively.
    pub fn attach_to_managed_nft(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        managed_id: LockId,
        now: Timestamp,
    ) -> Result<()> {
        self.check_window(caller, now)?;
        let amount = self
            .escrow
            .attach_to_managed_nft(caller, lock_id, managed_id, now)?;
        self.drain_escrow_events();
        if amount > 0 {
            self.rewarders
                .entry(managed_id)
                .or_default()
                .deposit(lock_id, amount, now)?;
        }
        if let Some(strategy) = self.strategies.get_mut(&managed_id) {
            strategy.on_attach(lock_id, amount);
        }
        if amount > 0 {
            self.fold_into_current_vote(caller, managed_id, amount, now);
        }
        Ok(())
    }

    /// Top up an attached lock's delegation. The deposit lands in the managed
    /// NFT's aggregate, the lock's rewarder balance, and (if the strategy is
    /// voting this epoch) its live selection, keeping all three in step.
    pub fn deposit_to_attached_nft(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        amount: TokenAmount,
        now: Timestamp,
    ) -> Result<()> {
        self.check_window(caller, now)?;
        let managed_id = self
            .escrow
            .deposit_to_attached_nft(caller, lock_id, amount, now)?;
        self.drain_escrow_events();
        self.rewarders
            .entry(managed_id)
            .or_default()
            .deposit(lock_id, amount, now)?;
        if let Some(strategy) = self.strategies.get_mut(&managed_id) {
            strategy.on_attach(lock_id, amount);
        }
        self.fold_into_current_vote(caller, managed_id, amount, now);
        Ok(())
    }

    /// Reverse an attach, settling the lock's strategy harvest first and
    /// subtracting its delegated principal from the strategy's live selection.
    pub fn detach_from_managed_nft(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        now: Timestamp,
    ) -> Result<()> {
        self.check_window(caller, now)?;
        self.escrow.check_authorized(caller, lock_id)?;
        let lock = self.escrow.lock(lock_id)?;
        let managed_id = lock
            .attached_to
            .ok_or(EscrowError::TokenNotAttached(lock_id))?;
        // The full delegated principal, attach plus later top-ups; this is
        // what the escrow returns and what the vote accumulators carry
        let principal = self.escrow.attached_principal_of(lock_id);

        let (balance, pending) = match self.rewarders.get(&managed_id) {
            Some(rewarder) => (rewarder.balance_of(lock_id), rewarder.pending(lock_id, now)),
            None => (0, 0),
        };

        // The escrow detach performs every fallible step (authorization,
        // harvest transfer); accumulator updates after it cannot fail.
        self.escrow
            .detach_from_managed_nft(caller, lock_id, pending, now)?;
        self.drain_escrow_events();
        if let Some(rewarder) = self.rewarders.get_mut(&managed_id) {
            let harvested = rewarder.withdraw(lock_id, balance, now)?;
            debug_assert_eq!(harvested, pending, "pending harvest must match settlement");
        }
        if let Some(strategy) = self.strategies.get_mut(&managed_id) {
            strategy.on_detach(lock_id, principal, pending);
        }
        if principal > 0 {
            self.subtract_from_current_vote(managed_id, principal, now);
        }
        Ok(())
    }

    /// Record a strategy reward for the epoch containing `now`. Only callers
    /// authorized for the managed NFT's strategy may notify.
    pub fn notify_strategy_reward(
        &mut self,
        caller: &Address,
        managed_id: LockId,
        amount: TokenAmount,
        now: Timestamp,
    ) -> Result<()> {
        if !self.escrow.registry().is_authorized(caller, managed_id) {
            return Err(VoterError::StrategyAccessDenied);
        }
        self.rewarders
            .entry(managed_id)
            .or_default()
            .notify_reward(amount, epoch_from_timestamp(now));
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Distribution
    // -------------------------------------------------------------------------

    /// Seal the present epoch's weights and hand them to the minter.
    /// Runs at most once per epoch.
    pub fn distribute_all(&mut self, now: Timestamp) -> Result<Vec<(PoolId, TokenAmount)>> {
        let epoch = epoch_from_timestamp(now);
        if self.snapshots.contains_key(&epoch) {
            return Err(VoterError::EpochAlreadyDistributed(epoch));
        }
        let mut snapshot: Vec<(PoolId, TokenAmount)> = self
            .weights
            .get(&epoch)
            .map(|pools| {
                pools
                    .iter()
                    .filter(|(_, &w)| w > 0)
                    .map(|(p, &w)| (*p, w))
                    .collect()
            })
            .unwrap_or_default();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));

        self.minter.receive_epoch_weights(epoch, &snapshot);
        self.snapshots.insert(epoch, snapshot.clone());
        info!(
            epoch,
            pools = snapshot.len(),
            total = self.total_weights_per_epoch(epoch),
            "epoch weights distributed"
        );
        Ok(snapshot)
    }

    // -------------------------------------------------------------------------
    // Window & whitelist
    // -------------------------------------------------------------------------

    /// Whether `now` falls inside the pre-boundary soft-lock.
    pub fn in_distribution_window(&self, now: Timestamp) -> bool {
        let end = epoch_end(epoch_from_timestamp(now));
        now >= end.saturating_sub(self.window_secs)
    }

    pub fn whitelist_for_early_voting(&mut self, caller: Address) {
        self.whitelist.insert(caller);
    }

    pub fn set_distribution_window(&mut self, window_secs: u64) {
        self.window_secs = window_secs;
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn weights_per_epoch(&self, epoch: Epoch, pool: &PoolId) -> TokenAmount {
        self.weights
            .get(&epoch)
            .and_then(|pools| pools.get(pool))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_weights_per_epoch(&self, epoch: Epoch) -> TokenAmount {
        self.totals.get(&epoch).copied().unwrap_or(0)
    }

    /// The lock's current pool selection with absolute amounts.
    pub fn pool_vote(&self, lock_id: LockId) -> Vec<(PoolId, TokenAmount)> {
        self.pool_votes.get(&lock_id).cloned().unwrap_or_default()
    }

    pub fn last_voted_epoch(&self, lock_id: LockId) -> Option<Epoch> {
        self.last_voted_epoch.get(&lock_id).copied()
    }

    /// Sealed weights for a distributed epoch.
    pub fn distributed_weights(&self, epoch: Epoch) -> Option<&[(PoolId, TokenAmount)]> {
        self.snapshots.get(&epoch).map(Vec::as_slice)
    }

    pub fn rewarder(&self, managed_id: LockId) -> Option<&VirtualRewarder> {
        self.rewarders.get(&managed_id)
    }

    pub fn escrow(&self) -> &VotingEscrow {
        &self.escrow
    }

    pub fn escrow_mut(&mut self) -> &mut VotingEscrow {
        &mut self.escrow
    }

    /// Drain the combined escrow + engine event stream.
    pub fn take_events(&mut self) -> Vec<ProtocolEvent> {
        self.drain_escrow_events();
        std::mem::take(&mut self.events)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn check_window(&self, caller: &Address, now: Timestamp) -> Result<()> {
        if self.in_distribution_window(now) && !self.whitelist.contains(caller) {
            return Err(VoterError::DistributionWindow {
                now,
                epoch_end: epoch_end(epoch_from_timestamp(now)),
            });
        }
        Ok(())
    }

    /// Remove the lock's stored contribution from the epoch it sits in and
    /// announce the reset, zero or not.
    fn internal_reset(&mut self, caller: &Address, lock_id: LockId, now: Timestamp) {
        let stored = self.pool_votes.remove(&lock_id).unwrap_or_default();
        let old_epoch = self
            .last_voted_epoch
            .get(&lock_id)
            .copied()
            .unwrap_or_else(|| epoch_from_timestamp(now));

        let mut old_total: TokenAmount = 0;
        if !stored.is_empty() {
            let epoch_weights = self.weights.entry(old_epoch).or_default();
            for (pool, amount) in &stored {
                let weight = epoch_weights.entry(*pool).or_insert(0);
                *weight = weight.saturating_sub(*amount);
                old_total = old_total.saturating_add(*amount);
            }
            let total = self.totals.entry(old_epoch).or_insert(0);
            *total = total.saturating_sub(old_total);
        }
        self.events.push(ProtocolEvent::VoteReset {
            actor: *caller,
            lock_id,
            epoch: old_epoch,
            total: old_total,
        });
        debug!(lock_id, old_epoch, old_total, "vote reset");
    }

    fn apply_vote(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        pools: &[PoolId],
        shares: &[TokenAmount],
        power: TokenAmount,
        now: Timestamp,
    ) -> Result<()> {
        let epoch = epoch_from_timestamp(now);
        let epoch_weights = self.weights.entry(epoch).or_default();
        let mut stored = Vec::with_capacity(pools.len());
        for (pool, &share) in pools.iter().zip(shares) {
            let weight = epoch_weights.entry(*pool).or_insert(0);
            *weight = weight.saturating_add(share);
            stored.push((*pool, share));
        }
        let total = self.totals.entry(epoch).or_insert(0);
        *total = total.saturating_add(power);

        self.pool_votes.insert(lock_id, stored.clone());
        self.last_voted_epoch.insert(lock_id, epoch);
        self.escrow.set_voted(lock_id, true)?;
        self.events.push(ProtocolEvent::VoteCast {
            actor: *caller,
            lock_id,
            epoch,
            pools: stored,
            total: power,
        });
        info!(
            lock_id,
            epoch,
            power,
            pools = pools.len(),
            actor = %short_id(caller),
            "vote cast"
        );
        Ok(())
    }

    /// Add freshly attached power to a strategy's live selection without
    /// re-deciding the allocation.
    fn fold_into_current_vote(
        &mut self,
        caller: &Address,
        managed_id: LockId,
        amount: TokenAmount,
        now: Timestamp,
    ) {
        let epoch = epoch_from_timestamp(now);
        if self.last_voted_epoch.get(&managed_id) != Some(&epoch) {
            return;
        }
        let stored = match self.pool_votes.get(&managed_id) {
            Some(stored) if !stored.is_empty() => stored.clone(),
            _ => return,
        };
        let proportions: Vec<u128> = stored.iter().map(|(_, a)| *a).collect();
        let additions = split_by_weights(amount, &proportions);

        let epoch_weights = self.weights.entry(epoch).or_default();
        let mut updated = Vec::with_capacity(stored.len());
        let mut cast = Vec::with_capacity(stored.len());
        for ((pool, prev), extra) in stored.into_iter().zip(additions) {
            let weight = epoch_weights.entry(pool).or_insert(0);
            *weight = weight.saturating_add(extra);
            updated.push((pool, prev.saturating_add(extra)));
            cast.push((pool, extra));
        }
        let total = self.totals.entry(epoch).or_insert(0);
        *total = total.saturating_add(amount);
        self.pool_votes.insert(managed_id, updated);
        self.events.push(ProtocolEvent::VoteCast {
            actor: *caller,
            lock_id: managed_id,
            epoch,
            pools: cast,
            total: amount,
        });
        debug!(managed_id, epoch, amount, "attached power folded into vote");
    }

    /// Subtract detached power from a strategy's live selection, clamped so
    /// no accumulator underflows.
    fn subtract_from_current_vote(
        &mut self,
        managed_id: LockId,
        amount: TokenAmount,
        now: Timestamp,
    ) {
        let epoch = epoch_from_timestamp(now);
        if self.last_voted_epoch.get(&managed_id) != Some(&epoch) {
            return;
        }
        let stored = match self.pool_votes.get(&managed_id) {
            Some(stored) if !stored.is_empty() => stored.clone(),
            _ => return,
        };
        let proportions: Vec<u128> = stored.iter().map(|(_, a)| *a).collect();
        let reductions = split_by_weights(amount, &proportions);

        let epoch_weights = self.weights.entry(epoch).or_default();
        let mut updated = Vec::with_capacity(stored.len());
        let mut subtracted: TokenAmount = 0;
        for ((pool, prev), cut) in stored.into_iter().zip(reductions) {
            let actual = cut.min(prev);
            let weight = epoch_weights.entry(pool).or_insert(0);
            *weight = weight.saturating_sub(actual);
            updated.push((pool, prev - actual));
            subtracted = subtracted.saturating_add(actual);
        }
        let total = self.totals.entry(epoch).or_insert(0);
        *total = total.saturating_sub(subtracted);
        self.pool_votes.insert(managed_id, updated);
        debug!(managed_id, epoch, subtracted, "detached power removed from vote");
    }

    fn drain_escrow_events(&mut self) {
        self.events.extend(self.escrow.take_events());
    }
}
