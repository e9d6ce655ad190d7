//! Collaborator interfaces consumed by the voting engine
//!
//! The gauge/pool registry and the emission minter live outside this core;
//! the engine only consults and notifies them. The strategy trait is the
//! closed capability surface for managed-NFT auto-compounders.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use vetoken_types::{Epoch, LockId, PoolId, TokenAmount};

/// Registry of emission-receiving pools and their gauge liveness.
pub trait GaugeRegistry: Send + Sync {
    fn pool_exists(&self, pool: &PoolId) -> bool;
    fn is_gauge_alive(&self, pool: &PoolId) -> bool;
}

/// In-memory registry for tests and standalone engine runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryGaugeRegistry {
    pools: HashSet<PoolId>,
    killed: HashSet<PoolId>,
}

impl InMemoryGaugeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pool(&mut self, pool: PoolId) {
        self.pools.insert(pool);
    }

    pub fn kill_gauge(&mut self, pool: PoolId) {
        self.killed.insert(pool);
    }

    pub fn revive_gauge(&mut self, pool: &PoolId) {
        self.killed.remove(pool);
    }
}

impl GaugeRegistry for InMemoryGaugeRegistry {
    fn pool_exists(&self, pool: &PoolId) -> bool {
        self.pools.contains(pool)
    }

    fn is_gauge_alive(&self, pool: &PoolId) -> bool {
        self.pools.contains(pool) && !self.killed.contains(pool)
    }
}

/// Receiver of finalized per-pool weight totals (the minter collaborator).
pub trait EmissionSink: Send + Sync {
    fn receive_epoch_weights(&mut self, epoch: Epoch, weights: &[(PoolId, TokenAmount)]);
}

/// Sink that records every hand-off, for tests and replay.
#[derive(Debug, Clone, Default)]
pub struct RecordingEmissionSink {
    pub received: Vec<(Epoch, Vec<(PoolId, TokenAmount)>)>,
}

impl RecordingEmissionSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EmissionSink for RecordingEmissionSink {
    fn receive_epoch_weights(&mut self, epoch: Epoch, weights: &[(PoolId, TokenAmount)]) {
        self.received.push((epoch, weights.to_vec()));
    }
}

impl<E: EmissionSink> EmissionSink for std::sync::Arc<parking_lot::Mutex<E>> {
    fn receive_epoch_weights(&mut self, epoch: Epoch, weights: &[(PoolId, TokenAmount)]) {
        self.lock().receive_epoch_weights(epoch, weights);
    }
}

/// Capability surface a managed-NFT strategy exposes to the engine.
pub trait Strategy: Send + Sync {
    /// A lock delegated `amount` of principal to this strategy.
    fn on_attach(&mut self, lock_id: LockId, amount: TokenAmount);

    /// A lock left; `amount` is the principal returned, `rewards` its
    /// harvested share.
    fn on_detach(&mut self, lock_id: LockId, amount: TokenAmount, rewards: TokenAmount);
}

/// Reference auto-compounding strategy bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct CompoundingStrategy {
    attached: HashMap<LockId, TokenAmount>,
    total_attached: TokenAmount,
    total_rewards_paid: TokenAmount,
}

impl CompoundingStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached_amount(&self, lock_id: LockId) -> TokenAmount {
        self.attached.get(&lock_id).copied().unwrap_or(0)
    }

    pub fn total_attached(&self) -> TokenAmount {
        self.total_attached
    }

    pub fn total_rewards_paid(&self) -> TokenAmount {
        self.total_rewards_paid
    }
}

impl Strategy for CompoundingStrategy {
    fn on_attach(&mut self, lock_id: LockId, amount: TokenAmount) {
        let slot = self.attached.entry(lock_id).or_insert(0);
        *slot = slot.saturating_add(amount);
        self.total_attached = self.total_attached.saturating_add(amount);
        debug!(lock_id, amount, "strategy attach hook");
    }

    fn on_detach(&mut self, lock_id: LockId, amount: TokenAmount, rewards: TokenAmount) {
        self.attached.remove(&lock_id);
        self.total_attached = self.total_attached.saturating_sub(amount);
        self.total_rewards_paid = self.total_rewards_paid.saturating_add(rewards);
        debug!(lock_id, amount, rewards, "strategy detach hook");
    }
}

/// Shared-handle forwarding, so a strategy handed to the engine can still be
/// observed by its owner.
impl<S: Strategy> Strategy for std::sync::Arc<parking_lot::Mutex<S>> {
    fn on_attach(&mut self, lock_id: LockId, amount: TokenAmount) {
        self.lock().on_attach(lock_id, amount);
    }

    fn on_detach(&mut self, lock_id: LockId, amount: TokenAmount, rewards: TokenAmount) {
        self.lock().on_detach(lock_id, amount, rewards);
    }
}
