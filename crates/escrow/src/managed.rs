//! Managed-NFT manager interface
//!
//! The manager owns the administrative state of each managed NFT: whether it
//! is currently accepting attach/detach traffic, and which callers may act
//! for its strategy. Both the escrow ledger and the voting engine consult it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use vetoken_types::{Address, LockId};

/// Administrative registry for managed NFTs.
pub trait ManagedRegistry: Send + Sync {
    /// Register a newly minted managed NFT with its owning strategy.
    fn register(&mut self, managed_id: LockId, strategy: Address);

    /// Strategy account that owns a managed NFT.
    fn strategy_of(&self, managed_id: LockId) -> Option<Address>;

    /// Whether attach/detach/vote traffic for this managed NFT is suspended.
    fn is_disabled(&self, managed_id: LockId) -> bool;

    /// Suspend or resume a managed NFT.
    fn set_disabled(&mut self, managed_id: LockId, disabled: bool);

    /// Whether `caller` may act on the strategy's behalf for this managed NFT.
    fn is_authorized(&self, caller: &Address, managed_id: LockId) -> bool;

    /// Grant an additional authorized caller for a managed NFT.
    fn authorize(&mut self, managed_id: LockId, caller: Address);
}

/// In-memory registry; the owning strategy is always authorized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryManagedRegistry {
    strategies: HashMap<LockId, Address>,
    disabled: HashSet<LockId>,
    extra_authorized: HashMap<LockId, HashSet<Address>>,
}

impl InMemoryManagedRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ManagedRegistry for InMemoryManagedRegistry {
    fn register(&mut self, managed_id: LockId, strategy: Address) {
        self.strategies.insert(managed_id, strategy);
    }

    fn strategy_of(&self, managed_id: LockId) -> Option<Address> {
        self.strategies.get(&managed_id).copied()
    }

    fn is_disabled(&self, managed_id: LockId) -> bool {
        self.disabled.contains(&managed_id)
    }

    fn set_disabled(&mut self, managed_id: LockId, disabled: bool) {
        if disabled {
            self.disabled.insert(managed_id);
        } else {
            self.disabled.remove(&managed_id);
        }
    }

    fn is_authorized(&self, caller: &Address, managed_id: LockId) -> bool {
        if self.strategies.get(&managed_id) == Some(caller) {
            return true;
        }
        self.extra_authorized
            .get(&managed_id)
            .is_some_and(|set| set.contains(caller))
    }

    fn authorize(&mut self, managed_id: LockId, caller: Address) {
        self.extra_authorized
            .entry(managed_id)
            .or_default()
            .insert(caller);
    }
}
