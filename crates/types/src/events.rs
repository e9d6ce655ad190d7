//! Durable event contract
//!
//! Every state transition in the escrow ledger and the voting engine emits
//! one of these events. The stream carries enough data (actor, lock id,
//! epoch, amounts) to reconstruct the ledger off-process, so variants and
//! fields are part of the protocol's stable interface.

use crate::scalars::{Address, Epoch, LockId, PoolId, Timestamp, TokenAmount};
use serde::{Deserialize, Serialize};

/// Protocol event emitted on every state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolEvent {
    /// Total locked principal changed (deposit, withdraw, merge, split)
    Supply {
        supply_before: TokenAmount,
        supply_after: TokenAmount,
    },
    /// A lock was converted to permanent
    LockPermanent {
        actor: Address,
        lock_id: LockId,
        amount: TokenAmount,
        at: Timestamp,
    },
    /// A permanent lock resumed decaying
    UnlockPermanent {
        actor: Address,
        lock_id: LockId,
        amount: TokenAmount,
        at: Timestamp,
    },
    /// Voting power was cast for a set of pools
    VoteCast {
        actor: Address,
        lock_id: LockId,
        epoch: Epoch,
        pools: Vec<(PoolId, TokenAmount)>,
        total: TokenAmount,
    },
    /// A lock's prior contribution was removed from an epoch
    VoteReset {
        actor: Address,
        lock_id: LockId,
        epoch: Epoch,
        total: TokenAmount,
    },
    /// A lock delegated its principal and power to a managed NFT
    AttachToManagedNft {
        actor: Address,
        lock_id: LockId,
        managed_id: LockId,
        amount: TokenAmount,
    },
    /// A lock left a managed NFT, reclaiming principal plus harvested share
    DetachFromManagedNft {
        actor: Address,
        lock_id: LockId,
        managed_id: LockId,
        amount: TokenAmount,
    },
    /// Principal was added on behalf of an attached lock
    DepositToAttachedNft {
        actor: Address,
        lock_id: LockId,
        managed_id: LockId,
        amount: TokenAmount,
    },
}
