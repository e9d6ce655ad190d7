//! Error types for the vote-escrow ledger

use thiserror::Error;
use vetoken_types::LockId;

/// Errors that can occur in the vote-escrow ledger.
///
/// Every condition is detected before any state mutation; a returned error
/// means the call had no effect.
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Lock duration is zero, exceeds the maximum, or does not extend the lock
    #[error("invalid lock duration: {0}")]
    InvalidLockDuration(&'static str),

    /// Deposit or split amount of zero
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// Operation is incompatible with a permanent lock
    #[error("lock {0} is permanently locked")]
    PermanentLocked(LockId),

    /// Operation requires a permanent lock
    #[error("lock {0} is not permanently locked")]
    NotPermanentLocked(LockId),

    /// Operation is incompatible with an attached lock
    #[error("lock {0} is attached to a managed NFT")]
    TokenAttached(LockId),

    /// Operation requires an attached lock
    #[error("lock {0} is not attached to a managed NFT")]
    TokenNotAttached(LockId),

    /// Lock has expired
    #[error("lock {0} has expired")]
    TokenExpired(LockId),

    /// Lock has not expired yet (or is permanent and never expires)
    #[error("lock {0} has not expired")]
    TokenNoExpired(LockId),

    /// Lock is contributing to the current epoch's weights; reset first
    #[error("lock {0} has an active vote")]
    TokenVoted(LockId),

    /// Unknown lock id
    #[error("lock {0} does not exist")]
    TokenNotExist(LockId),

    /// Caller is neither owner nor approved for the lock
    #[error("caller is not authorized for lock {0}")]
    AccessDenied(LockId),

    /// Target of an attach is not a managed NFT
    #[error("lock {0} is not a managed NFT")]
    NotManagedNft(LockId),

    /// Managed NFT operations are suspended by the manager
    #[error("managed NFT {0} is disabled")]
    DisabledManagedNft(LockId),

    /// Operation is not available for managed NFTs themselves
    #[error("lock {0} is a managed NFT")]
    ManagedNft(LockId),

    /// Merge source and destination are the same lock
    #[error("source and destination are the same lock")]
    SameLock,

    /// A strategy may own at most one managed NFT
    #[error("strategy already owns managed NFT {0}")]
    ManagedNftAlreadyCreated(LockId),

    /// Split amounts are empty or do not sum to the lock's principal
    #[error("split amounts must be non-zero and sum to the lock principal")]
    InvalidSplitAmounts,

    /// Token vault rejected a transfer
    #[error("token vault error: {0}")]
    Vault(#[from] anyhow::Error),
}

/// Result type for escrow operations
pub type Result<T> = std::result::Result<T, EscrowError>;
