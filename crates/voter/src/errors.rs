//! Error types for the epoch voting engine

use thiserror::Error;
use vetoken_escrow::EscrowError;
use vetoken_rewarder::RewarderError;
use vetoken_types::{Epoch, PoolId, Timestamp};

/// Errors that can occur in the voting engine. Like the escrow, every
/// condition is rejected before any state mutation.
#[derive(Error, Debug)]
pub enum VoterError {
    /// Vote-weight mutation attempted inside the pre-boundary soft-lock
    #[error("distribution window is open (now {now}, epoch ends {epoch_end})")]
    DistributionWindow { now: Timestamp, epoch_end: Timestamp },

    /// Vote cast for a pool the registry does not know
    #[error("unknown pool {}", hex::encode(.0))]
    PoolNotRegistered(PoolId),

    /// Vote cast for a pool whose gauge was killed
    #[error("gauge for pool {} is not alive", hex::encode(.0))]
    GaugeKilled(PoolId),

    /// Pools/weights arity mismatch, empty selection, zero weight, or duplicate pool
    #[error("invalid vote selection: {0}")]
    InvalidVoteSelection(&'static str),

    /// distribute_all already ran for this epoch
    #[error("epoch {0} weights already distributed")]
    EpochAlreadyDistributed(Epoch),

    /// Caller may not act for this managed NFT's strategy
    #[error("caller is not authorized for the strategy")]
    StrategyAccessDenied,

    #[error(transparent)]
    Escrow(#[from] EscrowError),

    #[error(transparent)]
    Rewarder(#[from] RewarderError),
}

/// Result type for voting engine operations
pub type Result<T> = std::result::Result<T, VoterError>;
