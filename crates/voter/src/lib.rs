//! Epoch Voting Engine
//!
//! Implements weighted epoch voting on top of the vote-escrow ledger:
//! - Per-epoch pool weight accumulators with vote/reset/poke
//! - Distribution-window soft-lock and once-per-epoch weight hand-off
//! - Managed-NFT orchestration: attach/detach, strategy rewarders, hooks

pub mod collaborators;
pub mod errors;
pub mod handle;
pub mod split;
pub mod voter;

pub use collaborators::{
    CompoundingStrategy, EmissionSink, GaugeRegistry, InMemoryGaugeRegistry,
    RecordingEmissionSink, Strategy,
};
pub use errors::VoterError;
pub use handle::VoterHandle;
pub use split::split_by_weights;
pub use voter::{Voter, DEFAULT_WINDOW_SECS};
