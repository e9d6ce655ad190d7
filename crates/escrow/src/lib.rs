//! Vote-Escrow Ledger
//!
//! Implements the veNFT lock lifecycle:
//! - Linear voting-power decay with epoch-rounded expiries
//! - Permanent locks pinned at full principal
//! - Managed-NFT attach/detach with principal custody transfer
//! - Merge, split, boost-assisted deposits, and withdrawal

pub mod boost;
pub mod errors;
pub mod escrow;
pub mod lock;
pub mod managed;
pub mod vault;

pub use boost::{BoostSource, BpsBoost};
pub use errors::EscrowError;
pub use escrow::VotingEscrow;
pub use lock::Lock;
pub use managed::{InMemoryManagedRegistry, ManagedRegistry};
pub use vault::{InMemoryTokenVault, MockTokenVault, TokenVault};
