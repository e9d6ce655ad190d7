//! Shared types for the vetoken protocol
//!
//! Defines canonical units, epoch arithmetic, deterministic identifiers,
//! and the durable event contract emitted by the escrow ledger and the
//! voting engine.

pub mod epoch;
pub mod events;
pub mod scalars;

pub use epoch::*;
pub use events::*;
pub use scalars::*;

/// Module version for API introspection
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
