//! Shared engine handle
//!
//! The engine itself is a plain single-writer state machine; this handle is
//! the one place interior locking lives. Writers serialize on the `RwLock`,
//! readers run concurrently against a consistent view.

use crate::voter::Voter;
use parking_lot::RwLock;
use std::sync::Arc;

/// Clonable, thread-safe handle around the voting engine.
#[derive(Clone)]
pub struct VoterHandle {
    inner: Arc<RwLock<Voter>>,
}

impl VoterHandle {
    pub fn new(voter: Voter) -> Self {
        Self {
            inner: Arc::new(RwLock::new(voter)),
        }
    }

    /// Run a read-only closure against the engine.
    pub fn read<R>(&self, f: impl FnOnce(&Voter) -> R) -> R {
        f(&self.inner.read())
    }

    /// Run a mutating closure against the engine, exclusively.
    pub fn write<R>(&self, f: impl FnOnce(&mut Voter) -> R) -> R {
        f(&mut self.inner.write())
    }
}
