//! Process-wide "a schema change is executing here" gate.
//!
//! One slot, guarded by a mutex. Checking that the slot is free and claiming it
//! is a single operation, so two requests can never both believe they own it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Identity of the change holding the gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveChange {
    /// Change seed
    pub seed: u64,
    /// Target table
    pub table: String,
}

/// Single-slot gate for the change executing on this node.
#[derive(Debug, Default)]
pub struct InFlightGate {
    slot: Mutex<Option<ActiveChange>>,
}

impl InFlightGate {
    /// Creates an open gate.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claims the gate for a change, failing if another change holds it.
    pub fn try_acquire(self: &Arc<Self>, seed: u64, table: &str) -> Result<InFlightGuard> {
        let mut slot = self.slot.lock();
        if let Some(active) = slot.as_ref() {
            return Err(Error::AlreadyRunning {
                table: active.table.clone(),
            });
        }

        *slot = Some(ActiveChange {
            seed,
            table: table.to_string(),
        });
        debug!(seed, table, "schema change gate acquired");

        Ok(InFlightGuard {
            gate: Arc::clone(self),
            seed,
        })
    }

    /// The change currently holding the gate.
    pub fn active(&self) -> Option<ActiveChange> {
        self.slot.lock().clone()
    }

    /// Forcibly empties the gate, returning whoever held it.
    ///
    /// Used when a node becomes master: anything recorded under the previous
    /// role is stale.
    pub fn reset(&self) -> Option<ActiveChange> {
        self.slot.lock().take()
    }

    fn release(&self, seed: u64) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|active| active.seed == seed) {
            *slot = None;
            debug!(seed, "schema change gate released");
        }
    }
}

/// Ownership of the gate; releases it on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    gate: Arc<InFlightGate>,
    seed: u64,
}

impl InFlightGuard {
    /// Seed of the owning change.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gate.release(self.seed);
    }
}
