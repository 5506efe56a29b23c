//! Per-fingerprint serialization.
//!
//! The admission check and the ledger append for one fingerprint must not
//! interleave, or a burst of simultaneous requests could all pass the same
//! window check. Different fingerprints never contend.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::security::fingerprint_tag;

/// Lazily created mutex per fingerprint.
#[derive(Debug)]
pub struct FingerprintGates {
    gates: DashMap<String, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl FingerprintGates {
    pub fn new(timeout: Duration) -> Self {
        Self {
            gates: DashMap::new(),
            timeout,
        }
    }

    /// Run `f` while holding the gate for `fingerprint`.
    ///
    /// Fails with `ConcurrencyConflict` if the gate is not acquired within
    /// the timeout.
    pub fn run<T, F>(&self, fingerprint: &str, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> EngineResult<T>,
    {
        let gate = Arc::clone(self.gates.entry(fingerprint.to_string()).or_default().value());
        let _guard = gate
            .try_lock_for(self.timeout)
            .ok_or_else(|| EngineError::ConcurrencyConflict {
                key: format!("fingerprint:{}", fingerprint_tag(fingerprint)),
                attempts: 1,
            })?;
        f()
    }

    /// Drop gates nobody holds. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.gates.len();
        self.gates.retain(|_, gate| Arc::strong_count(gate) > 1);
        before.saturating_sub(self.gates.len())
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
