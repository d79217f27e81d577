//! Per-key admission gate.
//!
//! Two concurrent `cache_audio` calls for the same URL must not both download.
//! The second caller waits for the first to finish and then re-checks the
//! index; callers for different keys never wait on each other.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};

#[derive(Default)]
pub(crate) struct AdmissionGate {
    in_flight: Mutex<HashSet<String>>,
    released: Condvar,
}

impl AdmissionGate {
    /// Blocks until no other admission for `key` is running, then claims it.
    pub(crate) fn acquire(&self, key: &str) -> AdmissionPermit<'_> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while in_flight.contains(key) {
            in_flight = self
                .released
                .wait(in_flight)
                .unwrap_or_else(PoisonError::into_inner);
        }
        in_flight.insert(key.to_string());

        AdmissionPermit {
            gate: self,
            key: key.to_string(),
        }
    }

    #[cfg(test)]
    fn is_held(&self, key: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

/// Releases the key on drop, including on early return or panic.
pub(crate) struct AdmissionPermit<'a> {
    gate: &'a AdmissionGate,
    key: String,
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        self.gate
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        self.gate.released.notify_all();
    }
}
