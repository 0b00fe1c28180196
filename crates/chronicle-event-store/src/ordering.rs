//! Per-stream publish ordering.
//!
//! A backend may acknowledge commits in a different order than it applied
//! them. Writers holding a stream's gate submit and publish one at a time, so
//! a stream's commit groups reach the dispatcher in position order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chronicle_core::database::StreamKey;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Gate = Arc<AsyncMutex<()>>;

/// One gate per stream with a writer in flight.
#[derive(Debug, Default)]
pub(crate) struct StreamGates {
    gates: Mutex<HashMap<StreamKey, Gate>>,
}

impl StreamGates {
    /// Waits until no other writer holds the gate of `stream_key`.
    pub(crate) async fn enter(&self, stream_key: &StreamKey) -> GatePass<'_> {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(gates.entry(stream_key.clone()).or_default())
        };
        GatePass {
            gates: self,
            stream_key: stream_key.clone(),
            guard: Some(gate.lock_owned().await),
        }
    }

    /// Number of streams with a writer holding or awaiting a gate.
    #[cfg(test)]
    pub(crate) fn open(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Held while a writer submits and publishes. Dropping it lets the next
/// writer of the stream through and forgets idle gates.
pub(crate) struct GatePass<'a> {
    gates: &'a StreamGates,
    stream_key: StreamKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut gates = self
            .gates
            .gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Waiters hold their own clone, so a count of one means nobody is queued.
        if gates
            .get(&self.stream_key)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            gates.remove(&self.stream_key);
        }
    }
}
