//! Test id generator: predictable event identities.

use std::sync::atomic::{AtomicU64, Ordering};

use chronicle_core::identity::IdGenerator;
use uuid::Uuid;

/// Hands out `00000000-0000-0000-0000-000000000001`, `...0002` and so on.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    /// Creates a generator whose first id ends in `1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> Uuid {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Uuid::from_u128(u128::from(n))
    }
}
