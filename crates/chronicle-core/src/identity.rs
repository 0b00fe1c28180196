//! Event identities.
//!
//! Writes that carry a causation id get deterministic identities, so a
//! retried write of the same logical batch produces the same ids and a
//! backend can recognise it as already applied. Everything else draws ids
//! from an [`IdGenerator`].

use uuid::Uuid;

use crate::error::DomainError;

const IDENTITY_MASK: [u8; 16] = [
    0x9e, 0x37, 0x79, 0xb9, 0x7f, 0x4a, 0x7c, 0x15, 0xf3, 0x9c, 0xc0, 0x60, 0x5c, 0xed, 0xc8, 0x34,
];

/// Derives the identity of the event at `index` within a batch caused by
/// `causation_id`.
///
/// The causation id bytes are mixed with a fixed mask and the low-order four
/// bytes of `index` are folded into the tail, so identities are unique per
/// index for any batch below 2^32 events.
///
/// # Errors
///
/// Returns `DomainError::InvalidCausationId` if `causation_id` is nil.
pub fn idempotent_event_id(causation_id: Uuid, index: usize) -> Result<Uuid, DomainError> {
    if causation_id.is_nil() {
        return Err(DomainError::InvalidCausationId);
    }

    let mut bytes = *causation_id.as_bytes();
    for (byte, mask) in bytes.iter_mut().zip(IDENTITY_MASK) {
        *byte ^= mask;
    }

    let index_bytes = index.to_le_bytes();
    for (byte, index_byte) in bytes[12..].iter_mut().zip(index_bytes) {
        *byte ^= index_byte;
    }

    Ok(Uuid::from_bytes(bytes))
}

/// Source of random event identities.
pub trait IdGenerator: Send + Sync {
    /// Returns a fresh identifier.
    fn next_id(&self) -> Uuid;
}

/// Production generator backed by UUID v4.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}
