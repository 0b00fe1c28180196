//! Chronicle Event Store: the transactional write protocol and its backends.
//!
//! [`TransactionalEventDatabase`] implements the `EventDatabase` port on top
//! of any [`TransactionBackend`]. Two backends ship here: [`InMemoryBackend`]
//! for tests and embedded use, and [`PgBackend`] on `sqlx`/PostgreSQL.

pub mod config;
pub mod memory;
mod ordering;
pub mod packing;
pub mod pg_backend;
pub mod protocol;
pub mod schema;
pub mod transaction;

pub use config::EventStoreConfig;
pub use memory::InMemoryBackend;
pub use pg_backend::PgBackend;
pub use protocol::TransactionalEventDatabase;
pub use transaction::{
    EventPacket, HeaderOperation, RecordOperation, StreamTransaction, SubmitOutcome,
    TransactionBackend,
};

/// A transactional event database kept in process memory.
pub type InMemoryEventDatabase = TransactionalEventDatabase<InMemoryBackend>;
