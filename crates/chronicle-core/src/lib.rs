//! Chronicle Core: aggregates, versions and the repository.
//!
//! This crate defines the event-sourcing vocabulary shared by every other
//! Chronicle crate: version types, the aggregate and event traits, the
//! handler registry used to rehydrate aggregates, idempotent event
//! identities, the event database port and the repository built on it. It
//! contains no storage code.

pub mod aggregate;
pub mod applier;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod event;
pub mod identity;
pub mod repository;
pub mod version;

pub use aggregate::{Aggregate, EventRecorder, Loaded};
pub use applier::HandlerRegistry;
pub use database::{EventDatabase, StreamKey, StreamKeyStrategy};
pub use error::DomainError;
pub use event::{DomainEvent, NewEvent, StoredEvent, WriteContext};
pub use repository::Repository;
pub use version::{AggregateVersion, ExpectedVersion};
