//! Stream versions and write preconditions.
//!
//! An [`AggregateVersion`] is the position of the last committed event in a
//! stream, or [`AggregateVersion::DOES_NOT_EXIST`] for a stream with no
//! events. An [`ExpectedVersion`] is what a caller asserts about the stream
//! before writing to it.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Version of an event stream: the last committed position, or `-1` when the
/// stream has no events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct AggregateVersion(i64);

impl AggregateVersion {
    /// Sentinel for a stream that holds no events.
    pub const DOES_NOT_EXIST: Self = Self(-1);

    /// Creates a version from its raw value.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidVersion` for negative values other than
    /// the `-1` sentinel.
    pub fn new(value: i64) -> Result<Self, DomainError> {
        if value < Self::DOES_NOT_EXIST.0 {
            return Err(DomainError::InvalidVersion(value));
        }
        Ok(Self(value))
    }

    /// Version of a stream holding `count` events.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn from_event_count(count: usize) -> Self {
        Self(count as i64 - 1)
    }

    /// Whether at least one event has been committed.
    #[must_use]
    pub fn exists(self) -> bool {
        self.0 >= 0
    }

    /// The raw value (`-1` for a missing stream).
    #[must_use]
    pub fn value(self) -> i64 {
        self.0
    }

    /// Position the next appended event will occupy.
    #[must_use]
    pub fn next_position(self) -> i64 {
        self.0 + 1
    }

    /// Version after `count` more events have been appended.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn advanced_by(self, count: usize) -> Self {
        Self(self.0 + count as i64)
    }
}

impl TryFrom<i64> for AggregateVersion {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AggregateVersion> for i64 {
    fn from(version: AggregateVersion) -> Self {
        version.0
    }
}

impl fmt::Display for AggregateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exists() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("does-not-exist")
        }
    }
}

/// Precondition a caller places on a stream before writing to it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum ExpectedVersion {
    /// The stream must not exist yet.
    None,
    /// No exact check; append after whatever the caller retrieved.
    Any,
    /// The stream must currently be at exactly this version.
    Exact(AggregateVersion),
}

impl ExpectedVersion {
    /// Raw encoding of [`ExpectedVersion::None`].
    pub const NONE_RAW: i64 = -1;
    /// Raw encoding of [`ExpectedVersion::Any`].
    pub const ANY_RAW: i64 = -2;

    /// Expects the stream to be at exactly `version`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidVersion` if `version` is negative.
    pub fn exact(version: i64) -> Result<Self, DomainError> {
        if version < 0 {
            return Err(DomainError::InvalidVersion(version));
        }
        Ok(Self::Exact(AggregateVersion(version)))
    }

    /// Decodes the raw representation: `-1` is `None`, `-2` is `Any`, and
    /// non-negative values are `Exact`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidVersion` for any other negative value.
    pub fn from_raw(raw: i64) -> Result<Self, DomainError> {
        match raw {
            Self::NONE_RAW => Ok(Self::None),
            Self::ANY_RAW => Ok(Self::Any),
            other => Self::exact(other),
        }
    }

    /// Raw representation, the inverse of [`ExpectedVersion::from_raw`].
    #[must_use]
    pub fn to_raw(self) -> i64 {
        match self {
            Self::None => Self::NONE_RAW,
            Self::Any => Self::ANY_RAW,
            Self::Exact(version) => version.value(),
        }
    }
}

impl PartialEq for ExpectedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.to_raw() == other.to_raw()
    }
}

impl Eq for ExpectedVersion {}

impl PartialOrd for ExpectedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExpectedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_raw().cmp(&other.to_raw())
    }
}

impl TryFrom<i64> for ExpectedVersion {
    type Error = DomainError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::from_raw(raw)
    }
}

impl From<ExpectedVersion> for i64 {
    fn from(expected: ExpectedVersion) -> Self {
        expected.to_raw()
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Any => f.write_str("any"),
            Self::Exact(version) => write!(f, "{version}"),
        }
    }
}
