//! Revision numbers for the task list and individual tasks
//!
//! A revision is an opaque, strictly increasing counter. It crosses the
//! service boundary as the decimal encoding of the number, both as an
//! optimistic-concurrency token ("I last saw revision R") and as a causal
//! ordering device.

use crate::error::{CtlError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A task-list or task revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(u64);

impl Revision {
    /// The revision of a registry that has never been mutated
    pub const ZERO: Revision = Revision(0);

    /// Create a revision from its number
    pub fn new(number: u64) -> Self {
        Self(number)
    }

    /// Get the revision number
    pub fn number(&self) -> u64 {
        self.0
    }

    /// Encode as the opaque byte string handed to callers
    pub fn encode(&self) -> Vec<u8> {
        self.0.to_string().into_bytes()
    }

    /// Decode a caller-supplied revision.
    ///
    /// Anything other than a non-empty run of ASCII digits that fits in a
    /// `u64` is rejected; a malformed revision is never read as zero.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let invalid = |reason: &str| CtlError::InvalidRevision {
            input: String::from_utf8_lossy(bytes).into_owned(),
            reason: reason.to_string(),
        };

        if bytes.is_empty() {
            return Err(invalid("empty revision"));
        }
        if !bytes.iter().all(u8::is_ascii_digit) {
            return Err(invalid("expected decimal digits"));
        }

        let text = std::str::from_utf8(bytes).map_err(|e| invalid(&e.to_string()))?;
        text.parse::<u64>()
            .map(Revision)
            .map_err(|e| invalid(&e.to_string()))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Revision {
    type Err = CtlError;

    fn from_str(s: &str) -> Result<Self> {
        Revision::decode(s.as_bytes())
    }
}

impl Serialize for Revision {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Revision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Issues revisions for a single registry.
///
/// The task-list revision and every per-task revision come from the same
/// allocator, so no two mutations ever observe the same number. Callers must
/// hold the owning registry's lock.
#[derive(Debug, Clone)]
pub struct RevisionAllocator {
    next: u64,
}

impl Default for RevisionAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl RevisionAllocator {
    /// Create an allocator whose first revision is 1
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the revision following `prev`.
    ///
    /// Returns `max(prev, last_issued) + 1`, so a stale `prev` (a task whose
    /// own revision lags the registry) still yields a fresh number.
    pub fn allocate(&mut self, prev: Revision) -> Revision {
        let rev = prev.0.saturating_add(1).max(self.next);
        self.next = rev.saturating_add(1);
        Revision(rev)
    }

    /// The most recently issued revision, or zero if none was issued
    pub fn last_issued(&self) -> Revision {
        Revision(self.next - 1)
    }
}
