//! Identity and ordering types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a member within its replica set.
///
/// Members are numbered in configuration order, displayed as `node-<n>`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u8);

impl NodeId {
    /// Create a NodeId from a member index.
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    /// The member index as a `usize`, for indexing node tables.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Position of an operation in the replicated log.
///
/// Ordered by term first, then index. Indexes keep increasing across terms,
/// so two entries with the same optime are the same write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpTime {
    /// Election term the write was accepted in.
    pub term: u64,
    /// Log index of the write.
    pub index: u64,
}

impl OpTime {
    /// Create an OpTime.
    pub const fn new(term: u64, index: u64) -> Self {
        Self { term, index }
    }
}

impl fmt::Display for OpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.term, self.index)
    }
}

/// Rollback id.
///
/// An opaque per-node counter. It increments by exactly one each time the
/// node completes a rollback, which makes it the only reliable signal that a
/// rollback actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rbid(u64);

impl Rbid {
    /// The RBID a freshly created node starts with.
    pub const INITIAL: Self = Self(1);

    /// Create an Rbid from a raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw value.
    pub fn value(self) -> u64 {
        self.0
    }

    /// The RBID after one more completed rollback.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Rbid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
