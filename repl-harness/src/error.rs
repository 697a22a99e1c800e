//! Error types for the harness.

use std::time::Duration;
use thiserror::Error;

use crate::backend::BackendError;
use crate::config::ConfigError;
use repl_core::{Divergence, IllegalTransition};
use repl_types::{NodeId, TypesError};

/// Errors that can occur while driving a fault-injection scenario.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A controller method was called out of order.
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    /// A wait did not see its condition before the deadline.
    #[error("timed out after {waited:?} waiting for {what}; last observed: {last_observed}")]
    Timeout {
        /// What was awaited.
        what: String,
        /// How long the wait ran.
        waited: Duration,
        /// The last status the probe reported.
        last_observed: String,
    },

    /// A post-condition the harness relies on does not hold.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Nodes disagree on replicated data.
    #[error("data inconsistency: {0}")]
    Inconsistent(#[from] Divergence),

    /// The cluster does not have the shape a controller needs.
    #[error("unsupported topology: {0}")]
    Topology(String),

    /// Node id is not a member of this cluster.
    #[error("{0} is not a member of this cluster")]
    UnknownNode(NodeId),

    /// Cutting or healing one link failed part-way through a topology change.
    #[error("failed to change link {node} <-> {peer}: {source}")]
    Partition {
        /// Node being isolated or reconnected.
        node: NodeId,
        /// Peer whose link failed.
        peer: NodeId,
        /// Backend failure.
        source: BackendError,
    },

    /// Backend request failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Shared type error.
    #[error("types error: {0}")]
    Types(#[from] TypesError),
}

impl HarnessError {
    /// Whether a wait should keep polling after this error.
    ///
    /// Only backend failures that clear up on their own qualify, e.g. a node
    /// that is still restarting.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(e) if e.is_transient())
    }
}
