//! Replica-set backend abstraction.
//!
//! Everything the harness does to a cluster goes through [`ReplicaSetBackend`]:
//! process lifecycle, status, failpoints, log inspection, elections, link
//! cuts, writes and reads for consistency checks. The harness never talks to
//! a node any other way.
//!
//! # Example
//!
//! ```ignore
//! let backend = SimReplicaSet::new("rs0", 3, SimConfig::default());
//! backend.start_node(NodeId::new(0), &StartOptions::default()).await?;
//! let status = backend.status(NodeId::new(0)).await?;
//! ```

pub mod sim;

pub use sim::SimReplicaSet;

use async_trait::async_trait;
use repl_core::CollectionSet;
use repl_types::{
    FailPointCommand, MemberSpec, Namespace, NodeId, NodeStatus, OpTime, OplogEntry, StartOptions,
    WriteOp,
};
use std::time::Duration;
use thiserror::Error;

/// Backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No such member.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// Process is not running.
    #[error("{0} is not running")]
    NotRunning(NodeId),

    /// Process is already running.
    #[error("{0} is already running")]
    AlreadyRunning(NodeId),

    /// Write or step-down sent to a node that is not primary.
    #[error("{0} is not primary")]
    NotPrimary(NodeId),

    /// Replica set has not been initiated.
    #[error("replica set is not initiated")]
    NotInitiated,

    /// A command was rejected.
    #[error("{command} failed on {node}: {reason}")]
    CommandFailed {
        /// Target node.
        node: NodeId,
        /// Command name.
        command: &'static str,
        /// Why it failed.
        reason: String,
    },
}

impl BackendError {
    /// Whether retrying later may succeed without harness intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotRunning(_))
    }
}

/// Capabilities the harness needs from a replica set.
///
/// Implementations handle the underlying mechanism (spawned processes with a
/// network bridge, in-process simulation, etc).
#[async_trait]
pub trait ReplicaSetBackend: Send + Sync {
    /// Number of members, fixed for the life of the backend.
    fn node_count(&self) -> usize;

    /// Connection address of a member, for logs and handles.
    fn address(&self, node: NodeId) -> String;

    /// Start a member's process with the given overlay.
    async fn start_node(&self, node: NodeId, options: &StartOptions) -> Result<(), BackendError>;

    /// Stop a member's process. Its data stays.
    async fn stop_node(&self, node: NodeId) -> Result<(), BackendError>;

    /// Delete a stopped member's data.
    async fn wipe_node(&self, node: NodeId) -> Result<(), BackendError>;

    /// Succeeds once the member accepts connections.
    async fn ping(&self, node: NodeId) -> Result<(), BackendError>;

    /// Install the replica-set configuration. Members are indexed by position.
    async fn initiate(&self, members: &[MemberSpec]) -> Result<(), BackendError>;

    /// Current replication status, including the RBID.
    async fn status(&self, node: NodeId) -> Result<NodeStatus, BackendError>;

    /// Change a failpoint's mode.
    async fn configure_failpoint(
        &self,
        node: NodeId,
        command: &FailPointCommand,
    ) -> Result<(), BackendError>;

    /// Number of lines in the member's in-memory log containing `needle`.
    async fn log_count(&self, node: NodeId, needle: &str) -> Result<usize, BackendError>;

    /// Empty the member's in-memory log.
    async fn clear_log(&self, node: NodeId) -> Result<(), BackendError>;

    /// Ask a primary to step down and stay ineligible for `freeze`.
    async fn step_down(&self, node: NodeId, freeze: Duration) -> Result<(), BackendError>;

    /// Ask a member to run for election.
    async fn step_up(&self, node: NodeId) -> Result<(), BackendError>;

    /// Cut the link between two members.
    async fn disconnect(&self, a: NodeId, b: NodeId) -> Result<(), BackendError>;

    /// Restore the link between two members.
    async fn reconnect(&self, a: NodeId, b: NodeId) -> Result<(), BackendError>;

    /// Apply a write on a primary, returning its optime.
    async fn write(&self, node: NodeId, ns: &Namespace, op: WriteOp)
        -> Result<OpTime, BackendError>;

    /// The member's full oplog, oldest first.
    async fn oplog(&self, node: NodeId) -> Result<Vec<OplogEntry>, BackendError>;

    /// Every collection on the member.
    async fn collections(&self, node: NodeId) -> Result<CollectionSet, BackendError>;

    /// Transactions currently open on the member.
    async fn open_transactions(&self, node: NodeId) -> Result<usize, BackendError>;
}
