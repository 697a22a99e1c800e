//! # repl-harness
//!
//! Fault-injection harnesses for replica-set rollback and initial sync.
//!
//! This crate drives a replica set through a [`ReplicaSetBackend`] and turns
//! the pure plans of `repl-core` into cluster operations:
//! - [`ClusterController`] - Process lifecycle, partitions, elections, role waits
//! - [`RollbackController`] - Five-phase rollback cycle with an RBID check
//! - [`InitialSyncController`] - Initial sync paused between every command
//! - [`ConsistencyChecker`] - Oplog, document count and data hash checks
//! - [`wait_until`] - The single bounded polling primitive
//!
//! [`SimReplicaSet`] is an in-process, deterministic backend so every
//! scenario runs under `cargo test`.
//!
//! ## Example
//!
//! ```ignore
//! let config = HarnessConfig::default();
//! let mut rollback = RollbackController::start("demo", None, &config).await?;
//! let node = rollback.transition_to_rollback_operations().await?;
//! rollback.cluster().insert(node, &ns, doc).await?;
//! rollback.transition_to_sync_source_operations_before_rollback().await?;
//! rollback.transition_to_sync_source_operations_during_rollback().await?;
//! rollback.transition_to_steady_state_operations().await?;
//! rollback.stop().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod cluster;
pub mod config;
pub mod consistency;
pub mod error;
pub mod initial_sync;
pub mod poll;
pub mod rollback;
pub mod sync_point;

#[cfg(test)]
mod scenarios;

pub use backend::{BackendError, ReplicaSetBackend, SimReplicaSet};
pub use cluster::{ClusterController, NodeHandle, Topology};
pub use config::{ConfigError, HarnessConfig};
pub use consistency::ConsistencyChecker;
pub use error::HarnessError;
pub use initial_sync::InitialSyncController;
pub use poll::{wait_until, Probe, WaitPolicy};
pub use rollback::RollbackController;
pub use sync_point::{run_handshake, HandshakeOutcome};
