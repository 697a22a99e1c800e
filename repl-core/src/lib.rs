//! # repl-core
//!
//! Pure logic for faultline (no I/O, instant tests).
//!
//! This crate holds the decisions of the fault-injection harness without
//! touching a cluster, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`state`]: controller state machines and their transition tables
//! - [`reachability`]: the symmetric "who can talk to whom" relation
//! - [`sync_point`]: the ordered failpoint handshake that lets exactly one
//!   background command run per step
//! - [`consistency`]: oplog and collection comparison with diagnostic diffs
//! - [`poll`]: bounded backoff for polling loops
//!
//! The actual I/O is performed by `repl-harness`, which interprets the plans
//! and verdicts produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod consistency;
pub mod poll;
pub mod reachability;
pub mod state;
pub mod sync_point;

pub use consistency::{
    compare_collection_counts, compare_collections, compare_oplogs, digest_collection,
    CollectionDigest, CollectionSet, Divergence, NodeOplog,
};
pub use poll::PollSchedule;
pub use reachability::Reachability;
pub use state::{ControllerState, IllegalTransition, InitialSyncState, RollbackState, StateMachine};
pub use sync_point::{HandshakeStep, SyncPointPair};
