//! # repl-types
//!
//! Shared types for the faultline replica-set fault-injection harness.
//!
//! This crate provides the vocabulary used across all faultline crates:
//! - [`NodeId`], [`OpTime`], [`Rbid`] - Identity and ordering types
//! - [`MemberState`], [`Role`], [`ProcessState`], [`NodeStatus`] - What a node reports
//! - [`Namespace`], [`Document`], [`OplogEntry`] - Replicated data
//! - [`FailPointCommand`], [`StartOptions`] - Knobs the harness turns on a node
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod document;
mod error;
mod failpoint;
mod ids;
mod member;

pub use document::{DocId, Document, Namespace, OplogEntry, OplogOp, WriteOp};
pub use error::TypesError;
pub use failpoint::{
    paused_message, FailPointCommand, FailPointMode, StartOptions, INITIAL_SYNC_SYNC_POINT_1,
    INITIAL_SYNC_SYNC_POINT_2, PARAM_BATCH_LIMIT_OPERATIONS, PARAM_INITIAL_SYNC_ATTEMPTS,
};
pub use ids::{NodeId, OpTime, Rbid};
pub use member::{MemberSpec, MemberState, NodeStatus, ProcessState, Role};
