//! Two-phase synchronization-point handshake.
//!
//! A background process checks two pause points, upstream then downstream,
//! before every command it sends to its sync source. While at least one of
//! them is armed the process cannot run ahead. The handshake lets exactly one
//! command through per step by swapping which point is armed:
//!
//! 1. arm downstream, disarm upstream: the process leaves the upstream pause
//!    and stops again at downstream without running anything
//! 2. clear the log so the next pause message is fresh
//! 3. arm upstream, disarm downstream: the process runs one command and
//!    stops at upstream before the next one
//!
//! At no point are both disarmed, so there is no window in which the process
//! can run more than one command.

use repl_types::paused_message;

/// One step of the handshake, interpreted by the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Set the named failpoint to `alwaysOn`.
    Arm(String),
    /// Set the named failpoint to `off`.
    Disarm(String),
    /// Wait until the node logs that it is paused at the named point.
    /// The wait also ends if the background process finished.
    AwaitPause(String),
    /// Clear the node's in-memory log.
    ClearLog,
}

/// The pair of pause points a controller drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPointPair {
    upstream: String,
    downstream: String,
}

impl SyncPointPair {
    /// Create a pair. `upstream` is the point checked first.
    pub fn new(upstream: impl Into<String>, downstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            downstream: downstream.into(),
        }
    }

    /// The point checked first; forced on at process start.
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// The point checked second.
    pub fn downstream(&self) -> &str {
        &self.downstream
    }

    /// Log line confirming a pause at the upstream point.
    pub fn upstream_paused_message(&self) -> String {
        paused_message(&self.upstream)
    }

    /// Steps that let exactly one command run and pause again upstream.
    ///
    /// Expects the process to be paused at (or about to reach) upstream.
    pub fn advance(&self) -> Vec<HandshakeStep> {
        vec![
            HandshakeStep::Arm(self.downstream.clone()),
            HandshakeStep::Disarm(self.upstream.clone()),
            HandshakeStep::AwaitPause(self.downstream.clone()),
            HandshakeStep::ClearLog,
            HandshakeStep::Arm(self.upstream.clone()),
            HandshakeStep::Disarm(self.downstream.clone()),
            HandshakeStep::AwaitPause(self.upstream.clone()),
        ]
    }

    /// Steps that disarm both points once the process has finished.
    pub fn release(&self) -> Vec<HandshakeStep> {
        vec![
            HandshakeStep::Disarm(self.upstream.clone()),
            HandshakeStep::Disarm(self.downstream.clone()),
        ]
    }
}
