//! Member configuration and reported status.

use crate::error::TypesError;
use crate::ids::{NodeId, OpTime, Rbid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Replication state a member reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberState {
    /// Process is up but the member has no replica-set config yet.
    Startup,
    /// Accepting writes.
    Primary,
    /// Replicating from a primary.
    Secondary,
    /// Not yet able to serve reads, e.g. after an unrecoverable divergence.
    Recovering,
    /// Running initial sync.
    Startup2,
    /// State could not be determined.
    Unknown,
    /// Voting-only member without data.
    Arbiter,
    /// Process is not running.
    Down,
    /// Undoing operations that diverged from the sync source.
    Rollback,
    /// No longer part of the configuration.
    Removed,
}

impl MemberState {
    /// The role this state maps to in a node handle.
    pub fn role(self) -> Role {
        match self {
            Self::Primary => Role::Primary,
            Self::Secondary => Role::Secondary,
            Self::Arbiter => Role::Arbiter,
            _ => Role::Unknown,
        }
    }

    /// Name as the node reports it.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "STARTUP",
            Self::Primary => "PRIMARY",
            Self::Secondary => "SECONDARY",
            Self::Recovering => "RECOVERING",
            Self::Startup2 => "STARTUP2",
            Self::Unknown => "UNKNOWN",
            Self::Arbiter => "ARBITER",
            Self::Down => "DOWN",
            Self::Rollback => "ROLLBACK",
            Self::Removed => "REMOVED",
        }
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberState {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s {
            "STARTUP" => Self::Startup,
            "PRIMARY" => Self::Primary,
            "SECONDARY" => Self::Secondary,
            "RECOVERING" => Self::Recovering,
            "STARTUP2" => Self::Startup2,
            "UNKNOWN" => Self::Unknown,
            "ARBITER" => Self::Arbiter,
            "DOWN" => Self::Down,
            "ROLLBACK" => Self::Rollback,
            "REMOVED" => Self::Removed,
            other => return Err(TypesError::InvalidMemberState(other.to_string())),
        };
        Ok(state)
    }
}

/// Role of a node as last observed by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Accepting writes.
    Primary,
    /// Replicating.
    Secondary,
    /// Voting only.
    Arbiter,
    /// Anything else, including not yet observed.
    Unknown,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Arbiter => "arbiter",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Lifecycle of the process behind a node handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    /// Never started.
    NotStarted,
    /// Started and not yet stopped.
    Running,
    /// Stopped (data may still be on disk).
    Stopped,
}

/// One member's entry in the replica-set configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSpec {
    /// Voting-only member without data.
    pub arbiter: bool,
    /// Election priority; 0 means never eligible for primary.
    pub priority: u32,
    /// Number of votes (0 or 1).
    pub votes: u32,
}

impl MemberSpec {
    /// A data-bearing, voting, electable member.
    pub const fn data() -> Self {
        Self {
            arbiter: false,
            priority: 1,
            votes: 1,
        }
    }

    /// A data-bearing member that never votes and is never elected.
    pub const fn passive() -> Self {
        Self {
            arbiter: false,
            priority: 0,
            votes: 0,
        }
    }

    /// A voting member without data.
    pub const fn arbiter() -> Self {
        Self {
            arbiter: true,
            priority: 0,
            votes: 1,
        }
    }

    /// Whether this member holds a copy of the data.
    pub fn is_data_bearing(&self) -> bool {
        !self.arbiter
    }

    /// Whether this member takes part in elections.
    pub fn is_voter(&self) -> bool {
        self.votes > 0
    }
}

/// Status reported by a running node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Reporting node.
    pub node: NodeId,
    /// Replication state.
    pub state: MemberState,
    /// Highest election term the node has seen.
    pub term: u64,
    /// Rollback id.
    pub rbid: Rbid,
    /// Optime of the last applied oplog entry, if any.
    pub last_applied: Option<OpTime>,
}

impl NodeStatus {
    /// One-line summary used as the "last observed" value of a timed-out wait.
    pub fn summary(&self) -> String {
        let applied = self
            .last_applied
            .map_or_else(|| "none".to_string(), |optime| optime.to_string());
        format!(
            "{} state={} term={} rbid={} last_applied={}",
            self.node, self.state, self.term, self.rbid, applied
        )
    }
}
