//! Controller state machines.
//!
//! Each fault-injection controller owns one [`StateMachine`] over a closed
//! state enum. The enum's transition table is the single source of truth for
//! which operation may follow which; the controllers ask it before touching
//! the cluster and commit the new state only after their work succeeded.
//!
//! A rejected transition never changes the current state.

use std::fmt;
use thiserror::Error;

/// A transition that is not in the machine's table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal {machine} transition: {from} -> {to}")]
pub struct IllegalTransition {
    /// Which machine rejected the request.
    pub machine: &'static str,
    /// State the machine was in.
    pub from: &'static str,
    /// Requested state.
    pub to: &'static str,
}

/// A closed set of controller states with a fixed transition table.
pub trait ControllerState: Copy + Eq + fmt::Debug + 'static {
    /// Machine name used in errors and logs.
    const MACHINE: &'static str;

    /// Every state, in declaration order.
    fn all() -> &'static [Self];

    /// States reachable from `self` in one transition.
    fn successors(self) -> &'static [Self];

    /// Stable state name.
    fn name(self) -> &'static str;
}

/// Holds the current state of one controller.
#[derive(Debug, Clone)]
pub struct StateMachine<S> {
    current: S,
}

impl<S: ControllerState> StateMachine<S> {
    /// Start in `initial`.
    pub fn new(initial: S) -> Self {
        Self { current: initial }
    }

    /// The current state.
    pub fn current(&self) -> S {
        self.current
    }

    /// Whether `to` is in the table for the current state.
    pub fn can_transition(&self, to: S) -> bool {
        self.current.successors().contains(&to)
    }

    /// Fail if `to` is not a legal next state. Does not mutate.
    pub fn ensure(&self, to: S) -> Result<(), IllegalTransition> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(IllegalTransition {
                machine: S::MACHINE,
                from: self.current.name(),
                to: to.name(),
            })
        }
    }

    /// Move to `to`, returning the previous state.
    pub fn transition(&mut self, to: S) -> Result<S, IllegalTransition> {
        self.ensure(to)?;
        let previous = self.current;
        self.current = to;
        Ok(previous)
    }
}

/// Phases of a rollback scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollbackState {
    /// Every node connected; the cluster is healthy.
    SteadyStateOps,
    /// Primary cut off from the secondary; writes here will be rolled back.
    RollbackOps,
    /// Old secondary elected; rollback node still isolated.
    SyncSourceOpsBeforeRollback,
    /// Rollback node reconnected and rolling back.
    SyncSourceOpsDuringRollback,
    /// Torn down.
    Stopped,
}

impl ControllerState for RollbackState {
    const MACHINE: &'static str = "rollback";

    fn all() -> &'static [Self] {
        &[
            Self::SteadyStateOps,
            Self::RollbackOps,
            Self::SyncSourceOpsBeforeRollback,
            Self::SyncSourceOpsDuringRollback,
            Self::Stopped,
        ]
    }

    fn successors(self) -> &'static [Self] {
        match self {
            Self::SteadyStateOps => &[Self::RollbackOps, Self::Stopped],
            Self::RollbackOps => &[Self::SyncSourceOpsBeforeRollback],
            // The direct edge to SteadyStateOps skips the explicit reconnect
            // phase; the controller reconnects on the caller's behalf.
            Self::SyncSourceOpsBeforeRollback => {
                &[Self::SyncSourceOpsDuringRollback, Self::SteadyStateOps]
            }
            Self::SyncSourceOpsDuringRollback => &[Self::SteadyStateOps],
            Self::Stopped => &[],
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::SteadyStateOps => "SteadyStateOps",
            Self::RollbackOps => "RollbackOps",
            Self::SyncSourceOpsBeforeRollback => "SyncSourceOpsBeforeRollback",
            Self::SyncSourceOpsDuringRollback => "SyncSourceOpsDuringRollback",
            Self::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for RollbackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Phases of an initial-sync scenario. Strictly linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitialSyncState {
    /// Syncing node still holds its original data.
    BeforeInitialSync,
    /// Syncing node wiped and paused between sync-source commands.
    DuringInitialSync,
    /// Syncing node reached SECONDARY.
    InitialSyncCompleted,
    /// Torn down.
    Stopped,
}

impl ControllerState for InitialSyncState {
    const MACHINE: &'static str = "initial sync";

    fn all() -> &'static [Self] {
        &[
            Self::BeforeInitialSync,
            Self::DuringInitialSync,
            Self::InitialSyncCompleted,
            Self::Stopped,
        ]
    }

    fn successors(self) -> &'static [Self] {
        match self {
            Self::BeforeInitialSync => &[Self::DuringInitialSync],
            Self::DuringInitialSync => &[Self::InitialSyncCompleted],
            Self::InitialSyncCompleted => &[Self::Stopped],
            Self::Stopped => &[],
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::BeforeInitialSync => "BeforeInitialSync",
            Self::DuringInitialSync => "DuringInitialSync",
            Self::InitialSyncCompleted => "InitialSyncCompleted",
            Self::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for InitialSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
