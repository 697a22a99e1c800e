//! In-process replica-set simulator.
//!
//! A deterministic stand-in for a real cluster, with enough replication
//! semantics to make rollback and initial sync observable:
//! - primaries accept writes into a term-stamped oplog
//! - secondaries pull batches from a reachable primary (no chaining)
//! - a primary that cannot see a voting majority steps down after a grace period
//! - elections only happen on request (`step_up`), and need a majority of
//!   voters whose oplog is not ahead of the candidate's
//! - a secondary whose newest entry is unknown to its sync source rolls back
//!   to the common point, refetches touched documents and bumps its RBID
//! - a member started with no data runs initial sync, pausing at the fuzzer
//!   synchronization points
//!
//! Time does not pass on its own. The world advances one tick at the start
//! of every backend request, so a test sees the same history on every run.

mod initial_sync;
mod node;

use std::cmp::Reverse;
use std::time::Duration;

use async_trait::async_trait;
use repl_core::{CollectionSet, Reachability, SyncPointPair};
use repl_types::{
    FailPointCommand, FailPointMode, MemberSpec, MemberState, Namespace, NodeId, NodeStatus,
    OpTime, OplogEntry, OplogOp, ProcessState, StartOptions, WriteOp,
    INITIAL_SYNC_SYNC_POINT_1, INITIAL_SYNC_SYNC_POINT_2, PARAM_INITIAL_SYNC_ATTEMPTS,
};
use tokio::sync::{Mutex, MutexGuard};

use self::initial_sync::InitialSyncTask;
use self::node::{FetchPosition, RamLog, SimNode};
use super::{BackendError, ReplicaSetBackend};
use crate::config::SimConfig;

/// Attempts a member makes when `numInitialSyncAttempts` is not set.
const DEFAULT_INITIAL_SYNC_ATTEMPTS: u32 = 10;

fn admin_ns() -> Namespace {
    Namespace::new("admin", "$cmd")
}

/// Borrow `target` mutably and `source` immutably. The indexes must differ.
fn split_pair(nodes: &mut [SimNode], target: usize, source: usize) -> (&mut SimNode, &SimNode) {
    if target < source {
        let (left, right) = nodes.split_at_mut(source);
        (&mut left[target], &right[0])
    } else {
        let (left, right) = nodes.split_at_mut(target);
        (&mut right[0], &left[source])
    }
}

/// Simulated replica set.
#[derive(Debug)]
pub struct SimReplicaSet {
    name: String,
    node_count: usize,
    config: SimConfig,
    sync_points: SyncPointPair,
    state: Mutex<SimState>,
}

#[derive(Debug)]
struct SimState {
    nodes: Vec<SimNode>,
    network: Reachability,
    tick: u64,
    initiated: bool,
}

impl SimState {
    fn new(node_count: usize, config: &SimConfig) -> Self {
        // node ids are a u8, so members past the 256th are never created
        let nodes = (0..=u8::MAX)
            .take(node_count)
            .map(|i| SimNode::new(NodeId::new(i), config.log_capacity))
            .collect();
        Self {
            nodes,
            network: Reachability::new(),
            tick: 0,
            initiated: false,
        }
    }

    fn index(&self, node: NodeId) -> Result<usize, BackendError> {
        if node.index() < self.nodes.len() {
            Ok(node.index())
        } else {
            Err(BackendError::UnknownNode(node))
        }
    }

    fn running(&self, node: NodeId) -> Result<&SimNode, BackendError> {
        let n = &self.nodes[self.index(node)?];
        if n.is_running() {
            Ok(n)
        } else {
            Err(BackendError::NotRunning(node))
        }
    }

    fn running_mut(&mut self, node: NodeId) -> Result<&mut SimNode, BackendError> {
        let idx = self.index(node)?;
        let n = &mut self.nodes[idx];
        if n.is_running() {
            Ok(n)
        } else {
            Err(BackendError::NotRunning(node))
        }
    }

    fn voter_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.member.is_voter()).count()
    }

    fn has_majority(&self, idx: usize) -> bool {
        let id = self.nodes[idx].id;
        let reachable = self
            .nodes
            .iter()
            .filter(|n| n.member.is_voter() && n.is_running() && self.network.can_reach(id, n.id))
            .count();
        2 * reachable > self.voter_count()
    }

    /// Reachable running primary with the highest term.
    fn sync_source(&self, idx: usize) -> Option<usize> {
        let id = self.nodes[idx].id;
        self.nodes
            .iter()
            .enumerate()
            .filter(|(j, n)| {
                *j != idx
                    && n.is_running()
                    && n.state == MemberState::Primary
                    && self.network.can_reach(id, n.id)
            })
            .max_by_key(|(_, n)| n.term)
            .map(|(j, _)| j)
    }

    fn tick(&mut self, config: &SimConfig) {
        self.tick += 1;
        if !self.initiated {
            return;
        }
        self.check_primaries(config);
        for idx in 0..self.nodes.len() {
            self.replicate(idx, config);
        }
        for idx in 0..self.nodes.len() {
            self.advance_initial_sync(idx, config);
        }
    }

    fn check_primaries(&mut self, config: &SimConfig) {
        for idx in 0..self.nodes.len() {
            let node = &self.nodes[idx];
            if !node.is_running() || node.state != MemberState::Primary {
                continue;
            }
            let newer_term = self.nodes.iter().any(|other| {
                other.is_running()
                    && other.term > node.term
                    && self.network.can_reach(node.id, other.id)
            });
            let majority = self.has_majority(idx);

            let node = &mut self.nodes[idx];
            if newer_term {
                node.step_down("saw a newer term");
            } else if majority {
                node.ticks_without_majority = 0;
            } else {
                node.ticks_without_majority += 1;
                if node.ticks_without_majority >= config.stepdown_grace_ticks {
                    node.step_down("can no longer see a majority of voters");
                }
            }
        }
    }

    fn replicate(&mut self, idx: usize, config: &SimConfig) {
        let node = &self.nodes[idx];
        let replicating = matches!(
            node.state,
            MemberState::Secondary | MemberState::Rollback | MemberState::Recovering
        );
        if !node.is_running() || node.member.arbiter || node.initial_sync.is_some() || !replicating {
            return;
        }
        let Some(source) = self.sync_source(idx) else {
            return;
        };
        let batch = node.batch_limit(config.apply_batch_size);

        let (node, source) = split_pair(&mut self.nodes, idx, source);
        if node.state == MemberState::Rollback {
            node.finish_rollback(source);
            return;
        }
        match node.fetch_position(source) {
            FetchPosition::UpToDate => {}
            FetchPosition::From(start) => {
                let end = (start + batch).min(source.oplog.len());
                for entry in &source.oplog[start..end] {
                    node.replicate(entry);
                }
                if node.state == MemberState::Recovering {
                    node.state = MemberState::Secondary;
                }
            }
            FetchPosition::Diverged => {
                if node.common_point(source).is_some() {
                    node.state = MemberState::Rollback;
                    node.log(format!(
                        "starting rollback: newest entry not found on sync source {}",
                        source.id
                    ));
                } else {
                    node.enter_recovering("no common point with the sync source");
                }
            }
        }
    }

    fn initiate(&mut self, members: &[MemberSpec]) -> Result<(), BackendError> {
        let fail = |reason: String| BackendError::CommandFailed {
            node: NodeId::new(0),
            command: "replSetInitiate",
            reason,
        };
        if self.initiated {
            return Err(fail("already initialized".to_string()));
        }
        if members.len() != self.nodes.len() {
            return Err(fail(format!(
                "expected {} members, got {}",
                self.nodes.len(),
                members.len()
            )));
        }
        for (node, spec) in self.nodes.iter_mut().zip(members) {
            node.member = *spec;
        }
        let primary = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_running() && n.member.is_data_bearing() && n.priority() > 0)
            .max_by_key(|(i, n)| (n.priority(), Reverse(*i)))
            .map(|(i, _)| i)
            .ok_or_else(|| fail("no electable member is running".to_string()))?;

        let seed = OplogEntry {
            optime: OpTime::new(1, 1),
            ns: admin_ns(),
            op: OplogOp::Noop {
                msg: "initiating set".to_string(),
            },
        };
        for node in self.nodes.iter_mut().filter(|n| n.is_running()) {
            node.term = 1;
            if node.member.arbiter {
                node.state = MemberState::Arbiter;
            } else {
                node.oplog = vec![seed.clone()];
                node.state = MemberState::Secondary;
            }
            node.log("replica set initiated");
        }
        let node = &mut self.nodes[primary];
        node.state = MemberState::Primary;
        node.log("transition to PRIMARY");
        self.initiated = true;
        Ok(())
    }

    fn start_node(
        &mut self,
        node: NodeId,
        options: &StartOptions,
        config: &SimConfig,
        sync_points: &SyncPointPair,
    ) -> Result<(), BackendError> {
        let idx = self.index(node)?;
        let initiated = self.initiated;
        let n = &mut self.nodes[idx];
        if n.is_running() {
            return Err(BackendError::AlreadyRunning(node));
        }

        n.process = ProcessState::Running;
        n.log = RamLog::new(config.log_capacity);
        n.failpoints.clear();
        if let Some(name) = &options.forced_failpoint {
            n.failpoints.insert(name.clone(), FailPointMode::AlwaysOn);
        }
        n.params = options.extra_set_parameters.clone();
        n.priority_override = options.priority;
        n.ticks_without_majority = 0;
        n.frozen_until = 0;
        n.open_transactions = 0;
        n.log("process started");

        n.state = if !initiated {
            MemberState::Startup
        } else if n.member.arbiter {
            MemberState::Arbiter
        } else if n.oplog.is_empty() {
            let attempts = options
                .parameter_u64(PARAM_INITIAL_SYNC_ATTEMPTS)
                .map_or(DEFAULT_INITIAL_SYNC_ATTEMPTS, |a| {
                    u32::try_from(a).unwrap_or(u32::MAX)
                });
            n.initial_sync = Some(InitialSyncTask::new(attempts, sync_points.clone()));
            n.log("initial sync starting");
            MemberState::Startup2
        } else {
            MemberState::Secondary
        };
        Ok(())
    }

    fn step_up(&mut self, node: NodeId) -> Result<(), BackendError> {
        let fail = |reason: String| BackendError::CommandFailed {
            node,
            command: "replSetStepUp",
            reason,
        };
        if !self.initiated {
            return Err(BackendError::NotInitiated);
        }
        let idx = self.index(node)?;
        let candidate = self.running(node)?;
        if candidate.state == MemberState::Primary {
            return Ok(());
        }
        if candidate.member.arbiter {
            return Err(fail("arbiters cannot become primary".to_string()));
        }
        if candidate.state != MemberState::Secondary {
            return Err(fail(format!("member is in state {}", candidate.state)));
        }
        if candidate.priority() == 0 {
            return Err(fail("member has priority 0".to_string()));
        }
        if candidate.frozen_until > self.tick {
            return Err(fail(format!(
                "member is frozen for {} more ticks",
                candidate.frozen_until - self.tick
            )));
        }

        let last = candidate.last_optime();
        let voters = self.voter_count();
        let votes = self
            .nodes
            .iter()
            .filter(|n| n.member.is_voter() && n.is_running() && self.network.can_reach(node, n.id))
            .filter(|n| n.member.arbiter || n.last_optime() <= last)
            .count();
        if 2 * votes <= voters {
            return Err(fail(format!("received {votes} of {voters} votes")));
        }

        let term = self
            .nodes
            .iter()
            .filter(|n| n.is_running() && self.network.can_reach(node, n.id))
            .map(|n| n.term)
            .max()
            .unwrap_or(0)
            + 1;
        let network = &self.network;
        for other in self
            .nodes
            .iter_mut()
            .filter(|n| n.id != node && n.is_running() && network.can_reach(node, n.id))
        {
            if other.state == MemberState::Primary {
                other.step_down("a newer term started");
            }
            other.term = other.term.max(term);
        }

        let n = &mut self.nodes[idx];
        n.term = term;
        n.state = MemberState::Primary;
        let entry = OplogEntry {
            optime: OpTime::new(term, n.next_index()),
            ns: admin_ns(),
            op: OplogOp::Noop {
                msg: "new primary".to_string(),
            },
        };
        n.oplog.push(entry);
        n.log(format!("election succeeded, assuming primary role in term {term}"));
        Ok(())
    }

    fn write(&mut self, node: NodeId, ns: &Namespace, op: WriteOp) -> Result<OpTime, BackendError> {
        let n = self.running_mut(node)?;
        if n.state != MemberState::Primary {
            return Err(BackendError::NotPrimary(node));
        }
        let exists = n
            .data
            .get(ns)
            .is_some_and(|coll| coll.contains_key(op.doc_id()));
        let rejection = match &op {
            WriteOp::Insert(doc) if exists => Some(format!("duplicate key {} in {ns}", doc.id)),
            WriteOp::Update(doc) if !exists => Some(format!("no document {} in {ns}", doc.id)),
            WriteOp::Delete(id) if !exists => Some(format!("no document {id} in {ns}")),
            _ => None,
        };
        if let Some(reason) = rejection {
            return Err(BackendError::CommandFailed {
                node,
                command: "write",
                reason,
            });
        }

        let entry = OplogEntry {
            optime: OpTime::new(n.term, n.next_index()),
            ns: ns.clone(),
            op: op.into(),
        };
        n.apply(&entry);
        let optime = entry.optime;
        n.oplog.push(entry);
        Ok(optime)
    }
}

impl SimReplicaSet {
    /// Create a simulated set of `node_count` members, none of them started.
    ///
    /// Initial sync pauses at [`INITIAL_SYNC_SYNC_POINT_1`] and
    /// [`INITIAL_SYNC_SYNC_POINT_2`] unless renamed with
    /// [`with_sync_points`](Self::with_sync_points).
    pub fn new(name: impl Into<String>, node_count: usize, config: SimConfig) -> Self {
        let state = SimState::new(node_count, &config);
        Self {
            name: name.into(),
            node_count,
            config,
            sync_points: SyncPointPair::new(INITIAL_SYNC_SYNC_POINT_1, INITIAL_SYNC_SYNC_POINT_2),
            state: Mutex::new(state),
        }
    }

    /// Pause initial sync at `points` instead of the default pair.
    pub fn with_sync_points(mut self, points: SyncPointPair) -> Self {
        self.sync_points = points;
        self
    }

    /// Replica-set name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a transaction on a member.
    pub async fn begin_transaction(&self, node: NodeId) -> Result<(), BackendError> {
        let mut state = self.advance().await;
        state.running_mut(node)?.open_transactions += 1;
        Ok(())
    }

    /// Commit one open transaction on a member.
    pub async fn commit_transaction(&self, node: NodeId) -> Result<(), BackendError> {
        let mut state = self.advance().await;
        let n = state.running_mut(node)?;
        n.open_transactions = n.open_transactions.saturating_sub(1);
        Ok(())
    }

    /// Snapshot of the simulated network's cut links.
    pub async fn network(&self) -> Reachability {
        self.state.lock().await.network.clone()
    }

    async fn advance(&self) -> MutexGuard<'_, SimState> {
        let mut state = self.state.lock().await;
        state.tick(&self.config);
        state
    }

    fn freeze_ticks(&self, freeze: Duration) -> u64 {
        let millis = u64::try_from(freeze.as_millis()).unwrap_or(u64::MAX);
        millis.saturating_mul(u64::from(self.config.ticks_per_second)) / 1000
    }
}

#[async_trait]
impl ReplicaSetBackend for SimReplicaSet {
    fn node_count(&self) -> usize {
        self.node_count
    }

    fn address(&self, node: NodeId) -> String {
        format!("sim://{}/{}", self.name, node)
    }

    async fn start_node(&self, node: NodeId, options: &StartOptions) -> Result<(), BackendError> {
        let mut state = self.advance().await;
        state.start_node(node, options, &self.config, &self.sync_points)
    }

    async fn stop_node(&self, node: NodeId) -> Result<(), BackendError> {
        let mut state = self.advance().await;
        let n = state.running_mut(node)?;
        n.process = ProcessState::Stopped;
        n.state = MemberState::Down;
        n.initial_sync = None;
        n.failpoints.clear();
        n.open_transactions = 0;
        Ok(())
    }

    async fn wipe_node(&self, node: NodeId) -> Result<(), BackendError> {
        let mut state = self.advance().await;
        let idx = state.index(node)?;
        let n = &mut state.nodes[idx];
        if n.is_running() {
            return Err(BackendError::CommandFailed {
                node,
                command: "wipe",
                reason: "process is still running".to_string(),
            });
        }
        n.wipe();
        Ok(())
    }

    async fn ping(&self, node: NodeId) -> Result<(), BackendError> {
        let state = self.advance().await;
        state.running(node).map(|_| ())
    }

    async fn initiate(&self, members: &[MemberSpec]) -> Result<(), BackendError> {
        let mut state = self.advance().await;
        state.initiate(members)
    }

    async fn status(&self, node: NodeId) -> Result<NodeStatus, BackendError> {
        let state = self.advance().await;
        Ok(state.running(node)?.status())
    }

    async fn configure_failpoint(
        &self,
        node: NodeId,
        command: &FailPointCommand,
    ) -> Result<(), BackendError> {
        let mut state = self.advance().await;
        state
            .running_mut(node)?
            .failpoints
            .insert(command.name.clone(), command.mode);
        Ok(())
    }

    async fn log_count(&self, node: NodeId, needle: &str) -> Result<usize, BackendError> {
        let state = self.advance().await;
        Ok(state.running(node)?.log.count(needle))
    }

    async fn clear_log(&self, node: NodeId) -> Result<(), BackendError> {
        let mut state = self.advance().await;
        state.running_mut(node)?.log.clear();
        Ok(())
    }

    async fn step_down(&self, node: NodeId, freeze: Duration) -> Result<(), BackendError> {
        let freeze_ticks = self.freeze_ticks(freeze);
        let mut state = self.advance().await;
        let tick = state.tick;
        let n = state.running_mut(node)?;
        if n.state != MemberState::Primary {
            return Err(BackendError::NotPrimary(node));
        }
        n.step_down("replSetStepDown requested");
        n.frozen_until = tick + freeze_ticks;
        Ok(())
    }

    async fn step_up(&self, node: NodeId) -> Result<(), BackendError> {
        let mut state = self.advance().await;
        state.step_up(node)
    }

    async fn disconnect(&self, a: NodeId, b: NodeId) -> Result<(), BackendError> {
        let mut state = self.advance().await;
        state.index(a)?;
        state.index(b)?;
        state.network.cut(a, b);
        Ok(())
    }

    async fn reconnect(&self, a: NodeId, b: NodeId) -> Result<(), BackendError> {
        let mut state = self.advance().await;
        state.index(a)?;
        state.index(b)?;
        state.network.heal(a, b);
        Ok(())
    }

    async fn write(
        &self,
        node: NodeId,
        ns: &Namespace,
        op: WriteOp,
    ) -> Result<OpTime, BackendError> {
        let mut state = self.advance().await;
        state.write(node, ns, op)
    }

    async fn oplog(&self, node: NodeId) -> Result<Vec<OplogEntry>, BackendError> {
        let state = self.advance().await;
        Ok(state.running(node)?.oplog.clone())
    }

    async fn collections(&self, node: NodeId) -> Result<CollectionSet, BackendError> {
        let state = self.advance().await;
        Ok(state.running(node)?.collections())
    }

    async fn open_transactions(&self, node: NodeId) -> Result<usize, BackendError> {
        let state = self.advance().await;
        Ok(state.running(node)?.open_transactions)
    }
}
