//! Simulated initial sync.
//!
//! The syncer works through a fixed command sequence against its sync
//! source: record the begin-fetching optime, list collections, clone each
//! collection in batches, then fetch and apply oplog entries up to the
//! source's newest optime at that time. Before every command it checks the
//! set's two synchronization points and pauses while either is armed.

use std::collections::VecDeque;
use std::ops::Bound;

use repl_core::SyncPointPair;
use repl_types::{paused_message, DocId, MemberState, Namespace, OpTime, ProcessState};

use super::node::SimNode;
use super::{split_pair, SimState};
use crate::config::SimConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    BeginFetching,
    ListCollections,
    Clone,
    FetchOplog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncPoint {
    Upstream,
    Downstream,
}

enum Progress {
    Continue,
    Finished,
    Failed(String),
}

#[derive(Debug)]
pub(super) struct InitialSyncTask {
    stage: Stage,
    waiting_at: Option<SyncPoint>,
    begin_fetching: Option<OpTime>,
    stop_at: Option<OpTime>,
    pending_collections: VecDeque<Namespace>,
    clone_after: Option<DocId>,
    attempts_left: u32,
    commands_run: u64,
    points: SyncPointPair,
}

impl InitialSyncTask {
    pub(super) fn new(attempts: u32, points: SyncPointPair) -> Self {
        Self {
            stage: Stage::BeginFetching,
            waiting_at: None,
            begin_fetching: None,
            stop_at: None,
            pending_collections: VecDeque::new(),
            clone_after: None,
            attempts_left: attempts.max(1),
            commands_run: 0,
            points,
        }
    }

    fn restart_attempt(&mut self) {
        *self = Self::new(self.attempts_left, self.points.clone());
    }

    /// Check both pause points. Returns `true` once the next command may run.
    ///
    /// A syncer released from the downstream point goes straight to its
    /// command; it does not look at the upstream point again.
    fn pass_sync_points(&mut self, node: &mut SimNode) -> bool {
        let upstream = self.points.upstream();
        let downstream = self.points.downstream();
        if self.waiting_at == Some(SyncPoint::Downstream) {
            if node.failpoint_active(downstream) {
                return false;
            }
        } else {
            if node.failpoint_active(upstream) {
                if self.waiting_at != Some(SyncPoint::Upstream) {
                    node.log(paused_message(upstream));
                    self.waiting_at = Some(SyncPoint::Upstream);
                }
                return false;
            }
            if node.failpoint_active(downstream) {
                node.log(paused_message(downstream));
                self.waiting_at = Some(SyncPoint::Downstream);
                return false;
            }
        }
        self.waiting_at = None;
        true
    }

    fn run_command(&mut self, node: &mut SimNode, source: &SimNode, config: &SimConfig) -> Progress {
        self.commands_run += 1;
        match self.stage {
            Stage::BeginFetching => {
                let Some(begin) = source.last_optime() else {
                    return Progress::Failed(format!("sync source {} has an empty oplog", source.id));
                };
                self.begin_fetching = Some(begin);
                self.stage = Stage::ListCollections;
                node.log(format!(
                    "initial sync: syncing from {}, beginFetchingOpTime {begin}",
                    source.id
                ));
                Progress::Continue
            }
            Stage::ListCollections => {
                self.pending_collections = source.data.keys().cloned().collect();
                self.stage = if self.pending_collections.is_empty() {
                    Stage::FetchOplog
                } else {
                    Stage::Clone
                };
                node.log(format!(
                    "initial sync: {} collections to clone",
                    self.pending_collections.len()
                ));
                Progress::Continue
            }
            Stage::Clone => self.clone_batch(node, source, config),
            Stage::FetchOplog => self.fetch_oplog(node, source, config),
        }
    }

    fn clone_batch(&mut self, node: &mut SimNode, source: &SimNode, config: &SimConfig) -> Progress {
        let Some(ns) = self.pending_collections.front().cloned() else {
            self.stage = Stage::FetchOplog;
            return self.fetch_oplog(node, source, config);
        };
        let batch_size = config.clone_batch_size.max(1);
        let lower = match &self.clone_after {
            Some(after) => Bound::Excluded(after.clone()),
            None => Bound::Unbounded,
        };
        let batch: Vec<_> = source
            .data
            .get(&ns)
            .map(|coll| {
                coll.range((lower, Bound::Unbounded))
                    .take(batch_size)
                    .map(|(_, doc)| doc.clone())
                    .collect()
            })
            .unwrap_or_default();

        let target = node.data.entry(ns.clone()).or_default();
        for doc in &batch {
            target.insert(doc.id.clone(), doc.clone());
        }

        if batch.len() < batch_size {
            self.pending_collections.pop_front();
            self.clone_after = None;
            if self.pending_collections.is_empty() {
                self.stage = Stage::FetchOplog;
            }
        } else {
            self.clone_after = batch.last().map(|doc| doc.id.clone());
        }
        node.log(format!("initial sync: cloned {} documents of {ns}", batch.len()));
        Progress::Continue
    }

    fn fetch_oplog(&mut self, node: &mut SimNode, source: &SimNode, config: &SimConfig) -> Progress {
        let Some(begin) = self.begin_fetching else {
            return Progress::Failed("no begin fetching optime recorded".to_string());
        };
        let stop = match (self.stop_at, source.last_optime()) {
            (Some(stop), _) => stop,
            (None, Some(last)) => *self.stop_at.insert(last),
            (None, None) => {
                return Progress::Failed(format!("sync source {} has an empty oplog", source.id))
            }
        };

        let start = match node.oplog.last() {
            None => match source.position_of(begin) {
                Some(pos) => pos,
                None => {
                    return Progress::Failed(format!(
                        "sync source {} no longer has beginFetchingOpTime {begin}",
                        source.id
                    ))
                }
            },
            Some(last) => match source.position_of(last.optime) {
                Some(pos) => pos + 1,
                None => {
                    return Progress::Failed(format!(
                        "oplog of sync source {} diverged during initial sync",
                        source.id
                    ))
                }
            },
        };
        if start >= source.oplog.len() && node.last_optime() < Some(stop) {
            return Progress::Failed(format!(
                "oplog of sync source {} ends before stop optime {stop}",
                source.id
            ));
        }

        let end = (start + node.batch_limit(config.apply_batch_size)).min(source.oplog.len());
        let mut applied = 0;
        for entry in source.oplog[start..end].iter().filter(|e| e.optime <= stop) {
            node.replicate(entry);
            applied += 1;
        }
        node.log(format!("initial sync: applied {applied} oplog entries"));

        if node.last_optime() >= Some(stop) {
            Progress::Finished
        } else {
            Progress::Continue
        }
    }
}

impl SimState {
    /// Run the node's initial sync until it pauses, finishes, lacks a sync
    /// source or has used up this tick's command budget.
    pub(super) fn advance_initial_sync(&mut self, idx: usize, config: &SimConfig) {
        for _ in 0..config.max_sync_commands_per_tick.max(1) {
            if !self.nodes[idx].is_running() {
                return;
            }
            let Some(mut task) = self.nodes[idx].initial_sync.take() else {
                return;
            };
            if !task.pass_sync_points(&mut self.nodes[idx]) {
                self.nodes[idx].initial_sync = Some(task);
                return;
            }
            let Some(source) = self.sync_source(idx) else {
                self.nodes[idx].initial_sync = Some(task);
                return;
            };

            let (node, source) = split_pair(&mut self.nodes, idx, source);
            match task.run_command(node, source, config) {
                Progress::Continue => node.initial_sync = Some(task),
                Progress::Finished => {
                    node.state = MemberState::Secondary;
                    node.log(format!(
                        "initial sync done after {} commands",
                        task.commands_run
                    ));
                    return;
                }
                Progress::Failed(reason) => {
                    task.attempts_left -= 1;
                    if task.attempts_left == 0 {
                        node.log(format!(
                            "initial sync failed: {reason}; no attempts left, shutting down"
                        ));
                        node.process = ProcessState::Stopped;
                        node.state = MemberState::Down;
                    } else {
                        node.log(format!(
                            "initial sync attempt failed: {reason}; {} attempts left",
                            task.attempts_left
                        ));
                        node.wipe();
                        task.restart_attempt();
                        node.initial_sync = Some(task);
                    }
                    return;
                }
            }
        }
    }
}
