//! One simulated member.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use repl_core::CollectionSet;
use repl_types::{
    DocId, Document, FailPointMode, MemberSpec, MemberState, Namespace, NodeId, NodeStatus,
    OpTime, OplogEntry, OplogOp, ProcessState, Rbid, PARAM_BATCH_LIMIT_OPERATIONS,
};
use tracing::debug;

use super::initial_sync::InitialSyncTask;

/// Bounded in-memory log, the simulated counterpart of a server's RAM log.
#[derive(Debug)]
pub(super) struct RamLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl RamLog {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub(super) fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub(super) fn count(&self, needle: &str) -> usize {
        self.lines.iter().filter(|l| l.contains(needle)).count()
    }

    pub(super) fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Where a secondary stands relative to its sync source.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum FetchPosition {
    /// Nothing new to fetch.
    UpToDate,
    /// Fetch from this index of the source's oplog.
    From(usize),
    /// Our newest entry is not in the source's oplog.
    Diverged,
}

#[derive(Debug)]
pub(super) struct SimNode {
    pub(super) id: NodeId,
    pub(super) member: MemberSpec,
    pub(super) priority_override: Option<u32>,
    pub(super) process: ProcessState,
    pub(super) state: MemberState,
    pub(super) term: u64,
    pub(super) rbid: Rbid,
    pub(super) oplog: Vec<OplogEntry>,
    pub(super) data: BTreeMap<Namespace, BTreeMap<DocId, Document>>,
    pub(super) failpoints: BTreeMap<String, FailPointMode>,
    pub(super) params: BTreeMap<String, String>,
    pub(super) log: RamLog,
    pub(super) ticks_without_majority: u32,
    pub(super) frozen_until: u64,
    pub(super) initial_sync: Option<InitialSyncTask>,
    pub(super) open_transactions: usize,
}

impl SimNode {
    pub(super) fn new(id: NodeId, log_capacity: usize) -> Self {
        Self {
            id,
            member: MemberSpec::data(),
            priority_override: None,
            process: ProcessState::NotStarted,
            state: MemberState::Down,
            term: 0,
            rbid: Rbid::INITIAL,
            oplog: Vec::new(),
            data: BTreeMap::new(),
            failpoints: BTreeMap::new(),
            params: BTreeMap::new(),
            log: RamLog::new(log_capacity),
            ticks_without_majority: 0,
            frozen_until: 0,
            initial_sync: None,
            open_transactions: 0,
        }
    }

    pub(super) fn is_running(&self) -> bool {
        self.process == ProcessState::Running
    }

    pub(super) fn priority(&self) -> u32 {
        self.priority_override.unwrap_or(self.member.priority)
    }

    pub(super) fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        debug!(target: "faultline::sim", node = %self.id, "{line}");
        self.log.push(line);
    }

    pub(super) fn failpoint_active(&self, name: &str) -> bool {
        self.failpoints
            .get(name)
            .is_some_and(|mode| mode.is_active())
    }

    /// Entries applied per batch, honouring `replBatchLimitOperations`.
    pub(super) fn batch_limit(&self, default: usize) -> usize {
        self.params
            .get(PARAM_BATCH_LIMIT_OPERATIONS)
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(default)
            .max(1)
    }

    pub(super) fn last_optime(&self) -> Option<OpTime> {
        self.oplog.last().map(|e| e.optime)
    }

    pub(super) fn next_index(&self) -> u64 {
        self.oplog.last().map_or(1, |e| e.optime.index + 1)
    }

    pub(super) fn position_of(&self, optime: OpTime) -> Option<usize> {
        self.oplog
            .binary_search_by(|e| e.optime.cmp(&optime))
            .ok()
    }

    fn contains_entry(&self, entry: &OplogEntry) -> bool {
        self.position_of(entry.optime)
            .is_some_and(|pos| self.oplog[pos] == *entry)
    }

    /// Index in our oplog of the newest entry the source also has.
    pub(super) fn common_point(&self, source: &SimNode) -> Option<usize> {
        self.oplog.iter().rposition(|e| source.contains_entry(e))
    }

    pub(super) fn fetch_position(&self, source: &SimNode) -> FetchPosition {
        let Some(last) = self.oplog.last() else {
            return FetchPosition::From(0);
        };
        match source.position_of(last.optime) {
            Some(pos) if source.oplog[pos] == *last => {
                if pos + 1 < source.oplog.len() {
                    FetchPosition::From(pos + 1)
                } else {
                    FetchPosition::UpToDate
                }
            }
            _ => FetchPosition::Diverged,
        }
    }

    /// Apply an entry to the data. Applying the same entry twice is harmless.
    pub(super) fn apply(&mut self, entry: &OplogEntry) {
        match &entry.op {
            OplogOp::Noop { .. } => {}
            OplogOp::Insert { doc } | OplogOp::Update { doc } => {
                self.data
                    .entry(entry.ns.clone())
                    .or_default()
                    .insert(doc.id.clone(), doc.clone());
            }
            OplogOp::Delete { id } => {
                if let Some(coll) = self.data.get_mut(&entry.ns) {
                    coll.remove(id);
                }
            }
        }
    }

    /// Apply and record an entry fetched from a sync source.
    pub(super) fn replicate(&mut self, entry: &OplogEntry) {
        self.apply(entry);
        self.oplog.push(entry.clone());
        self.term = self.term.max(entry.optime.term);
    }

    pub(super) fn step_down(&mut self, reason: &str) {
        self.state = MemberState::Secondary;
        self.ticks_without_majority = 0;
        self.log(format!("stepping down from primary: {reason}"));
    }

    /// Undo every entry after the common point with `source`, refetching the
    /// touched documents from it.
    pub(super) fn finish_rollback(&mut self, source: &SimNode) {
        let Some(common) = self.common_point(source) else {
            self.enter_recovering("rollback found no common point with the sync source");
            return;
        };
        let divergent = self.oplog.split_off(common + 1);
        let touched: BTreeSet<(Namespace, DocId)> = divergent
            .iter()
            .filter_map(|e| e.doc_id().map(|id| (e.ns.clone(), id.clone())))
            .collect();

        for (ns, id) in &touched {
            match source.data.get(ns).and_then(|coll| coll.get(id)) {
                Some(doc) => {
                    self.data
                        .entry(ns.clone())
                        .or_default()
                        .insert(id.clone(), doc.clone());
                }
                None => {
                    if let Some(coll) = self.data.get_mut(ns) {
                        coll.remove(id);
                    }
                }
            }
        }
        // collections created by the rolled back writes
        let namespaces: BTreeSet<&Namespace> = touched.iter().map(|(ns, _)| ns).collect();
        for ns in namespaces {
            if !source.data.contains_key(ns) && self.data.get(ns).is_some_and(BTreeMap::is_empty) {
                self.data.remove(ns);
            }
        }

        self.rbid = self.rbid.next();
        self.state = MemberState::Secondary;
        self.log(format!(
            "rollback complete: undid {} operations back to {}, rbid is now {}",
            divergent.len(),
            self.oplog[common].optime,
            self.rbid
        ));
    }

    pub(super) fn enter_recovering(&mut self, reason: &str) {
        if self.state != MemberState::Recovering {
            self.state = MemberState::Recovering;
            self.log(format!("entering RECOVERING: {reason}"));
        }
    }

    /// Drop data and oplog, as after deleting the data directory.
    pub(super) fn wipe(&mut self) {
        self.oplog.clear();
        self.data.clear();
        self.rbid = Rbid::INITIAL;
        self.term = 0;
    }

    pub(super) fn status(&self) -> NodeStatus {
        NodeStatus {
            node: self.id,
            state: self.state,
            term: self.term,
            rbid: self.rbid,
            last_applied: self.last_optime(),
        }
    }

    pub(super) fn collections(&self) -> CollectionSet {
        self.data
            .iter()
            .map(|(ns, docs)| (ns.clone(), docs.values().cloned().collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ns() -> Namespace {
        Namespace::new("test", "c")
    }

    fn insert(term: u64, index: u64, id: &str) -> OplogEntry {
        OplogEntry {
            optime: OpTime::new(term, index),
            ns: ns(),
            op: OplogOp::Insert {
                doc: Document::new(id, json!({ "i": index })),
            },
        }
    }

    fn node_with(id: u8, entries: &[OplogEntry]) -> SimNode {
        let mut node = SimNode::new(NodeId::new(id), 16);
        for entry in entries {
            node.replicate(entry);
        }
        node
    }

    #[test]
    fn ram_log_is_bounded() {
        let mut log = RamLog::new(2);
        log.push("a x".into());
        log.push("b x".into());
        log.push("c".into());
        assert_eq!(log.count("x"), 1);
        log.clear();
        assert_eq!(log.count(""), 0);
    }

    #[test]
    fn apply_is_idempotent() {
        let mut node = SimNode::new(NodeId::new(0), 16);
        let entry = insert(1, 1, "a");
        node.apply(&entry);
        node.apply(&entry);
        assert_eq!(node.collections()[&ns()].len(), 1);
    }

    #[test]
    fn fetch_position() {
        let source = node_with(0, &[insert(1, 1, "a"), insert(1, 2, "b")]);
        assert_eq!(
            SimNode::new(NodeId::new(1), 16).fetch_position(&source),
            FetchPosition::From(0)
        );
        assert_eq!(
            node_with(1, &[insert(1, 1, "a")]).fetch_position(&source),
            FetchPosition::From(1)
        );
        assert_eq!(
            node_with(1, &[insert(1, 1, "a"), insert(1, 2, "b")]).fetch_position(&source),
            FetchPosition::UpToDate
        );
        assert_eq!(
            node_with(1, &[insert(1, 1, "a"), insert(1, 2, "x")]).fetch_position(&source),
            FetchPosition::Diverged
        );
    }

    #[test]
    fn rollback_refetches_and_bumps_rbid() {
        let source = node_with(0, &[insert(1, 1, "a"), insert(2, 2, "b")]);
        let mut node = node_with(
            1,
            &[
                insert(1, 1, "a"),
                insert(1, 2, "lost"),
                OplogEntry {
                    optime: OpTime::new(1, 3),
                    ns: Namespace::new("only", "here"),
                    op: OplogOp::Insert {
                        doc: Document::new("z", json!({})),
                    },
                },
            ],
        );
        let rbid = node.rbid;

        node.finish_rollback(&source);

        assert_eq!(node.rbid, rbid.next());
        assert_eq!(node.state, MemberState::Secondary);
        assert_eq!(node.oplog.len(), 1);
        let collections = node.collections();
        assert_eq!(collections.len(), 1);
        let ids: Vec<_> = collections[&ns()].iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn batch_limit_reads_parameter() {
        let mut node = SimNode::new(NodeId::new(0), 16);
        assert_eq!(node.batch_limit(50), 50);
        node.params
            .insert(PARAM_BATCH_LIMIT_OPERATIONS.to_string(), "3".to_string());
        assert_eq!(node.batch_limit(50), 3);
        node.params
            .insert(PARAM_BATCH_LIMIT_OPERATIONS.to_string(), "0".to_string());
        assert_eq!(node.batch_limit(50), 1);
    }
}
