//! Replica-set lifecycle and network control.
//!
//! [`ClusterController`] owns one [`NodeHandle`] per member and the
//! [`Topology`] that records which links are cut. Every change goes through
//! the [`ReplicaSetBackend`]; the recorded reachability is updated pair by
//! pair, only after the backend confirmed each cut or heal.

use std::sync::Arc;
use std::time::Duration;

use repl_core::{CollectionSet, Reachability};
use repl_types::{
    Document, FailPointCommand, MemberSpec, MemberState, Namespace, NodeId, NodeStatus, OpTime,
    OplogEntry, ProcessState, Rbid, Role, StartOptions, WriteOp,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{BackendError, ReplicaSetBackend, SimReplicaSet};
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::poll::{wait_until, Probe, WaitPolicy};

/// One member as the harness sees it.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    id: NodeId,
    address: String,
    member: MemberSpec,
    process: ProcessState,
    role: Role,
}

impl NodeHandle {
    /// Member id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Connection address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Replica-set configuration of this member.
    pub fn member(&self) -> MemberSpec {
        self.member
    }

    /// Process lifecycle as last driven by the harness.
    pub fn process(&self) -> ProcessState {
        self.process
    }

    /// Role from the most recent status observation.
    pub fn role(&self) -> Role {
        self.role
    }
}

/// Node handles plus the symmetric reachability relation.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<NodeHandle>,
    reachability: Reachability,
}

impl Topology {
    /// All members, indexed by id.
    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    /// Currently cut links.
    pub fn reachability(&self) -> &Reachability {
        &self.reachability
    }
}

/// Drives a replica set through its backend.
pub struct ClusterController {
    name: String,
    backend: Arc<dyn ReplicaSetBackend>,
    topology: Topology,
    waits: WaitPolicy,
}

impl std::fmt::Debug for ClusterController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterController")
            .field("name", &self.name)
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}

impl ClusterController {
    /// Start every member, initiate the set and wait for a primary.
    pub async fn start(
        name: impl Into<String>,
        backend: Arc<dyn ReplicaSetBackend>,
        members: Vec<MemberSpec>,
        waits: WaitPolicy,
    ) -> Result<Self, HarnessError> {
        let name = name.into();
        if members.len() != backend.node_count() {
            return Err(HarnessError::Topology(format!(
                "backend has {} nodes but {} members were configured",
                backend.node_count(),
                members.len()
            )));
        }

        let nodes = members
            .iter()
            .enumerate()
            .map(|(i, member)| {
                let id = u8::try_from(i).map(NodeId::new).map_err(|_| {
                    HarnessError::Topology(format!(
                        "{} members configured but node ids stop at {}",
                        members.len(),
                        u8::MAX
                    ))
                })?;
                Ok::<_, HarnessError>(NodeHandle {
                    id,
                    address: backend.address(id),
                    member: *member,
                    process: ProcessState::NotStarted,
                    role: Role::Unknown,
                })
            })
            .collect::<Result<Vec<_>, HarnessError>>()?;

        let mut cluster = Self {
            name,
            backend,
            topology: Topology {
                nodes,
                reachability: Reachability::new(),
            },
            waits,
        };

        for i in 0..cluster.topology.nodes.len() {
            let id = cluster.topology.nodes[i].id;
            cluster.backend.start_node(id, &StartOptions::default()).await?;
            cluster.topology.nodes[i].process = ProcessState::Running;
        }
        cluster.backend.initiate(&members).await?;
        let primary = cluster.get_primary().await?;
        info!(
            name = %cluster.name,
            members = members.len(),
            %primary,
            "replica set started"
        );
        Ok(cluster)
    }

    /// Start a set on a fresh in-process simulator.
    ///
    /// The set name gets a random suffix so concurrent harnesses never share
    /// a name in logs.
    pub async fn simulated(
        name: &str,
        members: Vec<MemberSpec>,
        config: &HarnessConfig,
    ) -> Result<Self, HarnessError> {
        let name = format!("{name}-{}", Uuid::new_v4().simple());
        let backend = Arc::new(
            SimReplicaSet::new(name.clone(), members.len(), config.sim.clone())
                .with_sync_points(config.initial_sync.sync_points()),
        );
        Self::start(name, backend, members, WaitPolicy::from_config(&config.waits)).await
    }

    /// Replica-set name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backend this controller drives.
    pub fn backend(&self) -> &Arc<dyn ReplicaSetBackend> {
        &self.backend
    }

    /// Handles and reachability.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// All member handles.
    pub fn nodes(&self) -> &[NodeHandle] {
        &self.topology.nodes
    }

    /// One member's handle.
    pub fn node(&self, node: NodeId) -> Result<&NodeHandle, HarnessError> {
        self.topology
            .nodes
            .get(node.index())
            .ok_or(HarnessError::UnknownNode(node))
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut NodeHandle, HarnessError> {
        self.topology
            .nodes
            .get_mut(node.index())
            .ok_or(HarnessError::UnknownNode(node))
    }

    /// Wait policy used by every blocking operation.
    pub fn waits(&self) -> &WaitPolicy {
        &self.waits
    }

    /// Running members that hold data.
    pub fn data_bearing_running(&self) -> Vec<NodeId> {
        self.topology
            .nodes
            .iter()
            .filter(|n| n.member.is_data_bearing() && n.process == ProcessState::Running)
            .map(|n| n.id)
            .collect()
    }

    fn running(&self) -> Vec<NodeHandle> {
        self.topology
            .nodes
            .iter()
            .filter(|n| n.process == ProcessState::Running)
            .cloned()
            .collect()
    }

    // =========================================================================
    // Network
    // =========================================================================

    /// Cut `node` off from each of `peers`.
    ///
    /// Links that are already cut, and `node` itself, are skipped without
    /// touching the backend.
    pub async fn isolate(&mut self, node: NodeId, peers: &[NodeId]) -> Result<(), HarnessError> {
        self.node(node)?;
        for &peer in peers {
            self.node(peer)?;
            if peer == node || !self.topology.reachability.can_reach(node, peer) {
                continue;
            }
            self.backend
                .disconnect(node, peer)
                .await
                .map_err(|source| HarnessError::Partition { node, peer, source })?;
            self.topology.reachability.cut(node, peer);
            info!(%node, %peer, "link cut");
        }
        Ok(())
    }

    /// Restore the links between `node` and each of `peers`.
    ///
    /// Pairs that were never cut are skipped.
    pub async fn reconnect(&mut self, node: NodeId, peers: &[NodeId]) -> Result<(), HarnessError> {
        self.node(node)?;
        for &peer in peers {
            self.node(peer)?;
            if self.topology.reachability.can_reach(node, peer) {
                continue;
            }
            self.backend
                .reconnect(node, peer)
                .await
                .map_err(|source| HarnessError::Partition { node, peer, source })?;
            self.topology.reachability.heal(node, peer);
            info!(%node, %peer, "link restored");
        }
        Ok(())
    }

    // =========================================================================
    // Process lifecycle
    // =========================================================================

    /// Stop `node`, delete its data and start it again with `options`.
    ///
    /// Returns once the process accepts connections.
    pub async fn restart_clean(
        &mut self,
        node: NodeId,
        options: &StartOptions,
    ) -> Result<(), HarnessError> {
        self.stop_node(node).await?;
        self.backend.wipe_node(node).await?;
        info!(%node, "data wiped");
        self.start_node(node, options).await
    }

    /// Stop and start `node`, keeping its data.
    pub async fn restart(&mut self, node: NodeId, options: &StartOptions) -> Result<(), HarnessError> {
        self.stop_node(node).await?;
        self.start_node(node, options).await
    }

    async fn stop_node(&mut self, node: NodeId) -> Result<(), HarnessError> {
        if self.node(node)?.process == ProcessState::Running {
            self.backend.stop_node(node).await?;
            info!(%node, "process stopped");
        }
        let handle = self.node_mut(node)?;
        handle.process = ProcessState::Stopped;
        handle.role = Role::Unknown;
        Ok(())
    }

    async fn start_node(&mut self, node: NodeId, options: &StartOptions) -> Result<(), HarnessError> {
        self.backend.start_node(node, options).await?;
        self.node_mut(node)?.process = ProcessState::Running;
        info!(
            %node,
            forced_failpoint = options.forced_failpoint.as_deref().unwrap_or("none"),
            "process started"
        );

        let backend = Arc::clone(&self.backend);
        wait_until(&format!("{node} to accept connections"), &self.waits, || {
            probe_ping(Arc::clone(&backend), node)
        })
        .await
    }

    /// Stop every running member.
    pub async fn stop_all(&mut self) -> Result<(), HarnessError> {
        for handle in self.running() {
            self.stop_node(handle.id).await?;
        }
        info!(name = %self.name, "replica set stopped");
        Ok(())
    }

    // =========================================================================
    // Elections
    // =========================================================================

    /// Ask `node` to step down and stay unelectable for `freeze`.
    ///
    /// A node that is no longer primary, or rejects the command, is logged
    /// and tolerated; callers verify the role with [`Self::wait_for_role`].
    pub async fn force_step_down(&mut self, node: NodeId, freeze: Duration) -> Result<(), HarnessError> {
        self.node(node)?;
        match self.backend.step_down(node, freeze).await {
            Ok(()) => info!(%node, ?freeze, "stepped down"),
            Err(e @ (BackendError::NotPrimary(_) | BackendError::CommandFailed { .. })) => {
                warn!(%node, error = %e, "step down request failed; continuing");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Ask `node` to run for election once.
    pub async fn step_up(&mut self, node: NodeId) -> Result<(), HarnessError> {
        self.node(node)?;
        self.backend.step_up(node).await?;
        Ok(())
    }

    /// Ask `node` to run for election until it reports `PRIMARY`.
    pub async fn step_up_and_wait(&mut self, node: NodeId) -> Result<NodeStatus, HarnessError> {
        self.node(node)?;
        let backend = Arc::clone(&self.backend);
        let status = wait_until(&format!("{node} to win an election"), &self.waits, || {
            probe_step_up(Arc::clone(&backend), node)
        })
        .await?;
        self.observe(&status);
        info!(%node, term = status.term, "stepped up");
        Ok(status)
    }

    /// Wait until `node` reports `role`.
    ///
    /// `timeout` overrides the configured wait timeout.
    pub async fn wait_for_role(
        &mut self,
        node: NodeId,
        role: Role,
        timeout: Option<Duration>,
    ) -> Result<NodeStatus, HarnessError> {
        self.node(node)?;
        let policy = self.policy(timeout);
        let backend = Arc::clone(&self.backend);
        let status = wait_until(&format!("{node} to become {role}"), &policy, || {
            probe_role(Arc::clone(&backend), node, role)
        })
        .await?;
        self.observe(&status);
        Ok(status)
    }

    /// Wait until `node` reports one of `states`.
    pub async fn wait_for_state(
        &mut self,
        node: NodeId,
        states: &[MemberState],
        timeout: Option<Duration>,
    ) -> Result<NodeStatus, HarnessError> {
        self.node(node)?;
        let policy = self.policy(timeout);
        let backend = Arc::clone(&self.backend);
        let what = format!(
            "{node} to reach {}",
            states.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" or ")
        );
        let status = wait_until(&what, &policy, || {
            probe_state(Arc::clone(&backend), node, states.to_vec())
        })
        .await?;
        self.observe(&status);
        Ok(status)
    }

    /// Wait for a primary. If several members claim the role, the one with
    /// the highest term wins.
    pub async fn get_primary(&mut self) -> Result<NodeId, HarnessError> {
        let backend = Arc::clone(&self.backend);
        let candidates: Vec<NodeId> = self.data_bearing_running();
        let status = wait_until("a primary", &self.waits, || {
            probe_primary(Arc::clone(&backend), candidates.clone())
        })
        .await?;
        self.observe(&status);
        Ok(status.node)
    }

    // =========================================================================
    // Replication
    // =========================================================================

    /// Wait until every running data-bearing secondary has applied the
    /// primary's newest optime.
    pub async fn await_replication(&mut self) -> Result<OpTime, HarnessError> {
        let primary = self.get_primary().await?;
        let target = self
            .status(primary)
            .await?
            .last_applied
            .ok_or_else(|| HarnessError::Invariant(format!("primary {primary} has an empty oplog")))?;
        let secondaries: Vec<NodeId> = self
            .data_bearing_running()
            .into_iter()
            .filter(|n| *n != primary)
            .collect();

        let backend = Arc::clone(&self.backend);
        wait_until(&format!("secondaries to apply {target}"), &self.waits, || {
            probe_replicated(Arc::clone(&backend), secondaries.clone(), target)
        })
        .await?;
        debug!(%target, "replication caught up");
        Ok(target)
    }

    /// Wait until every running data-bearing member is `PRIMARY` or
    /// `SECONDARY` and every running arbiter is `ARBITER`.
    pub async fn await_secondary_nodes(&mut self) -> Result<(), HarnessError> {
        let backend = Arc::clone(&self.backend);
        let members: Vec<(NodeId, MemberSpec)> =
            self.running().iter().map(|n| (n.id, n.member)).collect();
        let statuses = wait_until("members to be healthy", &self.waits, || {
            probe_healthy(Arc::clone(&backend), members.clone())
        })
        .await?;
        for status in &statuses {
            self.observe(status);
        }
        Ok(())
    }

    // =========================================================================
    // Node commands
    // =========================================================================

    /// Current status of `node`. Also refreshes its handle's role.
    pub async fn status(&mut self, node: NodeId) -> Result<NodeStatus, HarnessError> {
        self.node(node)?;
        let status = self.backend.status(node).await?;
        self.observe(&status);
        Ok(status)
    }

    /// Rollback id of `node`.
    pub async fn rbid(&mut self, node: NodeId) -> Result<Rbid, HarnessError> {
        Ok(self.status(node).await?.rbid)
    }

    /// Apply a write on `node`, which must be primary.
    pub async fn write(&self, node: NodeId, ns: &Namespace, op: WriteOp) -> Result<OpTime, HarnessError> {
        self.node(node)?;
        Ok(self.backend.write(node, ns, op).await?)
    }

    /// Insert one document on `node`.
    pub async fn insert(&self, node: NodeId, ns: &Namespace, doc: Document) -> Result<OpTime, HarnessError> {
        self.write(node, ns, WriteOp::Insert(doc)).await
    }

    /// Change a failpoint on `node`.
    pub async fn configure_failpoint(
        &self,
        node: NodeId,
        command: &FailPointCommand,
    ) -> Result<(), HarnessError> {
        self.node(node)?;
        self.backend.configure_failpoint(node, command).await?;
        debug!(%node, failpoint = %command.name, mode = ?command.mode, "failpoint configured");
        Ok(())
    }

    /// Lines in `node`'s in-memory log containing `needle`.
    pub async fn log_count(&self, node: NodeId, needle: &str) -> Result<usize, HarnessError> {
        self.node(node)?;
        Ok(self.backend.log_count(node, needle).await?)
    }

    /// Empty `node`'s in-memory log.
    pub async fn clear_log(&self, node: NodeId) -> Result<(), HarnessError> {
        self.node(node)?;
        Ok(self.backend.clear_log(node).await?)
    }

    /// `node`'s oplog, oldest first.
    pub async fn oplog(&self, node: NodeId) -> Result<Vec<OplogEntry>, HarnessError> {
        self.node(node)?;
        Ok(self.backend.oplog(node).await?)
    }

    /// Every collection on `node`.
    pub async fn collections(&self, node: NodeId) -> Result<CollectionSet, HarnessError> {
        self.node(node)?;
        Ok(self.backend.collections(node).await?)
    }

    /// Transactions open on `node`.
    pub async fn open_transactions(&self, node: NodeId) -> Result<usize, HarnessError> {
        self.node(node)?;
        Ok(self.backend.open_transactions(node).await?)
    }

    fn observe(&mut self, status: &NodeStatus) {
        if let Some(handle) = self.topology.nodes.get_mut(status.node.index()) {
            handle.role = status.state.role();
        }
    }

    fn policy(&self, timeout: Option<Duration>) -> WaitPolicy {
        match timeout {
            Some(timeout) => self.waits.with_timeout(timeout),
            None => self.waits.clone(),
        }
    }
}

// =============================================================================
// Probes
// =============================================================================

async fn probe_ping(backend: Arc<dyn ReplicaSetBackend>, node: NodeId) -> Result<Probe<()>, HarnessError> {
    backend.ping(node).await?;
    Ok(Probe::Ready(()))
}

async fn probe_role(
    backend: Arc<dyn ReplicaSetBackend>,
    node: NodeId,
    role: Role,
) -> Result<Probe<NodeStatus>, HarnessError> {
    let status = backend.status(node).await?;
    Ok(if status.state.role() == role {
        Probe::Ready(status)
    } else {
        Probe::Pending(status.summary())
    })
}

async fn probe_state(
    backend: Arc<dyn ReplicaSetBackend>,
    node: NodeId,
    states: Vec<MemberState>,
) -> Result<Probe<NodeStatus>, HarnessError> {
    let status = backend.status(node).await?;
    Ok(if states.contains(&status.state) {
        Probe::Ready(status)
    } else {
        Probe::Pending(status.summary())
    })
}

async fn probe_step_up(
    backend: Arc<dyn ReplicaSetBackend>,
    node: NodeId,
) -> Result<Probe<NodeStatus>, HarnessError> {
    match backend.step_up(node).await {
        Ok(()) => {}
        Err(e @ BackendError::CommandFailed { .. }) => return Ok(Probe::Pending(e.to_string())),
        Err(e) => return Err(e.into()),
    }
    probe_role(backend, node, Role::Primary).await
}

async fn probe_primary(
    backend: Arc<dyn ReplicaSetBackend>,
    candidates: Vec<NodeId>,
) -> Result<Probe<NodeStatus>, HarnessError> {
    let mut observed = Vec::with_capacity(candidates.len());
    let mut primary: Option<NodeStatus> = None;
    for node in candidates {
        let status = backend.status(node).await?;
        if status.state == MemberState::Primary
            && primary.as_ref().map_or(true, |p| status.term > p.term)
        {
            primary = Some(status.clone());
        }
        observed.push(status.summary());
    }
    Ok(match primary {
        Some(status) => Probe::Ready(status),
        None => Probe::Pending(observed.join("; ")),
    })
}

async fn probe_replicated(
    backend: Arc<dyn ReplicaSetBackend>,
    secondaries: Vec<NodeId>,
    target: OpTime,
) -> Result<Probe<()>, HarnessError> {
    for node in secondaries {
        let status = backend.status(node).await?;
        if status.last_applied < Some(target) {
            return Ok(Probe::Pending(status.summary()));
        }
    }
    Ok(Probe::Ready(()))
}

async fn probe_healthy(
    backend: Arc<dyn ReplicaSetBackend>,
    members: Vec<(NodeId, MemberSpec)>,
) -> Result<Probe<Vec<NodeStatus>>, HarnessError> {
    let mut statuses = Vec::with_capacity(members.len());
    for (node, member) in members {
        let status = backend.status(node).await?;
        let healthy = if member.arbiter {
            status.state == MemberState::Arbiter
        } else {
            matches!(status.state, MemberState::Primary | MemberState::Secondary)
        };
        if !healthy {
            return Ok(Probe::Pending(status.summary()));
        }
        statuses.push(status);
    }
    Ok(Probe::Ready(statuses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const N0: NodeId = NodeId::new(0);
    const N1: NodeId = NodeId::new(1);
    const N2: NodeId = NodeId::new(2);

    fn members() -> Vec<MemberSpec> {
        vec![MemberSpec::data(), MemberSpec::data(), MemberSpec::arbiter()]
    }

    fn waits() -> WaitPolicy {
        WaitPolicy::default().with_timeout(Duration::from_secs(5))
    }

    async fn cluster() -> (Arc<SimReplicaSet>, ClusterController) {
        let sim = Arc::new(SimReplicaSet::new("rs-cluster", 3, Default::default()));
        let cluster = ClusterController::start("rs-cluster", sim.clone(), members(), waits())
            .await
            .unwrap();
        (sim, cluster)
    }

    #[tokio::test(start_paused = true)]
    async fn start_finds_the_primary() {
        let (_sim, mut cluster) = cluster().await;
        assert_eq!(cluster.get_primary().await.unwrap(), N0);
        assert_eq!(cluster.node(N0).unwrap().role(), Role::Primary);
        assert_eq!(cluster.node(N1).unwrap().process(), ProcessState::Running);
        assert_eq!(cluster.node(N2).unwrap().address(), "sim://rs-cluster/node-2");
        assert_eq!(cluster.data_bearing_running(), vec![N0, N1]);
    }

    #[tokio::test(start_paused = true)]
    async fn start_rejects_member_count_mismatch() {
        let sim = Arc::new(SimReplicaSet::new("rs", 2, Default::default()));
        let err = ClusterController::start("rs", sim, members(), waits())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Topology(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn start_rejects_more_members_than_node_ids() {
        let count = usize::from(u8::MAX) + 2;
        let sim = Arc::new(SimReplicaSet::new("rs-wide", count, Default::default()));
        let err = ClusterController::start("rs-wide", sim, vec![MemberSpec::data(); count], waits())
            .await
            .unwrap_err();
        assert!(
            matches!(&err, HarnessError::Topology(msg) if msg.contains("257 members")),
            "{err}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn isolate_is_idempotent() {
        let (sim, mut cluster) = cluster().await;
        cluster.isolate(N0, &[N1, N0]).await.unwrap();
        let after_first = sim.network().await;
        assert!(!after_first.can_reach(N0, N1));
        assert!(after_first.can_reach(N0, N2));

        cluster.isolate(N0, &[N1]).await.unwrap();
        assert_eq!(sim.network().await, after_first);
        assert_eq!(cluster.topology().reachability(), &after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_never_isolated_is_noop() {
        let (sim, mut cluster) = cluster().await;
        cluster.reconnect(N1, &[N0, N2]).await.unwrap();
        assert!(sim.network().await.is_fully_connected());

        cluster.isolate(N1, &[N0, N2]).await.unwrap();
        cluster.reconnect(N1, &[N0, N2]).await.unwrap();
        assert!(sim.network().await.is_fully_connected());
        assert!(cluster.topology().reachability().is_fully_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_nodes_are_rejected() {
        let (_sim, mut cluster) = cluster().await;
        let stranger = NodeId::new(9);
        assert!(matches!(
            cluster.isolate(N0, &[stranger]).await,
            Err(HarnessError::UnknownNode(n)) if n == stranger
        ));
        assert!(matches!(
            cluster.status(stranger).await,
            Err(HarnessError::UnknownNode(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn force_step_down_tolerates_non_primary() {
        let (_sim, mut cluster) = cluster().await;
        cluster.force_step_down(N1, Duration::from_secs(1)).await.unwrap();
        assert_eq!(cluster.status(N0).await.unwrap().state, MemberState::Primary);

        cluster.force_step_down(N0, Duration::from_secs(1)).await.unwrap();
        cluster
            .wait_for_role(N0, Role::Secondary, None)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn step_up_and_wait_elects_the_secondary() {
        let (_sim, mut cluster) = cluster().await;
        let status = cluster.step_up_and_wait(N1).await.unwrap();
        assert_eq!(status.state, MemberState::Primary);
        assert_eq!(status.term, 2);
        assert_eq!(cluster.get_primary().await.unwrap(), N1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_role_times_out_with_last_status() {
        let (_sim, mut cluster) = cluster().await;
        let err = cluster
            .wait_for_role(N1, Role::Primary, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        match err {
            HarnessError::Timeout {
                what,
                last_observed,
                ..
            } => {
                assert_eq!(what, "node-1 to become primary");
                assert!(last_observed.contains("state=SECONDARY"), "{last_observed}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn await_replication_covers_every_secondary() {
        let (_sim, mut cluster) = cluster().await;
        let ns = Namespace::new("test", "c");
        for i in 0..5 {
            cluster
                .insert(N0, &ns, Document::new(format!("d{i}"), json!({ "i": i })))
                .await
                .unwrap();
        }
        let target = cluster.await_replication().await.unwrap();
        assert_eq!(cluster.status(N1).await.unwrap().last_applied, Some(target));
        assert_eq!(
            cluster.collections(N1).await.unwrap(),
            cluster.collections(N0).await.unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restart_clean_wipes_and_resyncs() {
        let (_sim, mut cluster) = cluster().await;
        let ns = Namespace::new("test", "c");
        cluster
            .insert(N0, &ns, Document::new("a", json!({})))
            .await
            .unwrap();
        cluster.await_replication().await.unwrap();

        cluster.restart_clean(N1, &StartOptions::default()).await.unwrap();
        cluster
            .wait_for_state(N1, &[MemberState::Secondary], None)
            .await
            .unwrap();
        assert_eq!(
            cluster.collections(N1).await.unwrap(),
            cluster.collections(N0).await.unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_stops_every_member() {
        let (_sim, mut cluster) = cluster().await;
        cluster.stop_all().await.unwrap();
        assert!(cluster
            .nodes()
            .iter()
            .all(|n| n.process() == ProcessState::Stopped));
        assert!(matches!(
            cluster.status(N0).await,
            Err(HarnessError::Backend(BackendError::NotRunning(_)))
        ));
    }
}
