//! Rollback fault injection.
//!
//! [`RollbackController`] drives a three-member set (two data-bearing nodes
//! and an arbiter acting as tie breaker) through one rollback per cycle:
//!
//! ```text
//!   SteadyStateOps ──► RollbackOps ──► SyncSourceOpsBeforeRollback
//!        ▲                                   │            │
//!        │                                   ▼            │ (deprecated)
//!        └──────────── SyncSourceOpsDuringRollback ◄──────┘
//! ```
//!
//! 1. **RollbackOps**: the primary is cut off from the secondary but keeps
//!    the tie breaker, so it stays primary and accepts writes that will be
//!    rolled back.
//! 2. **SyncSourceOpsBeforeRollback**: the old primary is fully isolated
//!    and stepped down, the old secondary is elected. Writes now go to the
//!    future sync source.
//! 3. **SyncSourceOpsDuringRollback**: the links are restored and the old
//!    primary starts rolling back.
//! 4. **SteadyStateOps**: the rollback has finished (RBID advanced by exactly
//!    one) and every member holds the same data.

use std::sync::Arc;
use std::time::Duration;

use repl_core::{ControllerState, RollbackState, StateMachine};
use repl_types::{Document, MemberSpec, Namespace, NodeId, Rbid, Role, StartOptions};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::ReplicaSetBackend;
use crate::cluster::ClusterController;
use crate::config::HarnessConfig;
use crate::consistency::ConsistencyChecker;
use crate::error::HarnessError;
use crate::poll::{wait_until, Probe};

/// Drives a replica set through repeated rollbacks.
#[derive(Debug)]
pub struct RollbackController {
    cluster: ClusterController,
    machine: StateMachine<RollbackState>,
    checker: ConsistencyChecker,
    primary: NodeId,
    secondary: NodeId,
    tie_breaker: NodeId,
    rbid_baseline: Option<Rbid>,
    guaranteed_ns: Namespace,
    freeze: Duration,
    cycles: u64,
}

impl RollbackController {
    /// Documents the controller itself writes on the rollback node each cycle,
    /// on top of whatever the caller writes.
    pub const GUARANTEED_WRITES: usize = 1;

    /// Members of the set built when no cluster is supplied.
    pub fn default_members() -> Vec<MemberSpec> {
        vec![MemberSpec::data(), MemberSpec::data(), MemberSpec::arbiter()]
    }

    /// Take control of `cluster`, or start a simulated one.
    ///
    /// The cluster must have exactly two data-bearing members and one
    /// arbiter. Returns once a primary exists and the secondary caught up.
    pub async fn start(
        name: &str,
        cluster: Option<ClusterController>,
        config: &HarnessConfig,
    ) -> Result<Self, HarnessError> {
        let mut cluster = match cluster {
            Some(cluster) => cluster,
            None => ClusterController::simulated(name, Self::default_members(), config).await?,
        };

        let nodes = cluster.nodes();
        let arbiters: Vec<NodeId> = nodes
            .iter()
            .filter(|n| n.member().arbiter)
            .map(|n| n.id())
            .collect();
        let data: Vec<NodeId> = nodes
            .iter()
            .filter(|n| n.member().is_data_bearing())
            .map(|n| n.id())
            .collect();
        let (&[tie_breaker], &[_, _]) = (arbiters.as_slice(), data.as_slice()) else {
            return Err(HarnessError::Topology(format!(
                "rollback needs two data-bearing members and one arbiter, got {} and {}",
                data.len(),
                arbiters.len()
            )));
        };

        let primary = cluster.get_primary().await?;
        let Some(&secondary) = data.iter().find(|n| **n != primary) else {
            return Err(HarnessError::Invariant(format!(
                "primary {primary} is not a data-bearing member"
            )));
        };
        cluster.await_replication().await?;

        let guaranteed_ns: Namespace = config.rollback.guaranteed_namespace.parse()?;
        info!(
            name = %cluster.name(),
            %primary,
            %secondary,
            %tie_breaker,
            "rollback controller ready"
        );
        Ok(Self {
            cluster,
            machine: StateMachine::new(RollbackState::SteadyStateOps),
            checker: ConsistencyChecker::new(),
            primary,
            secondary,
            tie_breaker,
            rbid_baseline: None,
            guaranteed_ns,
            freeze: Duration::from_secs(config.rollback.step_down_freeze_secs),
            cycles: 0,
        })
    }

    /// Current phase.
    pub fn state(&self) -> RollbackState {
        self.machine.current()
    }

    /// Node currently expected to be primary.
    pub fn primary(&self) -> NodeId {
        self.primary
    }

    /// The other data-bearing node.
    pub fn secondary(&self) -> NodeId {
        self.secondary
    }

    /// The arbiter.
    pub fn tie_breaker(&self) -> NodeId {
        self.tie_breaker
    }

    /// Completed rollback cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// The underlying cluster.
    pub fn cluster(&self) -> &ClusterController {
        &self.cluster
    }

    /// The underlying cluster, for writes and direct node commands.
    pub fn cluster_mut(&mut self) -> &mut ClusterController {
        &mut self.cluster
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Partition the primary from the secondary. Writes sent to the returned
    /// node from now on will be rolled back.
    pub async fn transition_to_rollback_operations(&mut self) -> Result<NodeId, HarnessError> {
        self.machine.ensure(RollbackState::RollbackOps)?;

        self.cluster.await_secondary_nodes().await?;
        self.cluster.await_replication().await?;
        // the secondary must not be able to win an election with the arbiter's vote
        self.cluster
            .isolate(self.secondary, &[self.tie_breaker])
            .await?;
        self.cluster.isolate(self.primary, &[self.secondary]).await?;

        self.commit(RollbackState::RollbackOps)?;
        Ok(self.primary)
    }

    /// Isolate the rollback node, elect the other data-bearing node and
    /// return it. Writes sent to it become the sync source's divergent history.
    pub async fn transition_to_sync_source_operations_before_rollback(
        &mut self,
    ) -> Result<NodeId, HarnessError> {
        self.machine
            .ensure(RollbackState::SyncSourceOpsBeforeRollback)?;
        let rollback_node = self.primary;
        let sync_source = self.secondary;

        // something is always there to roll back, even without caller writes
        let doc = Document::new(
            Uuid::new_v4().to_string(),
            json!({ "cycle": self.cycles, "node": rollback_node.to_string() }),
        );
        self.cluster
            .insert(rollback_node, &self.guaranteed_ns, doc)
            .await?;

        self.cluster
            .isolate(rollback_node, &[self.tie_breaker])
            .await?;
        self.cluster
            .force_step_down(rollback_node, self.freeze)
            .await?;
        self.cluster
            .wait_for_role(rollback_node, Role::Secondary, None)
            .await?;

        self.cluster
            .reconnect(sync_source, &[self.tie_breaker])
            .await?;
        self.cluster.step_up_and_wait(sync_source).await?;
        let elected = self.cluster.get_primary().await?;
        if elected != sync_source {
            return Err(HarnessError::Invariant(format!(
                "expected {sync_source} to be elected, but {elected} is primary"
            )));
        }

        let baseline = self.cluster.rbid(rollback_node).await?;
        info!(%rollback_node, rbid = %baseline, "recorded rbid baseline");
        self.rbid_baseline = Some(baseline);
        self.primary = sync_source;
        self.secondary = rollback_node;

        self.commit(RollbackState::SyncSourceOpsBeforeRollback)?;
        Ok(self.primary)
    }

    /// Reconnect the rollback node so it starts rolling back. Operations sent
    /// to the returned primary may or may not land while the rollback runs.
    pub async fn transition_to_sync_source_operations_during_rollback(
        &mut self,
    ) -> Result<NodeId, HarnessError> {
        self.machine
            .ensure(RollbackState::SyncSourceOpsDuringRollback)?;
        self.reconnect_rollback_node().await?;
        self.commit(RollbackState::SyncSourceOpsDuringRollback)?;
        Ok(self.primary)
    }

    /// Wait for the rollback to finish and verify the members agree.
    ///
    /// The rollback node's RBID must advance by exactly one from the baseline
    /// recorded when it was isolated.
    pub async fn transition_to_steady_state_operations(&mut self) -> Result<NodeId, HarnessError> {
        self.machine.ensure(RollbackState::SteadyStateOps)?;
        if self.state() == RollbackState::SyncSourceOpsBeforeRollback {
            warn!(
                "going straight to steady state without a during-rollback phase is deprecated; \
                 reconnecting the rollback node first"
            );
            self.reconnect_rollback_node().await?;
        }

        let baseline = self
            .rbid_baseline
            .ok_or_else(|| HarnessError::Invariant("no rbid baseline was recorded".to_string()))?;
        let rollback_node = self.secondary;
        let expected = baseline.next();
        let backend = Arc::clone(self.cluster.backend());
        wait_until(
            &format!("{rollback_node} to finish rollback with rbid {expected}"),
            self.cluster.waits(),
            || probe_rbid(Arc::clone(&backend), rollback_node, expected),
        )
        .await?;

        self.cluster.await_secondary_nodes().await?;
        self.cluster.await_replication().await?;
        self.check_consistency().await?;

        self.rbid_baseline = None;
        self.cycles += 1;
        self.commit(RollbackState::SteadyStateOps)?;
        Ok(self.primary)
    }

    /// Verify consistency one last time and stop every member.
    pub async fn stop(&mut self) -> Result<(), HarnessError> {
        self.machine.ensure(RollbackState::Stopped)?;
        self.cluster.await_replication().await?;
        self.check_consistency().await?;
        self.cluster.stop_all().await?;
        self.commit(RollbackState::Stopped)?;
        Ok(())
    }

    /// Restart one member in place, keeping its data.
    ///
    /// Cut links stay cut; they belong to the network, not the process.
    pub async fn restart_node(
        &mut self,
        node: NodeId,
        options: &StartOptions,
    ) -> Result<(), HarnessError> {
        if self.state() == RollbackState::Stopped {
            return Err(HarnessError::Invariant(
                "cannot restart a node after the controller stopped".to_string(),
            ));
        }
        self.cluster.restart(node, options).await
    }

    async fn reconnect_rollback_node(&mut self) -> Result<(), HarnessError> {
        let rollback_node = self.secondary;
        self.cluster
            .reconnect(rollback_node, &[self.primary, self.tie_breaker])
            .await
    }

    async fn check_consistency(&self) -> Result<(), HarnessError> {
        let nodes: Vec<NodeId> = self.cluster.nodes().iter().map(|n| n.id()).collect();
        self.checker.check_all(&self.cluster, &nodes).await
    }

    fn commit(&mut self, to: RollbackState) -> Result<(), HarnessError> {
        let from = self.machine.transition(to)?;
        info!(
            from = from.name(),
            to = to.name(),
            primary = %self.primary,
            secondary = %self.secondary,
            "rollback transition"
        );
        Ok(())
    }
}

async fn probe_rbid(
    backend: Arc<dyn ReplicaSetBackend>,
    node: NodeId,
    expected: Rbid,
) -> Result<Probe<Rbid>, HarnessError> {
    let status = backend.status(node).await?;
    if status.rbid == expected {
        Ok(Probe::Ready(status.rbid))
    } else if status.rbid > expected {
        Err(HarnessError::Invariant(format!(
            "{node} rbid jumped to {} but only one rollback ({expected}) was expected",
            status.rbid
        )))
    } else {
        Ok(Probe::Pending(status.summary()))
    }
}
