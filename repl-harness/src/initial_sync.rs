//! Initial-sync fault injection.
//!
//! [`InitialSyncController`] wipes the secondary of a two-member set and
//! restarts it with the upstream synchronization point forced on, so its
//! initial sync starts paused. Each [`step`](InitialSyncController::step)
//! lets exactly one sync-source command through, giving the caller a window
//! between every pair of commands to mutate the primary.

use std::sync::Arc;

use repl_core::{
    ControllerState, IllegalTransition, InitialSyncState, StateMachine, SyncPointPair,
};
use repl_types::{
    MemberSpec, MemberState, NodeId, StartOptions, PARAM_BATCH_LIMIT_OPERATIONS,
    PARAM_INITIAL_SYNC_ATTEMPTS,
};
use tracing::{debug, info};

use crate::backend::ReplicaSetBackend;
use crate::cluster::ClusterController;
use crate::config::HarnessConfig;
use crate::consistency::ConsistencyChecker;
use crate::error::HarnessError;
use crate::poll::{wait_until, Probe};
use crate::sync_point::{run_handshake, HandshakeOutcome};

/// Drives one paused, step-by-step initial sync.
#[derive(Debug)]
pub struct InitialSyncController {
    cluster: ClusterController,
    machine: StateMachine<InitialSyncState>,
    checker: ConsistencyChecker,
    points: SyncPointPair,
    primary: NodeId,
    secondary: NodeId,
    attempts: u32,
    batch_limit: Option<u32>,
    steps: u64,
}

impl InitialSyncController {
    /// Members of the set built when no cluster is supplied. The syncing
    /// member neither votes nor runs for election, so restarting it never
    /// costs the primary its majority.
    pub fn default_members() -> Vec<MemberSpec> {
        vec![MemberSpec::data(), MemberSpec::passive()]
    }

    /// Take control of `cluster`, or start a simulated one.
    pub async fn start(
        name: &str,
        cluster: Option<ClusterController>,
        config: &HarnessConfig,
    ) -> Result<Self, HarnessError> {
        let mut cluster = match cluster {
            Some(cluster) => cluster,
            None => ClusterController::simulated(name, Self::default_members(), config).await?,
        };

        let data: Vec<NodeId> = cluster
            .nodes()
            .iter()
            .filter(|n| n.member().is_data_bearing())
            .map(|n| n.id())
            .collect();
        if cluster.nodes().len() != 2 || data.len() != 2 {
            return Err(HarnessError::Topology(format!(
                "initial sync needs exactly two data-bearing members, got {} of {}",
                data.len(),
                cluster.nodes().len()
            )));
        }

        let primary = cluster.get_primary().await?;
        let Some(&secondary) = data.iter().find(|n| **n != primary) else {
            return Err(HarnessError::Invariant(format!(
                "primary {primary} is not a data-bearing member"
            )));
        };
        cluster.await_replication().await?;

        let settings = &config.initial_sync;
        info!(
            name = %cluster.name(),
            %primary,
            %secondary,
            upstream = %settings.upstream_point,
            downstream = %settings.downstream_point,
            "initial sync controller ready"
        );
        Ok(Self {
            cluster,
            machine: StateMachine::new(InitialSyncState::BeforeInitialSync),
            checker: ConsistencyChecker::new(),
            points: settings.sync_points(),
            primary,
            secondary,
            attempts: settings.attempts,
            batch_limit: settings.batch_limit_operations,
            steps: 0,
        })
    }

    /// Current phase.
    pub fn state(&self) -> InitialSyncState {
        self.machine.current()
    }

    /// The sync source.
    pub fn primary(&self) -> NodeId {
        self.primary
    }

    /// The syncing node.
    pub fn secondary(&self) -> NodeId {
        self.secondary
    }

    /// Handshakes run so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// The underlying cluster.
    pub fn cluster(&self) -> &ClusterController {
        &self.cluster
    }

    /// The underlying cluster, for writes on the primary between steps.
    pub fn cluster_mut(&mut self) -> &mut ClusterController {
        &mut self.cluster
    }

    /// Advance the scenario by one step.
    ///
    /// The first call restarts the secondary with no data and leaves its
    /// initial sync paused. Every later call lets one command through.
    /// Returns `true` once the secondary has finished initial sync; calling
    /// again after that is an error.
    pub async fn step(&mut self) -> Result<bool, HarnessError> {
        match self.state() {
            InitialSyncState::BeforeInitialSync => {
                self.begin().await?;
                Ok(false)
            }
            InitialSyncState::DuringInitialSync => self.advance().await,
            other => Err(IllegalTransition {
                machine: InitialSyncState::MACHINE,
                from: other.name(),
                to: InitialSyncState::DuringInitialSync.name(),
            }
            .into()),
        }
    }

    async fn begin(&mut self) -> Result<(), HarnessError> {
        self.machine.ensure(InitialSyncState::DuringInitialSync)?;

        let mut options = StartOptions::default()
            .with_forced_failpoint(self.points.upstream())
            .with_parameter(PARAM_INITIAL_SYNC_ATTEMPTS, self.attempts);
        if let Some(limit) = self.batch_limit {
            options = options.with_parameter(PARAM_BATCH_LIMIT_OPERATIONS, limit);
        }
        self.cluster.restart_clean(self.secondary, &options).await?;

        let backend = Arc::clone(self.cluster.backend());
        let node = self.secondary;
        let message = self.points.upstream_paused_message();
        wait_until(
            &format!("{node} to start initial sync"),
            self.cluster.waits(),
            || probe_syncing(Arc::clone(&backend), node, message.clone()),
        )
        .await?;

        self.commit(InitialSyncState::DuringInitialSync)
    }

    async fn advance(&mut self) -> Result<bool, HarnessError> {
        let outcome = run_handshake(&self.cluster, self.secondary, &self.points.advance()).await?;
        self.steps += 1;
        debug!(step = self.steps, ?outcome, "initial sync step");
        if outcome == HandshakeOutcome::Paused {
            return Ok(false);
        }

        self.machine.ensure(InitialSyncState::InitialSyncCompleted)?;
        run_handshake(&self.cluster, self.secondary, &self.points.release()).await?;
        self.commit(InitialSyncState::InitialSyncCompleted)?;
        Ok(true)
    }

    /// Verify the syncing node matches the primary and stop both.
    pub async fn stop(&mut self) -> Result<(), HarnessError> {
        self.machine.ensure(InitialSyncState::Stopped)?;

        let open = self.cluster.open_transactions(self.primary).await?;
        if open > 0 {
            return Err(HarnessError::Invariant(format!(
                "{open} transactions still open on {}",
                self.primary
            )));
        }
        self.cluster.await_replication().await?;
        self.checker
            .check_all(&self.cluster, &[self.primary, self.secondary])
            .await?;
        self.cluster.stop_all().await?;
        self.commit(InitialSyncState::Stopped)
    }

    fn commit(&mut self, to: InitialSyncState) -> Result<(), HarnessError> {
        let from = self.machine.transition(to)?;
        info!(
            from = from.name(),
            to = to.name(),
            steps = self.steps,
            "initial sync transition"
        );
        Ok(())
    }
}

async fn probe_syncing(
    backend: Arc<dyn ReplicaSetBackend>,
    node: NodeId,
    message: String,
) -> Result<Probe<()>, HarnessError> {
    let status = backend.status(node).await?;
    if status.state == MemberState::Startup2 || backend.log_count(node, &message).await? > 0 {
        return Ok(Probe::Ready(()));
    }
    Ok(Probe::Pending(status.summary()))
}
