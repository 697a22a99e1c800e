//! Partition bookkeeping against the simulator's own network.

use std::sync::Arc;

use repl_types::{MemberSpec, MemberState, NodeId, Role};

use super::config;
use crate::backend::SimReplicaSet;
use crate::cluster::ClusterController;
use crate::poll::WaitPolicy;

const N0: NodeId = NodeId::new(0);
const N1: NodeId = NodeId::new(1);
const N2: NodeId = NodeId::new(2);

async fn three_members(name: &str) -> (Arc<SimReplicaSet>, ClusterController) {
    let config = config();
    let sim = Arc::new(SimReplicaSet::new(name, 3, config.sim.clone()));
    let cluster = ClusterController::start(
        name,
        sim.clone(),
        vec![MemberSpec::data(), MemberSpec::data(), MemberSpec::arbiter()],
        WaitPolicy::from_config(&config.waits),
    )
    .await
    .unwrap();
    (sim, cluster)
}

/// Isolating twice leaves exactly the links of the first call cut.
#[tokio::test(start_paused = true)]
async fn reisolating_is_a_noop() {
    let (sim, mut cluster) = three_members("rs-net-reisolate").await;
    cluster.isolate(N0, &[N1, N2]).await.unwrap();
    let once = sim.network().await;
    cluster.isolate(N0, &[N1, N2]).await.unwrap();
    assert_eq!(sim.network().await, once);
    assert_eq!(once.unreachable_from(N0), vec![N1, N2]);
    assert!(once.can_reach(N1, N2));
}

/// Reconnecting a member that was never isolated changes nothing.
#[tokio::test(start_paused = true)]
async fn reconnecting_untouched_member_is_a_noop() {
    let (sim, mut cluster) = three_members("rs-net-untouched").await;
    cluster.isolate(N0, &[N1]).await.unwrap();
    cluster.reconnect(N2, &[N1]).await.unwrap();
    let network = sim.network().await;
    assert!(!network.can_reach(N0, N1));
    assert!(network.can_reach(N2, N1));
    assert_eq!(cluster.topology().reachability(), &network);
}

/// A fully isolated primary steps down on its own; reconnecting restores a
/// single primary.
#[tokio::test(start_paused = true)]
async fn isolated_primary_steps_down_and_rejoins() {
    let (_sim, mut cluster) = three_members("rs-net-isolated").await;
    cluster.isolate(N0, &[N1, N2]).await.unwrap();
    cluster.wait_for_role(N0, Role::Secondary, None).await.unwrap();

    cluster.reconnect(N0, &[N1, N2]).await.unwrap();
    cluster.step_up_and_wait(N1).await.unwrap();
    assert_eq!(cluster.get_primary().await.unwrap(), N1);
    cluster.await_secondary_nodes().await.unwrap();
    let status = cluster
        .wait_for_state(N0, &[MemberState::Secondary], None)
        .await
        .unwrap();
    assert_eq!(status.term, 2);
}
