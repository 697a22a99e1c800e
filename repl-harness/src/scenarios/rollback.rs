//! Rollback scenarios.

use std::sync::Arc;

use repl_core::RollbackState;
use repl_types::{MemberState, NodeId, Rbid, StartOptions};

use super::{config, doc, ids, test_ns};
use crate::backend::SimReplicaSet;
use crate::cluster::ClusterController;
use crate::error::HarnessError;
use crate::poll::WaitPolicy;
use crate::rollback::RollbackController;

async fn rollback_on(name: &str) -> (Arc<SimReplicaSet>, RollbackController) {
    let config = config();
    let sim = Arc::new(SimReplicaSet::new(name, 3, config.sim.clone()));
    let cluster = ClusterController::start(
        name,
        sim.clone(),
        RollbackController::default_members(),
        WaitPolicy::from_config(&config.waits),
    )
    .await
    .unwrap();
    let controller = RollbackController::start(name, Some(cluster), &config)
        .await
        .unwrap();
    (sim, controller)
}

async fn insert_many(controller: &RollbackController, node: NodeId, prefix: &str, count: usize) {
    for i in 0..count {
        controller
            .cluster()
            .insert(node, &test_ns(), doc(format!("{prefix}-{i}"), i))
            .await
            .unwrap();
    }
}

// ============================================================================
// Full cycles
// ============================================================================

/// Writes made on the isolated primary are rolled back; everything the sync
/// source accepted survives on both data-bearing nodes.
#[tokio::test(start_paused = true)]
async fn rollback_cycle_discards_divergent_writes() {
    let (_sim, mut controller) = rollback_on("rs-rollback-cycle").await;
    let original_primary = controller.primary();
    insert_many(&controller, original_primary, "before", 3).await;

    let rollback_node = controller.transition_to_rollback_operations().await.unwrap();
    assert_eq!(rollback_node, original_primary);
    insert_many(&controller, rollback_node, "lost", 5).await;

    let sync_source = controller
        .transition_to_sync_source_operations_before_rollback()
        .await
        .unwrap();
    assert_ne!(sync_source, rollback_node);
    assert_eq!(controller.primary(), sync_source);
    assert_eq!(controller.secondary(), rollback_node);
    insert_many(&controller, sync_source, "kept", 4).await;

    controller
        .transition_to_sync_source_operations_during_rollback()
        .await
        .unwrap();
    insert_many(&controller, sync_source, "during", 2).await;

    controller.transition_to_steady_state_operations().await.unwrap();
    assert_eq!(controller.state(), RollbackState::SteadyStateOps);
    assert_eq!(controller.cycles(), 1);

    let rbid = controller.cluster_mut().rbid(rollback_node).await.unwrap();
    assert_eq!(rbid, Rbid::INITIAL.next());

    let on_rollback_node = controller.cluster().collections(rollback_node).await.unwrap();
    let on_sync_source = controller.cluster().collections(sync_source).await.unwrap();
    assert_eq!(on_rollback_node, on_sync_source);

    let surviving = ids(&on_sync_source[&test_ns()]);
    assert_eq!(surviving.len(), 3 + 4 + 2);
    assert!(surviving.iter().all(|id| !id.starts_with("lost")));
    assert!(surviving.contains(&"kept-3".to_string()));

    controller.stop().await.unwrap();
    assert_eq!(controller.state(), RollbackState::Stopped);
}

/// Each cycle moves the primary to the other data-bearing node and bumps the
/// rollback node's RBID by exactly one.
#[tokio::test(start_paused = true)]
async fn consecutive_cycles_alternate_the_rollback_node() {
    let (_sim, mut controller) = rollback_on("rs-rollback-twice").await;
    let first = controller.primary();
    let second = controller.secondary();

    for (cycle, rollback_node) in [first, second].into_iter().enumerate() {
        let node = controller.transition_to_rollback_operations().await.unwrap();
        assert_eq!(node, rollback_node);
        insert_many(&controller, node, &format!("lost{cycle}"), 2).await;
        let primary = controller
            .transition_to_sync_source_operations_before_rollback()
            .await
            .unwrap();
        insert_many(&controller, primary, &format!("kept{cycle}"), 2).await;
        controller
            .transition_to_sync_source_operations_during_rollback()
            .await
            .unwrap();
        controller.transition_to_steady_state_operations().await.unwrap();
    }

    assert_eq!(controller.cycles(), 2);
    assert_eq!(controller.primary(), first);
    let cluster = controller.cluster_mut();
    assert_eq!(cluster.rbid(first).await.unwrap(), Rbid::INITIAL.next());
    assert_eq!(cluster.rbid(second).await.unwrap(), Rbid::INITIAL.next());
    let status = cluster.status(first).await.unwrap();
    assert_eq!(status.state, MemberState::Primary);
    assert_eq!(status.term, 3);

    controller.stop().await.unwrap();
}

/// Skipping the during-rollback phase still reconnects the rollback node and
/// waits for its rollback.
#[tokio::test(start_paused = true)]
async fn deprecated_shortcut_reconnects_first() {
    let (sim, mut controller) = rollback_on("rs-rollback-shortcut").await;
    let rollback_node = controller.transition_to_rollback_operations().await.unwrap();
    insert_many(&controller, rollback_node, "lost", 1).await;
    controller
        .transition_to_sync_source_operations_before_rollback()
        .await
        .unwrap();
    assert!(!sim.network().await.is_fully_connected());

    controller.transition_to_steady_state_operations().await.unwrap();

    assert!(sim.network().await.is_fully_connected());
    assert!(controller.cluster().topology().reachability().is_fully_connected());
    assert_eq!(
        controller.cluster_mut().rbid(rollback_node).await.unwrap(),
        Rbid::INITIAL.next()
    );
}

// ============================================================================
// Restarts and failures
// ============================================================================

/// A member restarted mid-cycle keeps its data and its cut links.
#[tokio::test(start_paused = true)]
async fn restart_mid_cycle_keeps_partitions() {
    let (sim, mut controller) = rollback_on("rs-rollback-restart").await;
    controller.transition_to_rollback_operations().await.unwrap();
    let secondary = controller.secondary();
    let network = sim.network().await;

    controller
        .restart_node(secondary, &StartOptions::default())
        .await
        .unwrap();
    assert_eq!(sim.network().await, network);

    controller
        .transition_to_sync_source_operations_before_rollback()
        .await
        .unwrap();
    controller
        .transition_to_sync_source_operations_during_rollback()
        .await
        .unwrap();
    controller.transition_to_steady_state_operations().await.unwrap();
    assert_eq!(controller.primary(), secondary);
}

/// A wait that cannot be satisfied reports what it last saw.
#[tokio::test(start_paused = true)]
async fn unreachable_rollback_node_times_out_with_status() {
    let mut config = config();
    config.waits.timeout_secs = 5;
    let mut controller = RollbackController::start("rs-rollback-timeout", None, &config)
        .await
        .unwrap();
    let rollback_node = controller.transition_to_rollback_operations().await.unwrap();
    controller
        .transition_to_sync_source_operations_before_rollback()
        .await
        .unwrap();
    // with every process down the rollback can never finish
    controller.cluster_mut().stop_all().await.unwrap();

    let err = controller
        .transition_to_steady_state_operations()
        .await
        .unwrap_err();
    match err {
        HarnessError::Timeout {
            what,
            last_observed,
            ..
        } => {
            assert!(what.contains(&rollback_node.to_string()), "{what}");
            assert!(last_observed.contains("not running"), "{last_observed}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        controller.state(),
        RollbackState::SyncSourceOpsBeforeRollback
    );
}
