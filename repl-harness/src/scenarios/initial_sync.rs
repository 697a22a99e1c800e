//! Initial-sync scenarios.

use std::sync::Arc;

use repl_core::{CollectionSet, InitialSyncState};
use repl_types::{DocId, MemberState, Namespace, WriteOp};

use super::{config, doc, ids, test_ns};
use crate::backend::SimReplicaSet;
use crate::cluster::ClusterController;
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::initial_sync::InitialSyncController;
use crate::poll::WaitPolicy;

async fn initial_sync_on(
    name: &str,
    config: &HarnessConfig,
) -> (Arc<SimReplicaSet>, InitialSyncController) {
    let sim = Arc::new(
        SimReplicaSet::new(name, 2, config.sim.clone())
            .with_sync_points(config.initial_sync.sync_points()),
    );
    let cluster = ClusterController::start(
        name,
        sim.clone(),
        InitialSyncController::default_members(),
        WaitPolicy::from_config(&config.waits),
    )
    .await
    .unwrap();
    let controller = InitialSyncController::start(name, Some(cluster), config)
        .await
        .unwrap();
    (sim, controller)
}

async fn run_to_completion(controller: &mut InitialSyncController) -> usize {
    let mut steps = 0;
    while !controller.step().await.unwrap() {
        steps += 1;
        assert!(steps < 500, "initial sync never completed");
    }
    steps
}

// ============================================================================
// Writes between steps
// ============================================================================

/// 100 documents land on the donor while the secondary clones and fetches;
/// the secondary ends up with exactly the donor's data.
#[tokio::test(start_paused = true)]
async fn inserts_during_initial_sync_reach_the_secondary() {
    let config = config();
    let (_sim, mut controller) = initial_sync_on("rs-sync-inserts", &config).await;
    let primary = controller.primary();
    let secondary = controller.secondary();
    for i in 0..40 {
        controller
            .cluster()
            .insert(primary, &test_ns(), doc(format!("seed-{i:03}"), i))
            .await
            .unwrap();
    }

    assert!(!controller.step().await.unwrap());
    assert_eq!(controller.state(), InitialSyncState::DuringInitialSync);

    let mut inserted = 0;
    let mut done = false;
    while !done {
        if inserted < 100 {
            for _ in 0..10 {
                controller
                    .cluster()
                    .insert(primary, &test_ns(), doc(format!("mid-{inserted:03}"), inserted))
                    .await
                    .unwrap();
                inserted += 1;
            }
        }
        done = controller.step().await.unwrap();
        assert!(controller.steps() < 500, "initial sync never completed");
    }
    assert_eq!(inserted, 100);
    assert_eq!(controller.state(), InitialSyncState::InitialSyncCompleted);

    controller.cluster_mut().await_replication().await.unwrap();
    let on_primary = controller.cluster().collections(primary).await.unwrap();
    let on_secondary = controller.cluster().collections(secondary).await.unwrap();
    assert_eq!(on_primary, on_secondary);
    assert_eq!(ids(&on_secondary[&test_ns()]).len(), 140);
    assert_eq!(
        controller.cluster_mut().status(secondary).await.unwrap().state,
        MemberState::Secondary
    );

    controller.stop().await.unwrap();
    assert_eq!(controller.state(), InitialSyncState::Stopped);
}

fn count_in(collections: &CollectionSet, ns: &Namespace) -> usize {
    collections.get(ns).map_or(0, |docs| docs.len())
}

/// All 100 documents land while the secondary is paused right after its last
/// clone batch, so they can only arrive through oplog fetching.
#[tokio::test(start_paused = true)]
async fn inserts_after_clone_arrive_by_oplog_fetch() {
    let mut config = config();
    config.sim.apply_batch_size = 30;
    let (_sim, mut controller) = initial_sync_on("rs-sync-after-clone", &config).await;
    let primary = controller.primary();
    let secondary = controller.secondary();
    // 40 is not a multiple of the clone batch size, so the last batch is short
    for i in 0..40 {
        controller
            .cluster()
            .insert(primary, &test_ns(), doc(format!("seed-{i:03}"), i))
            .await
            .unwrap();
    }

    controller.step().await.unwrap();
    loop {
        assert!(!controller.step().await.unwrap(), "finished before cloning ended");
        let cloned = controller.cluster().collections(secondary).await.unwrap();
        if count_in(&cloned, &test_ns()) == 40 {
            break;
        }
        assert!(controller.steps() < 500, "clone never finished");
    }

    for i in 0..100 {
        controller
            .cluster()
            .insert(primary, &test_ns(), doc(format!("late-{i:03}"), i))
            .await
            .unwrap();
    }
    let paused = controller.cluster().collections(secondary).await.unwrap();
    assert_eq!(count_in(&paused, &test_ns()), 40);

    let mut fetched_while_syncing = 0;
    while !controller.step().await.unwrap() {
        let partial = controller.cluster().collections(secondary).await.unwrap();
        fetched_while_syncing = fetched_while_syncing.max(count_in(&partial, &test_ns()));
        assert!(controller.steps() < 500, "initial sync never completed");
    }
    assert!(fetched_while_syncing > 40, "no oplog batch applied before completion");

    let synced = controller.cluster().collections(secondary).await.unwrap();
    assert_eq!(count_in(&synced, &test_ns()), 140);
    assert_eq!(synced, controller.cluster().collections(primary).await.unwrap());
    assert_eq!(
        controller.cluster_mut().status(secondary).await.unwrap().state,
        MemberState::Secondary
    );
    controller.stop().await.unwrap();
}

/// Updates, deletes and new collections between steps are all applied.
#[tokio::test(start_paused = true)]
async fn mixed_writes_during_initial_sync() {
    let mut config = config();
    config.sim.clone_batch_size = 4;
    config.initial_sync.batch_limit_operations = Some(3);
    let (_sim, mut controller) = initial_sync_on("rs-sync-mixed", &config).await;
    let primary = controller.primary();
    let cluster_ns = test_ns();
    for i in 0..12 {
        controller
            .cluster()
            .insert(primary, &cluster_ns, doc(format!("d{i:02}"), i))
            .await
            .unwrap();
    }

    controller.step().await.unwrap();
    let mut round = 0;
    loop {
        let cluster = controller.cluster();
        match round {
            1 => {
                cluster
                    .write(primary, &cluster_ns, WriteOp::Update(doc("d00", 100)))
                    .await
                    .unwrap();
            }
            2 => {
                cluster
                    .write(primary, &cluster_ns, WriteOp::Delete(DocId::new("d11")))
                    .await
                    .unwrap();
            }
            3 => {
                cluster
                    .insert(primary, &Namespace::new("other", "late"), doc("x", 1))
                    .await
                    .unwrap();
            }
            4 => {
                cluster
                    .write(primary, &cluster_ns, WriteOp::Delete(DocId::new("d01")))
                    .await
                    .unwrap();
            }
            _ => {}
        }
        round += 1;
        if controller.step().await.unwrap() {
            break;
        }
        assert!(round < 500, "initial sync never completed");
    }

    controller.stop().await.unwrap();
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Stop refuses to tear down while the primary has an open transaction.
#[tokio::test(start_paused = true)]
async fn stop_with_open_transaction_fails() {
    let config = config();
    let (sim, mut controller) = initial_sync_on("rs-sync-txn", &config).await;
    run_to_completion(&mut controller).await;

    let primary = controller.primary();
    sim.begin_transaction(primary).await.unwrap();
    let err = controller.stop().await.unwrap_err();
    assert!(matches!(err, HarnessError::Invariant(_)), "{err}");
    assert_eq!(controller.state(), InitialSyncState::InitialSyncCompleted);

    sim.commit_transaction(primary).await.unwrap();
    controller.stop().await.unwrap();
}

/// The syncing node gets the configured startup parameters.
#[tokio::test(start_paused = true)]
async fn restart_uses_configured_sync_points() {
    let config = config();
    let (_sim, mut controller) = initial_sync_on("rs-sync-points", &config).await;
    controller.step().await.unwrap();

    let secondary = controller.secondary();
    let message = repl_types::paused_message(&config.initial_sync.upstream_point);
    assert_eq!(
        controller
            .cluster()
            .log_count(secondary, &message)
            .await
            .unwrap(),
        1
    );
    assert!(run_to_completion(&mut controller).await > 0);
}

/// Renamed pause points are the ones the syncing node honours.
#[tokio::test(start_paused = true)]
async fn renamed_sync_points_pause_and_complete() {
    let mut config = config();
    config.initial_sync.upstream_point = "customPointUp".to_string();
    config.initial_sync.downstream_point = "customPointDown".to_string();
    let mut controller = InitialSyncController::start("rs-sync-renamed", None, &config)
        .await
        .unwrap();
    let primary = controller.primary();
    for i in 0..5 {
        controller
            .cluster()
            .insert(primary, &test_ns(), doc(format!("d{i}"), i))
            .await
            .unwrap();
    }

    assert!(!controller.step().await.unwrap());
    let secondary = controller.secondary();
    assert_eq!(
        controller
            .cluster()
            .log_count(secondary, &repl_types::paused_message("customPointUp"))
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        controller.cluster_mut().status(secondary).await.unwrap().state,
        MemberState::Startup2
    );

    assert!(run_to_completion(&mut controller).await > 0);
    controller.stop().await.unwrap();
    assert_eq!(controller.state(), InitialSyncState::Stopped);
}
