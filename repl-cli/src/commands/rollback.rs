//! Run rollback cycles.

use anyhow::{Context, Result};
use repl_harness::{HarnessConfig, RollbackController};
use repl_types::Namespace;
use tracing::info;

use super::write_batch;

/// Run the rollback command.
pub async fn run(config: &HarnessConfig, cycles: u32, writes: usize) -> Result<()> {
    let mut controller = RollbackController::start("faultline-rollback", None, config)
        .await
        .context("Failed to start replica set")?;
    let ns = Namespace::new("faultline", "rollback");
    println!("=== faultline rollback ===");
    println!("Set:         {}", controller.cluster().name());
    println!("Primary:     {}", controller.primary());
    println!("Secondary:   {}", controller.secondary());
    println!("Tie breaker: {}", controller.tie_breaker());
    println!();

    for cycle in 1..=cycles {
        let rollback_node = controller.transition_to_rollback_operations().await?;
        write_batch(controller.cluster(), rollback_node, &ns, &format!("c{cycle}-lost"), writes)
            .await?;

        let sync_source = controller
            .transition_to_sync_source_operations_before_rollback()
            .await?;
        write_batch(controller.cluster(), sync_source, &ns, &format!("c{cycle}-kept"), writes)
            .await?;

        controller
            .transition_to_sync_source_operations_during_rollback()
            .await?;
        write_batch(controller.cluster(), sync_source, &ns, &format!("c{cycle}-during"), writes)
            .await?;

        controller.transition_to_steady_state_operations().await?;
        let rbid = controller.cluster_mut().rbid(rollback_node).await?;
        info!(cycle, %rollback_node, %rbid, "rollback cycle complete");
        println!(
            "Cycle {cycle}: {rollback_node} rolled back {} writes (rbid {rbid}), new primary {sync_source}",
            rolled_back(writes)
        );
    }

    controller.stop().await?;
    println!();
    println!("{cycles} rollback cycles completed; data consistent on every member.");
    Ok(())
}

/// Writes discarded per cycle: the caller's plus the controller's own.
fn rolled_back(writes: usize) -> usize {
    writes + RollbackController::GUARANTEED_WRITES
}
