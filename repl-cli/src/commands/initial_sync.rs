//! Step through a paused initial sync.

use anyhow::{Context, Result};
use repl_harness::{HarnessConfig, InitialSyncController};
use repl_types::Namespace;
use tracing::info;

use super::write_batch;

/// Run the initial-sync command.
pub async fn run(config: &HarnessConfig, docs: usize, per_step: usize) -> Result<()> {
    let mut controller = InitialSyncController::start("faultline-initial-sync", None, config)
        .await
        .context("Failed to start replica set")?;
    let primary = controller.primary();
    let ns = Namespace::new("faultline", "initial_sync");
    println!("=== faultline initial-sync ===");
    println!("Set:       {}", controller.cluster().name());
    println!("Primary:   {primary}");
    println!("Syncing:   {}", controller.secondary());
    println!();

    controller.step().await?;
    let mut written = 0;
    loop {
        let batch = per_step.min(docs - written);
        write_batch(controller.cluster(), primary, &ns, &format!("s{}", controller.steps()), batch)
            .await?;
        written += batch;
        if controller.step().await? {
            break;
        }
    }
    info!(steps = controller.steps(), written, "initial sync completed");

    let remaining = docs - written;
    write_batch(controller.cluster(), primary, &ns, "after", remaining).await?;
    controller.stop().await?;

    println!("Steps:     {}", controller.steps());
    println!("Written:   {written} during sync, {remaining} after");
    println!();
    println!("Initial sync completed; data consistent on both members.");
    Ok(())
}
