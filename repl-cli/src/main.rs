//! # faultline
//!
//! Runs rollback and initial-sync fault-injection scenarios against the
//! in-process replica-set simulator.
//!
//! ## Commands
//!
//! - `rollback`: Drive one or more rollback cycles with writes in every phase
//! - `initial-sync`: Step through a paused initial sync while writing to the primary
//!
//! ## Example
//!
//! ```bash
//! # Three rollback cycles, 20 writes per phase
//! faultline rollback --cycles 3 --writes 20
//!
//! # Initial sync with 100 documents written mid-sync
//! RUST_LOG=faultline_repl_harness=debug faultline initial-sync --docs 100
//!
//! # Custom timeouts and simulator tuning
//! faultline --config faultline.toml rollback
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repl_harness::HarnessConfig;

mod commands;

use commands::{initial_sync, rollback};

/// Fault-injection scenarios for replica-set rollback and initial sync.
#[derive(Parser, Debug)]
#[command(name = "faultline")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive rollback cycles on a primary, a secondary and an arbiter
    Rollback {
        /// Number of rollback cycles
        #[arg(long, default_value = "1")]
        cycles: u32,

        /// Documents written in each phase of a cycle
        #[arg(long, default_value = "10")]
        writes: usize,
    },

    /// Step through a paused initial sync of a wiped secondary
    InitialSync {
        /// Documents written to the primary while the secondary syncs
        #[arg(long, default_value = "100")]
        docs: usize,

        /// Documents written between two steps
        #[arg(long, default_value = "10")]
        per_step: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Rollback { cycles, writes } => {
            rollback::run(&config, cycles, writes).await?;
        }
        Commands::InitialSync { docs, per_step } => {
            initial_sync::run(&config, docs, per_step).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(HarnessConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn rollback_defaults() {
        let cli = Cli::try_parse_from(["faultline", "rollback"]).unwrap();
        assert!(cli.config.is_none());
        assert!(matches!(
            cli.command,
            Commands::Rollback {
                cycles: 1,
                writes: 10
            }
        ));
    }

    #[test]
    fn global_config_after_subcommand() {
        let cli = Cli::try_parse_from([
            "faultline",
            "initial-sync",
            "--docs",
            "5",
            "--config",
            "faultline.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("faultline.toml")));
        assert!(matches!(
            cli.command,
            Commands::InitialSync {
                docs: 5,
                per_step: 10
            }
        ));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = load_config(Some(std::path::Path::new("/nonexistent/faultline.toml")))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }
}
