//! End-to-end scenarios against the simulated replica set.
//!
//! - `rollback` - Full rollback cycles, repeated cycles, the deprecated
//!   shortcut and restarts mid-cycle
//! - `initial_sync` - Paused initial sync with writes between every step
//! - `network` - Partition bookkeeping against the simulator's network
//!
//! Every scenario runs on a paused tokio clock, so waits cost no wall time.

mod initial_sync;
mod network;
mod rollback;

use serde_json::json;

use crate::config::HarnessConfig;
use repl_types::{Document, Namespace};

/// Defaults with a timeout short enough to fail fast when a scenario hangs.
fn config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.waits.timeout_secs = 60;
    config
}

fn test_ns() -> Namespace {
    Namespace::new("test", "coll")
}

fn doc(id: impl Into<String>, n: usize) -> Document {
    Document::new(id, json!({ "n": n, "payload": "x".repeat(n % 7) }))
}

fn ids(docs: &[Document]) -> Vec<String> {
    docs.iter().map(|d| d.id.as_str().to_string()).collect()
}
