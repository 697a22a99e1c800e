//! CLI command implementations.

pub mod initial_sync;
pub mod rollback;

use anyhow::Result;
use repl_harness::ClusterController;
use repl_types::{Document, Namespace, NodeId};
use serde_json::json;

/// Insert `count` documents named `{prefix}-{i}` on `node`.
pub async fn write_batch(
    cluster: &ClusterController,
    node: NodeId,
    ns: &Namespace,
    prefix: &str,
    count: usize,
) -> Result<()> {
    for i in 0..count {
        let doc = Document::new(format!("{prefix}-{i:05}"), json!({ "i": i, "prefix": prefix }));
        cluster.insert(node, ns, doc).await?;
    }
    Ok(())
}
