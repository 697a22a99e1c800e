//! Post-condition checks across replica-set members.
//!
//! [`ConsistencyChecker`] reads oplogs and collections through the cluster
//! and hands them to the comparisons in `repl_core::consistency`. It never
//! writes, so running it twice on an idle cluster gives the same verdict.

use repl_core::{compare_collection_counts, compare_collections, compare_oplogs, NodeOplog};
use repl_types::{NodeId, OplogEntry};
use tracing::{debug, info};

use crate::cluster::ClusterController;
use crate::error::HarnessError;

/// Databases never compared: they hold per-node state.
const DEFAULT_EXCLUDED_DBS: &[&str] = &["local"];

/// Verifies that members agree on replicated state.
#[derive(Debug, Clone)]
pub struct ConsistencyChecker {
    excluded_dbs: Vec<String>,
}

impl Default for ConsistencyChecker {
    fn default() -> Self {
        Self {
            excluded_dbs: DEFAULT_EXCLUDED_DBS.iter().map(|db| db.to_string()).collect(),
        }
    }
}

impl ConsistencyChecker {
    /// Checker that skips the `local` database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also skip `db` when comparing collections.
    pub fn exclude_db(mut self, db: impl Into<String>) -> Self {
        self.excluded_dbs.push(db.into());
        self
    }

    fn excluded(&self) -> Vec<&str> {
        self.excluded_dbs.iter().map(String::as_str).collect()
    }

    /// Compare oplogs of `nodes` newest to oldest. Arbiters are skipped.
    pub async fn check_oplogs(
        &self,
        cluster: &ClusterController,
        nodes: &[NodeId],
    ) -> Result<(), HarnessError> {
        let mut oplogs: Vec<(NodeId, Vec<OplogEntry>)> = Vec::with_capacity(nodes.len());
        for &node in data_bearing(cluster, nodes)?.iter() {
            oplogs.push((node, cluster.oplog(node).await?));
        }
        let views: Vec<NodeOplog<'_>> = oplogs
            .iter()
            .map(|(node, entries)| NodeOplog {
                node: *node,
                entries,
            })
            .collect();
        compare_oplogs(&views)?;
        debug!(nodes = views.len(), "oplogs match");
        Ok(())
    }

    /// Compare per-collection digests of `nodes` against the first one.
    pub async fn check_data_hashes(
        &self,
        cluster: &ClusterController,
        nodes: &[NodeId],
    ) -> Result<(), HarnessError> {
        let nodes = data_bearing(cluster, nodes)?;
        let Some((&first, rest)) = nodes.split_first() else {
            return Ok(());
        };
        let excluded = self.excluded();
        let reference = cluster.collections(first).await?;
        for &node in rest {
            let other = cluster.collections(node).await?;
            compare_collections((first, &reference), (node, &other), &excluded)?;
        }
        debug!(collections = reference.len(), "data hashes match");
        Ok(())
    }

    /// Compare per-collection document counts of `nodes`.
    pub async fn check_collection_counts(
        &self,
        cluster: &ClusterController,
        nodes: &[NodeId],
    ) -> Result<(), HarnessError> {
        let nodes = data_bearing(cluster, nodes)?;
        let Some((&first, rest)) = nodes.split_first() else {
            return Ok(());
        };
        let excluded = self.excluded();
        let reference = cluster.collections(first).await?;
        for &node in rest {
            let other = cluster.collections(node).await?;
            compare_collection_counts((first, &reference), (node, &other), &excluded)?;
        }
        Ok(())
    }

    /// Oplogs, then counts, then data hashes.
    pub async fn check_all(
        &self,
        cluster: &ClusterController,
        nodes: &[NodeId],
    ) -> Result<(), HarnessError> {
        self.check_oplogs(cluster, nodes).await?;
        self.check_collection_counts(cluster, nodes).await?;
        self.check_data_hashes(cluster, nodes).await?;
        info!(nodes = ?nodes, "replica set is consistent");
        Ok(())
    }
}

fn data_bearing(cluster: &ClusterController, nodes: &[NodeId]) -> Result<Vec<NodeId>, HarnessError> {
    let mut kept = Vec::with_capacity(nodes.len());
    for &node in nodes {
        if cluster.node(node)?.member().is_data_bearing() {
            kept.push(node);
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimReplicaSet;
    use crate::poll::WaitPolicy;
    use repl_core::Divergence;
    use repl_types::{Document, MemberSpec, Namespace};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const N0: NodeId = NodeId::new(0);
    const N1: NodeId = NodeId::new(1);
    const N2: NodeId = NodeId::new(2);

    async fn replicated(docs: usize) -> ClusterController {
        let sim = Arc::new(SimReplicaSet::new("rs-check", 3, Default::default()));
        let waits = WaitPolicy::default().with_timeout(Duration::from_secs(5));
        let mut cluster = ClusterController::start(
            "rs-check",
            sim,
            vec![MemberSpec::data(), MemberSpec::data(), MemberSpec::arbiter()],
            waits,
        )
        .await
        .unwrap();
        let ns = Namespace::new("test", "c");
        for i in 0..docs {
            cluster
                .insert(N0, &ns, Document::new(format!("d{i:02}"), json!({ "i": i })))
                .await
                .unwrap();
        }
        cluster.await_replication().await.unwrap();
        cluster
    }

    #[tokio::test(start_paused = true)]
    async fn identical_nodes_are_consistent_twice() {
        let cluster = replicated(10).await;
        let checker = ConsistencyChecker::new();
        checker.check_all(&cluster, &[N0, N1, N2]).await.unwrap();
        checker.check_all(&cluster, &[N0, N1, N2]).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unreplicated_write_is_an_oplog_mismatch() {
        let mut cluster = replicated(2).await;
        cluster.isolate(N0, &[N1]).await.unwrap();
        cluster
            .insert(N0, &Namespace::new("test", "c"), Document::new("late", json!({})))
            .await
            .unwrap();

        let checker = ConsistencyChecker::new();
        // newest entries are compared first
        let err = checker.check_oplogs(&cluster, &[N0, N1]).await.unwrap_err();
        assert!(
            matches!(
                err,
                HarnessError::Inconsistent(Divergence::OplogMismatch { reference, other, .. })
                    if reference == N0 && other == N1
            ),
            "{err}"
        );

        let err = checker.check_collection_counts(&cluster, &[N0, N1]).await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Inconsistent(Divergence::CountMismatch { left_count: 3, right_count: 2, .. })
        ));
        let err = checker.check_data_hashes(&cluster, &[N0, N1]).await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Inconsistent(Divergence::CollectionMismatch { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn excluded_database_is_ignored() {
        let mut cluster = replicated(1).await;
        cluster.isolate(N0, &[N1]).await.unwrap();
        cluster
            .insert(N0, &Namespace::new("scratch", "c"), Document::new("x", json!({})))
            .await
            .unwrap();

        let checker = ConsistencyChecker::new().exclude_db("scratch");
        checker.check_data_hashes(&cluster, &[N0, N1]).await.unwrap();
        checker.check_collection_counts(&cluster, &[N0, N1]).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn arbiters_are_skipped() {
        let cluster = replicated(1).await;
        let checker = ConsistencyChecker::new();
        checker.check_oplogs(&cluster, &[N2]).await.unwrap();
        checker.check_data_hashes(&cluster, &[N2, N0]).await.unwrap();
    }
}
