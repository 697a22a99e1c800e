//! Runs a synchronization-point handshake against one node.

use std::sync::Arc;

use repl_core::HandshakeStep;
use repl_types::{paused_message, FailPointCommand, MemberState, NodeId};
use tracing::debug;

use crate::backend::ReplicaSetBackend;
use crate::cluster::ClusterController;
use crate::error::HarnessError;
use crate::poll::{wait_until, Probe};

/// How a handshake ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Every step ran; the node is paused again.
    Paused,
    /// The node reported `SECONDARY` while a step waited for a pause, so the
    /// background process has finished.
    Completed,
}

/// Execute `steps` in order on `node`.
///
/// Stops early with [`HandshakeOutcome::Completed`] as soon as a pause wait
/// sees the node finish instead.
pub async fn run_handshake(
    cluster: &ClusterController,
    node: NodeId,
    steps: &[HandshakeStep],
) -> Result<HandshakeOutcome, HarnessError> {
    for step in steps {
        debug!(%node, ?step, "handshake step");
        match step {
            HandshakeStep::Arm(name) => {
                cluster
                    .configure_failpoint(node, &FailPointCommand::arm(name.as_str()))
                    .await?;
            }
            HandshakeStep::Disarm(name) => {
                cluster
                    .configure_failpoint(node, &FailPointCommand::disarm(name.as_str()))
                    .await?;
            }
            HandshakeStep::AwaitPause(name) => {
                let backend = Arc::clone(cluster.backend());
                let message = paused_message(name);
                let what = format!("{node} to pause at {name}");
                let outcome = wait_until(&what, cluster.waits(), || {
                    probe_pause(Arc::clone(&backend), node, message.clone())
                })
                .await?;
                if outcome == HandshakeOutcome::Completed {
                    return Ok(outcome);
                }
            }
            HandshakeStep::ClearLog => cluster.clear_log(node).await?,
        }
    }
    Ok(HandshakeOutcome::Paused)
}

async fn probe_pause(
    backend: Arc<dyn ReplicaSetBackend>,
    node: NodeId,
    message: String,
) -> Result<Probe<HandshakeOutcome>, HarnessError> {
    if backend.log_count(node, &message).await? > 0 {
        return Ok(Probe::Ready(HandshakeOutcome::Paused));
    }
    let status = backend.status(node).await?;
    Ok(if status.state == MemberState::Secondary {
        Probe::Ready(HandshakeOutcome::Completed)
    } else {
        Probe::Pending(status.summary())
    })
}
