// =============================================================================
// NODE SIMULATOR: simulator.rs
// Batch driver: one independent session per node index in START..END
// =============================================================================

use crate::config::{NodeIdentity, SimulatorConfig};
use crate::error::Result;
use crate::session::{NodeSession, SessionEnd, SessionReport};
use std::sync::Arc;
use tokio::task::JoinSet;

pub type NodeOutcome = (NodeIdentity, Result<SessionReport>);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub nodes: usize,
    pub failed_to_connect: usize,
    pub closed_by_command: usize,
    pub closed_by_peer: usize,
    pub transport_errors: usize,
    pub routes_sent: u64,
    pub hi_replies: u64,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[NodeOutcome]) -> Self {
        let mut summary = BatchSummary { nodes: outcomes.len(), ..Default::default() };
        for (_, outcome) in outcomes {
            match outcome {
                Ok(report) => {
                    summary.routes_sent += report.routes_sent;
                    summary.hi_replies += report.hi_replies;
                    match report.end {
                        SessionEnd::CloseCommand => summary.closed_by_command += 1,
                        SessionEnd::ClosedByPeer => summary.closed_by_peer += 1,
                        SessionEnd::TransportError(_) => summary.transport_errors += 1,
                    }
                }
                Err(_) => summary.failed_to_connect += 1,
            }
        }
        summary
    }
}

/// Launches every node of the configured range and waits for all of them.
/// A node that fails to connect is reported and does not disturb the rest.
pub async fn run_batch(config: Arc<SimulatorConfig>) -> Vec<NodeOutcome> {
    let mut sessions = JoinSet::new();
    for identity in config.identities() {
        let config = Arc::clone(&config);
        sessions.spawn(async move {
            let outcome = run_node(identity.clone(), config).await;
            (identity, outcome)
        });
    }

    let mut outcomes = Vec::with_capacity(config.range.len());
    while let Some(joined) = sessions.join_next().await {
        match joined {
            Ok((identity, outcome)) => {
                match &outcome {
                    Ok(report) => log::info!(
                        "[{}] routes={} hi={} frames={}",
                        report.node_id,
                        report.routes_sent,
                        report.hi_replies,
                        report.frames_received
                    ),
                    Err(e) => log::error!("[{}] ❌ Session failed: {}", identity.node_id, e),
                }
                outcomes.push((identity, outcome));
            }
            Err(e) => log::error!("❌ Session task aborted: {}", e),
        }
    }

    outcomes.sort_by_key(|(identity, _)| identity.index);
    outcomes
}

async fn run_node(identity: NodeIdentity, config: Arc<SimulatorConfig>) -> Result<SessionReport> {
    let session = NodeSession::connect(identity, config).await?;
    log::debug!("[{}] Session running", session.node_id());
    Ok(session.run().await)
}
