//! Local process recovery
//!
//! Decides when a locally-managed node should be restarted and hands the
//! restart to a [`ProcessRestarter`]. The restart runs as a detached task and
//! its failures are only logged.

use crate::metrics::OrchestratorMetrics;
use crate::registry::NodeEntry;
use mesh_core::{InferenceNode, NodeMetrics, ProcessRestarter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct RecoveryManager {
    restarter: Arc<dyn ProcessRestarter>,
    threshold: u32,
    cooldown: Duration,
    metrics: Arc<OrchestratorMetrics>,
}

impl RecoveryManager {
    pub fn new(
        restarter: Arc<dyn ProcessRestarter>,
        threshold: u32,
        cooldown: Duration,
        metrics: Arc<OrchestratorMetrics>,
    ) -> Self {
        Self {
            restarter,
            threshold,
            cooldown,
            metrics,
        }
    }

    /// Whether a restart is due for this node at `now`
    pub fn should_attempt(&self, node: &InferenceNode, metrics: &NodeMetrics, now: Instant) -> bool {
        node.locally_managed
            && metrics.consecutive_failures >= self.threshold
            && metrics
                .last_recovery_attempt
                .map_or(true, |last| now.saturating_duration_since(last) >= self.cooldown)
    }

    /// Check the node after a failure and spawn a restart if one is due.
    ///
    /// The attempt time is recorded before the restart starts, so the cooldown
    /// applies whether or not the restart succeeds.
    pub fn consider(&self, entry: &NodeEntry) -> Option<JoinHandle<()>> {
        let now = tokio::time::Instant::now().into_std();
        let failures = entry.with_metrics(|m| {
            if self.should_attempt(&entry.node, m, now) {
                m.last_recovery_attempt = Some(now);
                Some(m.consecutive_failures)
            } else {
                None
            }
        })?;

        warn!(
            node = %entry.name(),
            consecutive_failures = failures,
            "Triggering local process restart"
        );

        let restarter = Arc::clone(&self.restarter);
        let metrics = Arc::clone(&self.metrics);
        let node = entry.node.clone();

        Some(tokio::spawn(async move {
            match restarter.restart(&node).await {
                Ok(()) => {
                    info!(node = %node.name, "Local process restart completed");
                    metrics.record_recovery(&node.name, "success");
                }
                Err(e) => {
                    error!(node = %node.name, error = %e, "Recovery action failed");
                    metrics.record_recovery(&node.name, "failure");
                }
            }
        }))
    }
}
