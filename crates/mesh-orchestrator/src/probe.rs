//! Health probe loop
//!
//! Every tick probes all nodes concurrently. Probe outcomes only ever mutate
//! node metrics; nothing is returned to request callers.

use crate::metrics::OrchestratorMetrics;
use crate::recovery::RecoveryManager;
use crate::registry::{NodeEntry, NodeRegistry};
use chrono::Utc;
use futures::future::join_all;
use mesh_core::{Error, HealthReport, NodeStatus, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct HealthProber {
    registry: Arc<NodeRegistry>,
    recovery: Arc<RecoveryManager>,
    metrics: Arc<OrchestratorMetrics>,
    timeout: Duration,
    offline_threshold: u32,
}

impl HealthProber {
    pub fn new(
        registry: Arc<NodeRegistry>,
        recovery: Arc<RecoveryManager>,
        metrics: Arc<OrchestratorMetrics>,
        timeout: Duration,
        offline_threshold: u32,
    ) -> Self {
        Self {
            registry,
            recovery,
            metrics,
            timeout,
            offline_threshold,
        }
    }

    /// Probe every node once, concurrently
    pub async fn probe_all(&self) {
        let probes = self
            .registry
            .entries()
            .iter()
            .map(|entry| self.probe_node(entry));
        join_all(probes).await;
    }

    /// Probe one node and fold the outcome into its metrics.
    ///
    /// Returns the resulting status, or `None` when a probe of this node was
    /// already in flight and this one was skipped.
    pub async fn probe_node(&self, entry: &NodeEntry) -> Option<NodeStatus> {
        let Some(_slot) = entry.try_begin_probe() else {
            debug!(node = %entry.name(), "Probe already in flight, skipping");
            return None;
        };

        let started = Instant::now();
        let outcome = self.check(entry).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let status = match outcome {
            Ok(report) => self.record_success(entry, report, latency_ms),
            Err(e) => {
                let status = self.record_failure(entry, &e);
                self.recovery.consider(entry);
                status
            }
        };

        Some(status)
    }

    async fn check(&self, entry: &NodeEntry) -> Result<HealthReport> {
        tokio::time::timeout(self.timeout, entry.transport.health(self.timeout))
            .await
            .unwrap_or_else(|_| {
                Err(Error::probe_timeout(format!(
                    "{}: no reply within {:?}",
                    entry.name(),
                    self.timeout
                )))
            })
    }

    fn record_success(&self, entry: &NodeEntry, report: HealthReport, latency_ms: f64) -> NodeStatus {
        let previous = entry.with_metrics(|m| {
            let previous = m.status;
            m.status = NodeStatus::Online;
            m.recent_latencies.push(latency_ms);
            m.last_check = Some(Utc::now());
            m.consecutive_failures = m.consecutive_failures.saturating_sub(1);
            m.advertised_models = report.models;
            previous
        });

        if previous != NodeStatus::Online {
            info!(node = %entry.name(), from = %previous, latency_ms, "Node is online");
        } else {
            debug!(node = %entry.name(), latency_ms, "Probe succeeded");
        }
        self.metrics.record_probe(entry.name(), "success", true);

        NodeStatus::Online
    }

    fn record_failure(&self, entry: &NodeEntry, error: &Error) -> NodeStatus {
        let (previous, status, failures) = entry.with_metrics(|m| {
            let previous = m.status;
            m.consecutive_failures += 1;
            m.status = if m.consecutive_failures >= self.offline_threshold {
                NodeStatus::Offline
            } else {
                NodeStatus::Degraded
            };
            m.last_check = Some(Utc::now());
            (previous, m.status, m.consecutive_failures)
        });

        if previous != status {
            warn!(
                node = %entry.name(),
                from = %previous,
                to = %status,
                consecutive_failures = failures,
                error = %error,
                "Node status changed"
            );
        } else {
            debug!(node = %entry.name(), consecutive_failures = failures, error = %error, "Probe failed");
        }
        self.metrics.record_probe(entry.name(), error.category(), false);

        status
    }

    /// Run `probe_all` every `period` until `shutdown` fires or its sender is dropped.
    ///
    /// The first tick happens one period after spawning.
    pub fn spawn(self: Arc<Self>, period: Duration, mut shutdown: oneshot::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(interval = ?period, "Health probe loop started");
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = self.probe_all() => {}
                }
            }
            info!("Health probe loop stopped");
        })
    }
}
