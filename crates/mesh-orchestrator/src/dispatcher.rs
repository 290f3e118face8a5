//! Request dispatch with failover
//!
//! A generate call selects the best node, runs one attempt against it and, on
//! failure, retries on a different node until the attempt budget is spent.
//! Every attempt is folded into the chosen node's metrics.

use crate::metrics::OrchestratorMetrics;
use crate::recovery::RecoveryManager;
use crate::registry::{NodeEntry, NodeRegistry};
use crate::selector::Selector;
use mesh_core::{Error, GenerateRequest, GenerateResult, NodeStatus, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub struct Dispatcher {
    registry: Arc<NodeRegistry>,
    selector: Selector,
    recovery: Arc<RecoveryManager>,
    metrics: Arc<OrchestratorMetrics>,
    timeout: Duration,
    max_attempts: u32,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<NodeRegistry>,
        selector: Selector,
        recovery: Arc<RecoveryManager>,
        metrics: Arc<OrchestratorMetrics>,
        timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            registry,
            selector,
            recovery,
            metrics,
            timeout,
            max_attempts,
        }
    }

    /// Run a generate call.
    ///
    /// `request.max_retries` (or the configured default) is the total number
    /// of attempts. A node that failed is not selected again within the same
    /// call, and an error that is not retryable ends the call at once.
    /// Returns [`Error::NoNodesAvailable`] when no node was eligible for the
    /// first attempt and [`Error::AllNodesFailed`] once attempts or eligible
    /// nodes run out after at least one failure.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResult> {
        let max_attempts = request.max_retries.unwrap_or(self.max_attempts).max(1);
        let mut excluded = HashSet::new();
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < max_attempts {
            let Some(index) = self.selector.select(&self.registry, &request.model, &excluded)
            else {
                break;
            };
            let Some(entry) = self.registry.get(index) else {
                break;
            };
            attempts += 1;

            debug!(node = %entry.name(), attempt = attempts, model = %request.model, "Dispatching request");

            match self.attempt(entry, request).await {
                Ok((text, latency_ms)) => {
                    return Ok(GenerateResult {
                        text,
                        node_used: entry.name().to_string(),
                        latency_ms,
                        retry_count: attempts - 1,
                    });
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    excluded.insert(index);
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        match last_error {
            None => Err(Error::NoNodesAvailable),
            Some(e) => Err(Error::AllNodesFailed {
                attempts,
                last_error: e.to_string(),
            }),
        }
    }

    /// One attempt against one node, returning the text and latency in ms
    async fn attempt(&self, entry: &NodeEntry, request: &GenerateRequest) -> Result<(String, f64)> {
        let started = Instant::now();
        let outcome = {
            let _active = entry.begin_request();
            let _gauge = self.metrics.in_flight(entry.name());
            tokio::time::timeout(self.timeout, entry.transport.generate(request, self.timeout))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::attempt_failed(
                        entry.name(),
                        format!("timed out after {:?}", self.timeout),
                    ))
                })
        };
        let latency = started.elapsed();
        let latency_ms = latency.as_secs_f64() * 1000.0;

        match outcome {
            Ok(text) => {
                entry.with_metrics(|m| {
                    m.total_requests += 1;
                    m.recent_latencies.push(latency_ms);
                    m.consecutive_failures = 0;
                });
                self.metrics
                    .record_attempt(entry.name(), "success", Some(latency.as_secs_f64()));
                Ok((text, latency_ms))
            }
            Err(e) => {
                let failures = entry.with_metrics(|m| {
                    m.total_failures += 1;
                    m.consecutive_failures += 1;
                    m.status = NodeStatus::Degraded;
                    m.consecutive_failures
                });
                warn!(
                    node = %entry.name(),
                    consecutive_failures = failures,
                    error = %e,
                    "Generation attempt failed"
                );
                self.metrics.record_attempt(entry.name(), e.category(), None);
                self.metrics.set_node_up(entry.name(), false);
                self.recovery.consider(entry);
                Err(e)
            }
        }
    }
}
