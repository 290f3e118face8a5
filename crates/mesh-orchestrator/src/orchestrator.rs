//! Orchestrator facade
//!
//! Wires registry, prober, dispatcher and recovery together and exposes the
//! `start`/`stop`/`generate`/`stats` surface. Each instance owns its own
//! registry, so several orchestrators in one process are fully isolated.

use crate::dispatcher::Dispatcher;
use crate::metrics::OrchestratorMetrics;
use crate::probe::HealthProber;
use crate::recovery::RecoveryManager;
use crate::registry::NodeRegistry;
use crate::scoring::LoadScorer;
use crate::selector::Selector;
use mesh_core::{
    Error, GenerateRequest, GenerateResult, NodeStatsView, NodeTransport, OrchestratorConfig,
    ProcessRestarter, Result,
};
use mesh_transport::{build_transport, LocalProcessManager};
use parking_lot::Mutex;
use prometheus::{Encoder, Registry, TextEncoder};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle of the running probe loop
struct ProbeLoop {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<NodeRegistry>,
    scorer: LoadScorer,
    prober: Arc<HealthProber>,
    dispatcher: Dispatcher,
    metrics: Arc<OrchestratorMetrics>,
    prometheus: Registry,
    in_flight: Arc<AtomicUsize>,
    probe_loop: Mutex<Option<ProbeLoop>>,
}

impl Orchestrator {
    /// Create an orchestrator with the transports and process manager implied by the config
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;

        let mut transports = HashMap::new();
        for node in &config.nodes {
            transports.insert(node.name.clone(), build_transport(node, &config)?);
        }

        Self::with_transports(config, transports, Arc::new(LocalProcessManager::new()))
    }

    /// Create an orchestrator with explicit collaborators
    pub fn with_transports(
        config: OrchestratorConfig,
        transports: HashMap<String, Arc<dyn NodeTransport>>,
        restarter: Arc<dyn ProcessRestarter>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(
            OrchestratorMetrics::new()
                .map_err(|e| Error::Other(anyhow::anyhow!("Failed to create metrics: {}", e)))?,
        );
        let prometheus = Registry::new();
        metrics
            .register(&prometheus)
            .map_err(|e| Error::Other(anyhow::anyhow!("Failed to register metrics: {}", e)))?;

        let registry = Arc::new(NodeRegistry::new(
            config.nodes.clone(),
            transports,
            config.latency_window,
        )?);

        let recovery = Arc::new(RecoveryManager::new(
            restarter,
            config.recovery_threshold,
            config.recovery_cooldown(),
            Arc::clone(&metrics),
        ));

        let prober = Arc::new(HealthProber::new(
            Arc::clone(&registry),
            Arc::clone(&recovery),
            Arc::clone(&metrics),
            config.probe_timeout(),
            config.offline_threshold,
        ));

        let scorer = LoadScorer::new(config.weights);
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Selector::new(scorer, config.allow_degraded_fallback),
            recovery,
            Arc::clone(&metrics),
            config.generate_timeout(),
            config.max_retries,
        );

        Ok(Self {
            config,
            registry,
            scorer,
            prober,
            dispatcher,
            metrics,
            prometheus,
            in_flight: Arc::new(AtomicUsize::new(0)),
            probe_loop: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one probe pass, then launch the background probe loop.
    ///
    /// Calling `start` on a running orchestrator is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            debug!("Orchestrator already started");
            return Ok(());
        }

        info!(nodes = self.registry.len(), "Starting orchestrator");
        self.prober.probe_all().await;

        let online = self
            .registry
            .entries()
            .iter()
            .filter(|e| e.snapshot().status.is_online())
            .count();
        info!(online, total = self.registry.len(), "Initial probe pass complete");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = Arc::clone(&self.prober).spawn(self.config.probe_interval(), shutdown_rx);

        let mut slot = self.probe_loop.lock();
        if slot.is_some() {
            // A concurrent start won the race; keep its loop.
            handle.abort();
            return Ok(());
        }
        *slot = Some(ProbeLoop {
            shutdown_tx,
            handle,
        });

        Ok(())
    }

    /// Cancel the probe loop and wait up to the grace period for in-flight generate calls
    pub async fn stop(&self) {
        let probe_loop = self.probe_loop.lock().take();
        if let Some(ProbeLoop {
            shutdown_tx,
            handle,
        }) = probe_loop
        {
            let _ = shutdown_tx.send(());
            if let Err(e) = handle.await {
                warn!("Probe loop ended abnormally: {}", e);
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace();
        loop {
            let pending = self.in_flight.load(Ordering::SeqCst);
            if pending == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(pending, "Grace period elapsed, abandoning in-flight requests");
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        info!("Orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.probe_loop.lock().is_some()
    }

    /// Run one generate call with failover.
    ///
    /// Only [`Error::NoNodesAvailable`] and [`Error::AllNodesFailed`] are returned.
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateResult> {
        let _in_flight = InFlight::enter(&self.in_flight);

        match self.dispatcher.generate(&request).await {
            Ok(result) => {
                info!(
                    node = %result.node_used,
                    model = %request.model,
                    retries = result.retry_count,
                    latency_ms = result.latency_ms,
                    "Request served"
                );
                self.metrics.record_generate("success");
                Ok(result)
            }
            Err(e) => {
                warn!(model = %request.model, error = %e, "Request failed");
                self.metrics.record_generate(e.category());
                Err(e)
            }
        }
    }

    /// Run one probe pass outside the background loop
    pub async fn probe_now(&self) {
        self.prober.probe_all().await;
    }

    /// Per-node snapshot keyed by node name
    pub fn stats(&self) -> BTreeMap<String, NodeStatsView> {
        self.registry
            .entries()
            .iter()
            .map(|entry| {
                let view = entry.with_metrics(|m| NodeStatsView {
                    status: m.status,
                    active_requests: m.active_requests,
                    total_requests: m.total_requests,
                    avg_latency_ms: m.avg_latency_ms(),
                    failures: m.total_failures,
                    consecutive_failures: m.consecutive_failures,
                    load_score: m.status.is_online().then(|| self.scorer.score(m)),
                    last_check: m.last_check,
                    priority: entry.node.priority,
                    transport: entry.transport.kind(),
                    models: m.advertised_models.clone(),
                });
                (entry.name().to_string(), view)
            })
            .collect()
    }

    /// Metrics in the Prometheus text exposition format
    pub fn export_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus.gather();

        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| Error::Other(anyhow::anyhow!("Failed to encode metrics: {}", e)))?;

        String::from_utf8(buffer).map_err(|e| Error::Other(e.into()))
    }
}

/// Counts one in-flight generate call until dropped
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
