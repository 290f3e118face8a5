//! Prometheus metrics for the orchestrator

use prometheus::{CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

/// Metrics recorded by probes, dispatch attempts and recovery actions
#[derive(Debug, Clone)]
pub struct OrchestratorMetrics {
    /// Generate calls by outcome
    pub generate_calls: CounterVec,

    /// Dispatch attempts by node and outcome
    pub dispatch_attempts: CounterVec,

    /// Health probes by node and outcome
    pub probes: CounterVec,

    /// Recovery actions by node and outcome
    pub recoveries: CounterVec,

    /// In-flight dispatch attempts per node
    pub requests_in_flight: GaugeVec,

    /// Latency of successful dispatch attempts
    pub attempt_latency_seconds: HistogramVec,

    /// 1 when the node is online, 0 otherwise
    pub node_up: GaugeVec,
}

impl OrchestratorMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            generate_calls: CounterVec::new(
                Opts::new("mesh_generate_calls_total", "Total generate calls by outcome"),
                &["outcome"],
            )?,
            dispatch_attempts: CounterVec::new(
                Opts::new(
                    "mesh_dispatch_attempts_total",
                    "Total dispatch attempts by node and outcome",
                ),
                &["node", "outcome"],
            )?,
            probes: CounterVec::new(
                Opts::new("mesh_probes_total", "Total health probes by node and outcome"),
                &["node", "outcome"],
            )?,
            recoveries: CounterVec::new(
                Opts::new(
                    "mesh_recovery_actions_total",
                    "Total local process restarts by node and outcome",
                ),
                &["node", "outcome"],
            )?,
            requests_in_flight: GaugeVec::new(
                Opts::new("mesh_node_requests_in_flight", "In-flight dispatch attempts"),
                &["node"],
            )?,
            attempt_latency_seconds: HistogramVec::new(
                HistogramOpts::new(
                    "mesh_dispatch_latency_seconds",
                    "Latency of successful dispatch attempts",
                )
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
                &["node"],
            )?,
            node_up: GaugeVec::new(
                Opts::new("mesh_node_up", "Node online status (1=online, 0=not online)"),
                &["node"],
            )?,
        })
    }

    /// Register all metrics with the given registry
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.generate_calls.clone()))?;
        registry.register(Box::new(self.dispatch_attempts.clone()))?;
        registry.register(Box::new(self.probes.clone()))?;
        registry.register(Box::new(self.recoveries.clone()))?;
        registry.register(Box::new(self.requests_in_flight.clone()))?;
        registry.register(Box::new(self.attempt_latency_seconds.clone()))?;
        registry.register(Box::new(self.node_up.clone()))?;
        Ok(())
    }

    pub fn record_generate(&self, outcome: &str) {
        self.generate_calls.with_label_values(&[outcome]).inc();
    }

    pub fn record_attempt(&self, node: &str, outcome: &str, latency_seconds: Option<f64>) {
        self.dispatch_attempts
            .with_label_values(&[node, outcome])
            .inc();
        if let Some(latency) = latency_seconds {
            self.attempt_latency_seconds
                .with_label_values(&[node])
                .observe(latency);
        }
    }

    pub fn record_probe(&self, node: &str, outcome: &str, online: bool) {
        self.probes.with_label_values(&[node, outcome]).inc();
        self.set_node_up(node, online);
    }

    pub fn set_node_up(&self, node: &str, online: bool) {
        self.node_up
            .with_label_values(&[node])
            .set(if online { 1.0 } else { 0.0 });
    }

    pub fn record_recovery(&self, node: &str, outcome: &str) {
        self.recoveries.with_label_values(&[node, outcome]).inc();
    }

    /// Count one in-flight attempt on `node` until the guard is dropped
    pub fn in_flight(&self, node: &str) -> InFlightGauge {
        let gauge = self.requests_in_flight.with_label_values(&[node]);
        gauge.inc();
        InFlightGauge { gauge }
    }
}

/// Decrements the in-flight gauge on drop
pub struct InFlightGauge {
    gauge: Gauge,
}

impl Drop for InFlightGauge {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}
