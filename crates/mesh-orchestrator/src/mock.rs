//! Scripted transport and restarter for tests
//!
//! Available under `cfg(test)` and with the `mock` feature.

use crate::registry::NodeRegistry;
use async_trait::async_trait;
use mesh_core::{
    Error, GenerateRequest, HealthReport, InferenceNode, NodeTransport, ProcessRestarter, Result,
    TransportKind,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a mock node answers health probes
#[derive(Debug, Clone, PartialEq)]
pub enum MockHealth {
    Healthy,
    Unreachable,
    /// Never answers; the probe runs into its timeout
    Hang,
}

/// How a mock node answers one generate attempt
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Text(String),
    Fail(String),
    /// Refuses the request with a configuration error, which is not retryable
    Reject(String),
    /// Answers after the given delay instead of the node latency
    Slow(String, Duration),
    /// Never answers; the attempt runs into its timeout
    Hang,
}

/// In-memory [`NodeTransport`] with scripted outcomes
pub struct MockTransport {
    health: Mutex<MockHealth>,
    models: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<MockReply>>,
    default_reply: Mutex<MockReply>,
    latency: Mutex<Duration>,
    health_calls: AtomicUsize,
    generate_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new(health: MockHealth, default_reply: MockReply) -> Self {
        Self {
            health: Mutex::new(health),
            models: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            default_reply: Mutex::new(default_reply),
            latency: Mutex::new(Duration::ZERO),
            health_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
        }
    }

    /// Healthy node that answers every prompt with `"ok"`
    pub fn healthy() -> Self {
        Self::new(MockHealth::Healthy, MockReply::Text("ok".to_string()))
    }

    /// Node that fails every probe and every attempt
    pub fn unreachable() -> Self {
        Self::new(
            MockHealth::Unreachable,
            MockReply::Fail("connection refused".to_string()),
        )
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    pub fn with_models(self, models: &[&str]) -> Self {
        *self.models.lock() = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_reply(self, reply: MockReply) -> Self {
        *self.default_reply.lock() = reply;
        self
    }

    pub fn set_health(&self, health: MockHealth) {
        *self.health.lock() = health;
    }

    /// Queue a one-shot reply, consumed before the default reply
    pub fn push_reply(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeTransport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    async fn health(&self, timeout: Duration) -> Result<HealthReport> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        let health = self.health.lock().clone();
        let latency = *self.latency.lock();

        match health {
            MockHealth::Healthy => {
                tokio::time::sleep(latency).await;
                Ok(HealthReport {
                    models: self.models.lock().clone(),
                })
            }
            MockHealth::Unreachable => Err(Error::probe_unreachable("mock node unreachable")),
            MockHealth::Hang => {
                tokio::time::sleep(timeout).await;
                Err(Error::probe_timeout("mock node hung"))
            }
        }
    }

    async fn generate(&self, _request: &GenerateRequest, timeout: Duration) -> Result<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.lock().clone());
        let latency = *self.latency.lock();

        match reply {
            MockReply::Text(text) => {
                tokio::time::sleep(latency).await;
                Ok(text)
            }
            MockReply::Fail(reason) => Err(Error::attempt_failed("mock", reason)),
            MockReply::Reject(reason) => Err(Error::config(reason)),
            MockReply::Slow(text, delay) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            MockReply::Hang => {
                tokio::time::sleep(timeout).await;
                Err(Error::attempt_failed(
                    "mock",
                    format!("timed out after {:?}", timeout),
                ))
            }
        }
    }
}

/// [`ProcessRestarter`] that records restart requests
#[derive(Default)]
pub struct MockRestarter {
    restarted: Mutex<Vec<String>>,
    fail: bool,
}

impl MockRestarter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restarter whose every restart reports a failure
    pub fn failing() -> Self {
        Self {
            restarted: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn restart_count(&self) -> usize {
        self.restarted.lock().len()
    }

    pub fn restarted_nodes(&self) -> Vec<String> {
        self.restarted.lock().clone()
    }
}

#[async_trait]
impl ProcessRestarter for MockRestarter {
    async fn restart(&self, node: &InferenceNode) -> Result<()> {
        self.restarted.lock().push(node.name.clone());
        if self.fail {
            Err(Error::recovery_failed(format!("mock restart of {} failed", node.name)))
        } else {
            Ok(())
        }
    }
}

/// Registry holding one node backed by a healthy [`MockTransport`]
pub fn single_node_registry(node: InferenceNode) -> NodeRegistry {
    let mut transports: HashMap<String, Arc<dyn NodeTransport>> = HashMap::new();
    transports.insert(node.name.clone(), Arc::new(MockTransport::healthy()));
    match NodeRegistry::new(vec![node], transports, 10) {
        Ok(registry) => registry,
        Err(e) => panic!("mock registry: {}", e),
    }
}
