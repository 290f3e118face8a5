//! Node registry
//!
//! The registry is the only shared mutable state of an orchestrator. The node
//! set is fixed at construction; each node's metrics sit behind their own
//! lock, which is never held across an await point.

use mesh_core::{Error, InferenceNode, NodeMetrics, NodeTransport, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A configured node, its transport and its live metrics
pub struct NodeEntry {
    pub node: InferenceNode,
    pub transport: Arc<dyn NodeTransport>,
    metrics: Mutex<NodeMetrics>,
    probe_in_flight: AtomicBool,
}

impl NodeEntry {
    fn new(node: InferenceNode, transport: Arc<dyn NodeTransport>, latency_window: usize) -> Self {
        Self {
            node,
            transport,
            metrics: Mutex::new(NodeMetrics::new(latency_window)),
            probe_in_flight: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Run `f` with exclusive access to this node's metrics
    pub fn with_metrics<R>(&self, f: impl FnOnce(&mut NodeMetrics) -> R) -> R {
        f(&mut self.metrics.lock())
    }

    /// Copy of the current metrics
    pub fn snapshot(&self) -> NodeMetrics {
        self.metrics.lock().clone()
    }

    /// Claim the probe slot of this node, `None` if a probe is already running
    pub fn try_begin_probe(&self) -> Option<ProbeGuard<'_>> {
        self.probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ProbeGuard { entry: self })
    }

    /// Count one in-flight request until the guard is dropped
    pub fn begin_request(&self) -> ActiveRequestGuard<'_> {
        self.with_metrics(|m| m.active_requests += 1);
        ActiveRequestGuard { entry: self }
    }
}

/// Releases the probe slot on drop
pub struct ProbeGuard<'a> {
    entry: &'a NodeEntry,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.entry.probe_in_flight.store(false, Ordering::Release);
    }
}

/// Decrements `active_requests` on drop, whatever the attempt's outcome
pub struct ActiveRequestGuard<'a> {
    entry: &'a NodeEntry,
}

impl Drop for ActiveRequestGuard<'_> {
    fn drop(&mut self) {
        self.entry
            .with_metrics(|m| m.active_requests = m.active_requests.saturating_sub(1));
    }
}

/// Fixed set of nodes with live metrics
pub struct NodeRegistry {
    entries: Vec<NodeEntry>,
}

impl NodeRegistry {
    /// Build the registry, pairing every node with its transport by name
    pub fn new(
        nodes: Vec<InferenceNode>,
        mut transports: HashMap<String, Arc<dyn NodeTransport>>,
        latency_window: usize,
    ) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::config("At least one node must be configured"));
        }

        let mut entries = Vec::with_capacity(nodes.len());
        for node in nodes {
            if entries.iter().any(|e: &NodeEntry| e.node.name == node.name) {
                return Err(Error::config(format!("Duplicate node name: {}", node.name)));
            }
            let transport = transports.remove(&node.name).ok_or_else(|| {
                Error::config(format!("No transport for node {}", node.name))
            })?;
            entries.push(NodeEntry::new(node, transport, latency_window));
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[NodeEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&NodeEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn registry(names: &[&str]) -> NodeRegistry {
        let nodes = names
            .iter()
            .map(|n| InferenceNode::new(*n, format!("http://{}:11434", n)))
            .collect();
        let transports = names
            .iter()
            .map(|n| {
                (
                    n.to_string(),
                    Arc::new(MockTransport::healthy()) as Arc<dyn NodeTransport>,
                )
            })
            .collect();
        NodeRegistry::new(nodes, transports, 10).unwrap()
    }

    #[test]
    fn test_registry_creation() {
        let registry = registry(&["a", "b"]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1).unwrap().name(), "b");
        assert!(registry.get(2).is_none());
        assert_eq!(
            registry.get(0).unwrap().snapshot().status,
            mesh_core::NodeStatus::Unknown
        );
    }

    #[test]
    fn test_missing_transport_is_rejected() {
        let nodes = vec![InferenceNode::new("a", "http://a:11434")];
        assert!(NodeRegistry::new(nodes, HashMap::new(), 10).is_err());
    }

    #[test]
    fn test_active_request_guard_restores_count() {
        let registry = registry(&["a"]);
        let entry = registry.get(0).unwrap();

        {
            let _first = entry.begin_request();
            let _second = entry.begin_request();
            assert_eq!(entry.snapshot().active_requests, 2);
        }

        assert_eq!(entry.snapshot().active_requests, 0);
    }

    #[test]
    fn test_single_probe_slot() {
        let registry = registry(&["a"]);
        let entry = registry.get(0).unwrap();

        let guard = entry.try_begin_probe();
        assert!(guard.is_some());
        assert!(entry.try_begin_probe().is_none());

        drop(guard);
        assert!(entry.try_begin_probe().is_some());
    }
}
