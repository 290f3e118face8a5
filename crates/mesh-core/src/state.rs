//! Live per-node state
//!
//! [`NodeMetrics`] is the mutable counterpart of an [`InferenceNode`](crate::InferenceNode).
//! It is updated in place by probes and dispatch outcomes for the lifetime of
//! the orchestrator; [`NodeStatsView`] is the read-only snapshot handed out
//! for observability.

use crate::{NodeStatus, TransportKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;

/// Bounded ring buffer of recent latency samples in milliseconds
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one when full
    pub fn push(&mut self, latency_ms: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    /// Mean of the retained samples, `None` when empty
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.samples.iter()
    }
}

/// Mutable metrics for one node
#[derive(Debug, Clone)]
pub struct NodeMetrics {
    pub status: NodeStatus,
    pub active_requests: u32,
    pub recent_latencies: LatencyWindow,
    pub total_requests: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_recovery_attempt: Option<Instant>,
    /// Models listed by the node's last successful health payload
    pub advertised_models: Vec<String>,
}

impl NodeMetrics {
    /// Fresh metrics in `unknown` state
    pub fn new(latency_window: usize) -> Self {
        Self {
            status: NodeStatus::Unknown,
            active_requests: 0,
            recent_latencies: LatencyWindow::new(latency_window),
            total_requests: 0,
            total_failures: 0,
            consecutive_failures: 0,
            last_check: None,
            last_recovery_attempt: None,
            advertised_models: Vec::new(),
        }
    }

    pub fn avg_latency_ms(&self) -> Option<f64> {
        self.recent_latencies.mean()
    }
}

/// Per-node snapshot returned by `stats()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatsView {
    pub status: NodeStatus,
    pub active_requests: u32,
    pub total_requests: u64,
    /// Mean of recent latency samples, absent before the first sample
    pub avg_latency_ms: Option<f64>,
    /// Total failed dispatch attempts
    pub failures: u64,
    pub consecutive_failures: u32,
    /// Current load score, present only for online nodes
    pub load_score: Option<f64>,
    pub last_check: Option<DateTime<Utc>>,
    pub priority: u32,
    pub transport: TransportKind,
    pub models: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_window_evicts_oldest() {
        let mut window = LatencyWindow::new(3);
        assert!(window.mean().is_none());

        for sample in [10.0, 20.0, 30.0, 40.0] {
            window.push(sample);
        }

        assert_eq!(window.len(), 3);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![20.0, 30.0, 40.0]);
        assert_eq!(window.mean(), Some(30.0));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut window = LatencyWindow::new(0);
        window.push(5.0);
        window.push(7.0);
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.mean(), Some(7.0));
    }

    #[test]
    fn test_new_metrics_are_unknown() {
        let metrics = NodeMetrics::new(10);
        assert_eq!(metrics.status, NodeStatus::Unknown);
        assert_eq!(metrics.active_requests, 0);
        assert!(metrics.avg_latency_ms().is_none());
        assert!(metrics.last_check.is_none());
        assert!(metrics.last_recovery_attempt.is_none());
    }

    #[test]
    fn test_stats_view_serialization() {
        let view = NodeStatsView {
            status: NodeStatus::Online,
            active_requests: 1,
            total_requests: 4,
            avg_latency_ms: Some(52.5),
            failures: 0,
            consecutive_failures: 0,
            load_score: Some(100.0525),
            last_check: None,
            priority: 1,
            transport: TransportKind::Direct,
            models: vec!["llama3:latest".to_string()],
        };

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "online");
        assert_eq!(json["transport"], "direct");
        assert_eq!(json["avg_latency_ms"], 52.5);
    }
}
