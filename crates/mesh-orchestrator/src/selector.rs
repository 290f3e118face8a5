//! Node selection

use crate::registry::NodeRegistry;
use crate::scoring::LoadScorer;
use mesh_core::NodeStatus;
use std::collections::HashSet;

/// Picks the best eligible node for a request.
///
/// Candidates must serve the requested model and not be excluded by the
/// caller. Online nodes are ranked by `(score, priority, position)`; degraded
/// nodes are only considered when fallback is enabled and no online node
/// qualifies. Offline and unknown nodes are never selected.
#[derive(Debug, Clone)]
pub struct Selector {
    scorer: LoadScorer,
    allow_degraded_fallback: bool,
}

impl Selector {
    pub fn new(scorer: LoadScorer, allow_degraded_fallback: bool) -> Self {
        Self {
            scorer,
            allow_degraded_fallback,
        }
    }

    /// Index of the selected node, `None` when nothing is eligible
    pub fn select(
        &self,
        registry: &NodeRegistry,
        model: &str,
        excluded: &HashSet<usize>,
    ) -> Option<usize> {
        self.best_with_status(registry, model, excluded, NodeStatus::Online)
            .or_else(|| {
                if self.allow_degraded_fallback {
                    self.best_with_status(registry, model, excluded, NodeStatus::Degraded)
                } else {
                    None
                }
            })
    }

    fn best_with_status(
        &self,
        registry: &NodeRegistry,
        model: &str,
        excluded: &HashSet<usize>,
        status: NodeStatus,
    ) -> Option<usize> {
        registry
            .entries()
            .iter()
            .enumerate()
            .filter(|(index, entry)| !excluded.contains(index) && entry.node.serves_model(model))
            .filter_map(|(index, entry)| {
                entry.with_metrics(|m| {
                    (m.status == status).then(|| (self.scorer.score(m), entry.node.priority, index))
                })
            })
            .min_by(|a, b| {
                a.0.total_cmp(&b.0)
                    .then(a.1.cmp(&b.1))
                    .then(a.2.cmp(&b.2))
            })
            .map(|(_, _, index)| index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use mesh_core::{InferenceNode, NodeTransport};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn registry(nodes: Vec<InferenceNode>) -> NodeRegistry {
        let transports = nodes
            .iter()
            .map(|n| {
                (
                    n.name.clone(),
                    Arc::new(MockTransport::healthy()) as Arc<dyn NodeTransport>,
                )
            })
            .collect::<HashMap<_, _>>();
        NodeRegistry::new(nodes, transports, 10).unwrap()
    }

    fn set(registry: &NodeRegistry, index: usize, status: NodeStatus, latency: Option<f64>) {
        registry.get(index).unwrap().with_metrics(|m| {
            m.status = status;
            if let Some(latency) = latency {
                m.recent_latencies.push(latency);
            }
        });
    }

    fn three_nodes() -> NodeRegistry {
        registry(vec![
            InferenceNode::new("a", "http://a:1").with_priority(1),
            InferenceNode::new("b", "http://b:1").with_priority(2),
            InferenceNode::new("c", "http://c:1").with_priority(3),
        ])
    }

    #[test]
    fn test_picks_lowest_score() {
        let registry = three_nodes();
        set(&registry, 0, NodeStatus::Online, Some(50.0));
        set(&registry, 1, NodeStatus::Online, Some(500.0));
        set(&registry, 2, NodeStatus::Offline, Some(1.0));

        let selector = Selector::new(LoadScorer::default(), false);
        assert_eq!(selector.select(&registry, "llama3", &HashSet::new()), Some(0));

        let excluded = HashSet::from([0]);
        assert_eq!(selector.select(&registry, "llama3", &excluded), Some(1));

        let excluded = HashSet::from([0, 1]);
        assert_eq!(selector.select(&registry, "llama3", &excluded), None);
    }

    #[test]
    fn test_priority_breaks_ties() {
        let registry = three_nodes();
        for index in [2, 1, 0] {
            set(&registry, index, NodeStatus::Online, Some(100.0));
        }

        let selector = Selector::new(LoadScorer::default(), false);
        assert_eq!(selector.select(&registry, "llama3", &HashSet::new()), Some(0));
    }

    #[test]
    fn test_non_online_nodes_are_never_selected() {
        let registry = three_nodes();
        set(&registry, 0, NodeStatus::Degraded, Some(1.0));
        set(&registry, 1, NodeStatus::Unknown, None);
        set(&registry, 2, NodeStatus::Offline, Some(1.0));

        let selector = Selector::new(LoadScorer::default(), false);
        assert_eq!(selector.select(&registry, "llama3", &HashSet::new()), None);
    }

    #[test]
    fn test_degraded_fallback() {
        let registry = three_nodes();
        set(&registry, 0, NodeStatus::Offline, Some(1.0));
        set(&registry, 1, NodeStatus::Degraded, Some(300.0));
        set(&registry, 2, NodeStatus::Degraded, Some(100.0));

        let selector = Selector::new(LoadScorer::default(), true);
        assert_eq!(selector.select(&registry, "llama3", &HashSet::new()), Some(2));

        set(&registry, 0, NodeStatus::Online, None);
        assert_eq!(selector.select(&registry, "llama3", &HashSet::new()), Some(0));
    }

    #[test]
    fn test_capability_filter() {
        let registry = registry(vec![
            InferenceNode::new("gpu", "http://gpu:1").with_capabilities(["mistral:7b"]),
            InferenceNode::new("cpu", "http://cpu:1").with_priority(5),
        ]);
        set(&registry, 0, NodeStatus::Online, Some(10.0));
        set(&registry, 1, NodeStatus::Online, Some(900.0));

        let selector = Selector::new(LoadScorer::default(), false);
        assert_eq!(selector.select(&registry, "mistral:7b", &HashSet::new()), Some(0));
        assert_eq!(selector.select(&registry, "llama3", &HashSet::new()), Some(1));
    }

    #[test]
    fn test_active_requests_shift_selection() {
        let registry = three_nodes();
        set(&registry, 0, NodeStatus::Online, Some(50.0));
        set(&registry, 1, NodeStatus::Online, Some(500.0));
        let _busy = registry.get(0).unwrap().begin_request();

        let selector = Selector::new(LoadScorer::default(), false);
        assert_eq!(selector.select(&registry, "llama3", &HashSet::new()), Some(1));
    }
}
